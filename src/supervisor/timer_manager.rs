// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timer management for the routing event loop.
//!
//! Timers are kept in a priority queue; the next one to fire determines how
//! long the manager sleeps. Expiries are posted back to the event loop as
//! [`ProtocolEvent::TimerExpired`], so every timer callback runs on the
//! same task as the rest of the routing state.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::logging::{Facility, Logger};
use crate::protocols::{ProtocolEvent, TimerRequest, TimerType};
use crate::refresh::{RefreshTimer, TimerHandle};
use crate::{log_debug, log_error, log_info, log_warning};

/// Timer manager task
pub struct TimerManager {
    /// Pending timers, earliest first
    timers: BinaryHeap<Reverse<ScheduledTimer>>,
    /// Channel to receive new timer requests
    timer_rx: mpsc::Receiver<TimerRequest>,
    /// Channel to send timer expiry events
    event_tx: mpsc::Sender<ProtocolEvent>,
    logger: Logger,
}

/// A scheduled timer with its fire time and type
#[derive(Debug, Clone)]
struct ScheduledTimer {
    fire_at: Instant,
    timer_type: TimerType,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.timer_type == other.timer_type
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at.cmp(&other.fire_at)
    }
}

impl TimerManager {
    pub fn new(
        timer_rx: mpsc::Receiver<TimerRequest>,
        event_tx: mpsc::Sender<ProtocolEvent>,
        logger: Logger,
    ) -> Self {
        Self {
            timers: BinaryHeap::new(),
            timer_rx,
            event_tx,
            logger,
        }
    }

    fn schedule(&mut self, request: TimerRequest) {
        if request.replace_existing {
            self.timers = self
                .timers
                .drain()
                .filter(|t| t.0.timer_type != request.timer_type)
                .collect();
        }

        self.timers.push(Reverse(ScheduledTimer {
            fire_at: request.fire_at,
            timer_type: request.timer_type,
        }));

        log_debug!(
            self.logger,
            Facility::Supervisor,
            "scheduled timer, {} pending",
            self.timers.len()
        );
    }

    /// Pop the next timer if it is due
    fn pop_expired(&mut self, now: Instant) -> Option<ScheduledTimer> {
        match self.timers.peek() {
            Some(Reverse(next)) if next.fire_at <= now => self.timers.pop().map(|t| t.0),
            _ => None,
        }
    }

    /// Run until either channel closes
    pub async fn run(mut self) {
        log_info!(self.logger, Facility::Supervisor, "timer manager started");

        loop {
            let sleep_duration = match self.timers.peek() {
                Some(Reverse(next)) => next.fire_at.saturating_duration_since(Instant::now()),
                // Nothing pending; wake up on the next request
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                _ = sleep(sleep_duration) => {
                    let now = Instant::now();
                    while let Some(timer) = self.pop_expired(now) {
                        log_debug!(
                            self.logger,
                            Facility::Supervisor,
                            "timer expired: {:?}",
                            timer.timer_type
                        );
                        let event = ProtocolEvent::TimerExpired(timer.timer_type);
                        if self.event_tx.send(event).await.is_err() {
                            log_warning!(
                                self.logger,
                                Facility::Supervisor,
                                "event channel closed, timer manager exiting"
                            );
                            return;
                        }
                    }
                }

                request = self.timer_rx.recv() => {
                    match request {
                        Some(req) => self.schedule(req),
                        None => {
                            log_info!(
                                self.logger,
                                Facility::Supervisor,
                                "timer request channel closed, timer manager exiting"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// [`RefreshTimer`] backed by the timer manager
pub struct ChannelTimer {
    timer_tx: mpsc::Sender<TimerRequest>,
    next_id: u64,
    logger: Logger,
}

impl ChannelTimer {
    pub fn new(timer_tx: mpsc::Sender<TimerRequest>, logger: Logger) -> Self {
        Self {
            timer_tx,
            next_id: 0,
            logger,
        }
    }
}

impl RefreshTimer for ChannelTimer {
    fn arm(&mut self, delay: Duration) -> Option<TimerHandle> {
        self.next_id += 1;
        let request = TimerRequest {
            timer_type: TimerType::RpfCacheRefresh { id: self.next_id },
            fire_at: Instant::now() + delay,
            replace_existing: false,
        };
        if let Err(e) = self.timer_tx.try_send(request) {
            log_error!(
                self.logger,
                Facility::Supervisor,
                "could not arm RPF cache refresh timer: {}",
                e
            );
            return None;
        }
        Some(TimerHandle(self.next_id))
    }
}
