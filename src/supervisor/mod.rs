// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The daemon's event loop.
//!
//! One task owns the [`RoutingState`]. Everything that changes it arrives
//! as a [`ProtocolEvent`] on a single channel: route updates from the
//! netlink monitor, "interfaces changed" hints that trigger a fresh
//! interface snapshot, and timer expiries from the timer manager.

pub mod interfaces;
pub mod netlink_monitor;
pub mod timer_manager;

pub use interfaces::{InterfaceSnapshot, SnapshotEntry};
pub use timer_manager::{ChannelTimer, TimerManager};

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use crate::config::{Config, KernelBackend};
use crate::logging::{Facility, Logger};
use crate::mroute::{LinuxMfc, MemoryMfc, MfcKernel};
use crate::protocols::rp::StaticRp;
use crate::protocols::signaling::SignalRecorder;
use crate::protocols::{ProtocolEvent, TimerRequest, TimerType};
use crate::refresh::{log_stats, TimerHandle};
use crate::state::{Collaborators, RoutingState};
use crate::{log_debug, log_info, log_warning};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const TIMER_CHANNEL_CAPACITY: usize = 256;
/// Join/prune and membership notifications kept for inspection
const RECENT_SIGNALS: usize = 256;

/// Owns the routing state and applies events to it
pub struct Supervisor {
    pub state: RoutingState,
    snapshot: InterfaceSnapshot,
    timer_tx: mpsc::Sender<TimerRequest>,
    resync_period: Option<Duration>,
}

impl Supervisor {
    pub fn new(state: RoutingState, timer_tx: mpsc::Sender<TimerRequest>, resync_secs: u64) -> Self {
        Self {
            state,
            snapshot: InterfaceSnapshot::default(),
            timer_tx,
            resync_period: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
        }
    }

    /// Apply the difference between the last snapshot and `current`
    pub fn apply_snapshot(&mut self, current: InterfaceSnapshot) {
        let events = self.snapshot.diff(&current);
        if !events.is_empty() {
            log_debug!(
                self.state.logger,
                Facility::Zebra,
                "interface resync: {} changes across {} interfaces",
                events.len(),
                current.len()
            );
        }
        for event in events {
            self.state.handle_zebra_event(event);
        }
        self.snapshot = current;
    }

    fn resync_interfaces(&mut self) {
        self.apply_snapshot(InterfaceSnapshot::capture());
    }

    fn schedule_resync(&self) {
        let Some(period) = self.resync_period else {
            return;
        };
        let request = TimerRequest {
            timer_type: TimerType::InterfaceResync,
            fire_at: Instant::now() + period,
            replace_existing: true,
        };
        if let Err(e) = self.timer_tx.try_send(request) {
            log_warning!(
                self.state.logger,
                Facility::Supervisor,
                "could not schedule interface resync: {}",
                e
            );
        }
    }

    pub fn handle_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Zebra(event) => self.state.handle_zebra_event(event),
            ProtocolEvent::InterfacesChanged => self.resync_interfaces(),
            ProtocolEvent::TimerExpired(TimerType::RpfCacheRefresh { id }) => {
                self.state.on_refresh_timer(TimerHandle(id))
            }
            ProtocolEvent::TimerExpired(TimerType::InterfaceResync) => {
                self.resync_interfaces();
                self.schedule_resync();
            }
        }
    }
}

fn open_kernel(config: &Config, logger: &Logger) -> Result<Box<dyn MfcKernel>> {
    Ok(match config.kernel {
        KernelBackend::Linux => Box::new(LinuxMfc::open(logger.clone())?),
        KernelBackend::Memory => Box::new(MemoryMfc::new()),
    })
}

/// Run the daemon until `shutdown_rx` fires or its sender is dropped
pub async fn run(config: Config, logger: Logger, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
    config.validate()?;
    config.apply_log_levels(&logger);

    let kernel = open_kernel(&config, &logger)?;

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
    let timer_task = tokio::spawn(TimerManager::new(timer_rx, event_tx.clone(), logger.clone()).run());

    let signals = SignalRecorder::bounded(RECENT_SIGNALS, logger.clone());
    let collaborators = Collaborators {
        kernel,
        timer: Box::new(ChannelTimer::new(timer_tx.clone(), logger.clone())),
        rp: Box::new(StaticRp::from_config(&config.static_rp, logger.clone())),
        joinprune: Box::new(signals.clone()),
        membership: Box::new(signals),
    };
    let state = RoutingState::from_config(&config, collaborators, logger.clone());
    let mut supervisor = Supervisor::new(state, timer_tx, config.interface_resync_secs);

    // The memory backend has no kernel to listen to; interfaces still come
    // from the periodic snapshot
    let monitor = match config.kernel {
        KernelBackend::Linux => Some(netlink_monitor::spawn_netlink_monitor(
            event_tx.clone(),
            logger.clone(),
        )),
        KernelBackend::Memory => None,
    };
    drop(event_tx);

    supervisor.resync_interfaces();
    supervisor.schedule_resync();

    log_info!(
        logger,
        Facility::Supervisor,
        "started with {} interfaces, kernel backend {:?}",
        supervisor.state.vifs.iter().count(),
        config.kernel
    );

    let mut shutdown_rx = shutdown_rx;
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                log_info!(logger, Facility::Supervisor, "shutdown requested");
                break;
            }

            event = event_rx.recv() => {
                match event {
                    Some(event) => supervisor.handle_event(event),
                    None => {
                        log_warning!(logger, Facility::Supervisor, "event channel closed");
                        break;
                    }
                }
            }
        }
    }

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    timer_task.abort();
    log_stats(supervisor.state.stats(), &logger);
    log_info!(
        logger,
        Facility::Supervisor,
        "stopping with {} forwarding entries",
        supervisor.state.oil.len()
    );
    Ok(())
}
