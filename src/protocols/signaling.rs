// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Join/prune and local-membership notifications.
//!
//! [`SignalRecorder`] implements both [`JoinPruneSignaling`] and
//! [`LocalMembership`]. It logs every notification and keeps it in a shared
//! list that a status dump or a test can read. The daemon uses a bounded
//! recorder that only keeps the most recent notifications. Packet encoding
//! is handled by the PIM protocol engine that consumes these notifications.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{JoinPruneSignaling, LocalMembership};
use crate::logging::{Facility, Logger};
use crate::Sg;
use crate::{log_debug, log_info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Signal {
    JoinPrune {
        interface: String,
        neighbor: Ipv4Addr,
        sg: Sg,
        is_join: bool,
    },
    JoinTimerRestart(Sg),
    JoinDesiredUpdate(Sg),
    InheritedOlistDecide(Sg),
    LocalMemberAdd { interface: String, sg: Sg },
    LocalMemberRemove { interface: String, sg: Sg },
    ChannelsDeleted { interface: String },
}

#[derive(Clone)]
pub struct SignalRecorder {
    signals: Arc<Mutex<VecDeque<Signal>>>,
    capacity: Option<usize>,
    logger: Logger,
}

impl SignalRecorder {
    /// Keeps every notification until drained
    pub fn new(logger: Logger) -> Self {
        Self {
            signals: Arc::new(Mutex::new(VecDeque::new())),
            capacity: None,
            logger,
        }
    }

    /// Keeps only the last `capacity` notifications
    pub fn bounded(capacity: usize, logger: Logger) -> Self {
        Self {
            signals: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: Some(capacity),
            logger,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut VecDeque<Signal>) -> R) -> R {
        let mut guard = match self.signals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn push(&self, signal: Signal) {
        let capacity = self.capacity;
        self.with(|signals| {
            if let Some(capacity) = capacity {
                if capacity == 0 {
                    return;
                }
                while signals.len() >= capacity {
                    signals.pop_front();
                }
            }
            signals.push_back(signal);
        });
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.with(|signals| signals.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.with(|signals| signals.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return and forget everything recorded so far
    pub fn drain(&self) -> Vec<Signal> {
        self.with(|signals| signals.drain(..).collect())
    }

    /// Join/prune messages only
    pub fn join_prunes(&self) -> Vec<Signal> {
        self.signals()
            .into_iter()
            .filter(|s| matches!(s, Signal::JoinPrune { .. }))
            .collect()
    }
}

impl JoinPruneSignaling for SignalRecorder {
    fn send(&mut self, interface: &str, neighbor: Ipv4Addr, sg: &Sg, is_join: bool) {
        log_info!(
            self.logger,
            Facility::Pim,
            "send {} {} to {} on {}",
            if is_join { "Join" } else { "Prune" },
            sg,
            neighbor,
            interface
        );
        self.push(Signal::JoinPrune {
            interface: interface.to_string(),
            neighbor,
            sg: *sg,
            is_join,
        });
    }

    fn restart_join_timer(&mut self, sg: &Sg) {
        log_debug!(self.logger, Facility::Pim, "join timer restarted for {}", sg);
        self.push(Signal::JoinTimerRestart(*sg));
    }

    fn update_join_desired(&mut self, sg: &Sg) {
        log_debug!(self.logger, Facility::Pim, "JoinDesired re-evaluated for {}", sg);
        self.push(Signal::JoinDesiredUpdate(*sg));
    }

    fn inherited_olist_decide(&mut self, sg: &Sg) {
        log_debug!(self.logger, Facility::Pim, "inherited olist rescan for {}", sg);
        self.push(Signal::InheritedOlistDecide(*sg));
    }
}

impl LocalMembership for SignalRecorder {
    fn add_local_member(&mut self, interface: &str, sg: &Sg) {
        log_debug!(
            self.logger,
            Facility::Pim,
            "local membership {} added on {}",
            sg,
            interface
        );
        self.push(Signal::LocalMemberAdd {
            interface: interface.to_string(),
            sg: *sg,
        });
    }

    fn remove_local_member(&mut self, interface: &str, sg: &Sg) {
        log_debug!(
            self.logger,
            Facility::Pim,
            "local membership {} removed on {}",
            sg,
            interface
        );
        self.push(Signal::LocalMemberRemove {
            interface: interface.to_string(),
            sg: *sg,
        });
    }

    fn delete_all_channels(&mut self, interface: &str) {
        log_info!(
            self.logger,
            Facility::Pim,
            "all channels on {} deleted",
            interface
        );
        self.push(Signal::ChannelsDeleted {
            interface: interface.to_string(),
        });
    }
}
