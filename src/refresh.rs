// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Debounced RPF cache refresh.
//!
//! A routing change calls [`RoutingState::request_refresh`]. The first
//! request arms a one-shot timer; requests arriving while it is armed only
//! bump the counters. When the timer fires the whole cache is swept once:
//!
//! 1. every upstream flow is re-run through RPF, and flows whose upstream
//!    neighbor moved are re-signaled (Prune old, Join new)
//! 2. every forwarding cache entry drops outputs no protocol holds any
//!    more and is reconciled against the resolver
//! 3. RP reachability is re-evaluated

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::logging::{Facility, Logger};
use crate::rpf::{self, RpfResult};
use crate::state::RoutingState;
use crate::vif::VifResolver;
use crate::{log_debug, log_info, log_notice, log_warning};
use crate::{Sg, VifIndex};

/// Identifies one arming of a [`RefreshTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// One-shot timer used by the refresh scheduler
pub trait RefreshTimer: Send {
    /// Arm a timer that fires once after `delay`. `None` if it could not
    /// be armed; nothing will fire.
    fn arm(&mut self, delay: Duration) -> Option<TimerHandle>;
}

#[derive(Debug, Default)]
struct ManualTimerState {
    next_id: u64,
    pending: Vec<(TimerHandle, Duration)>,
    armed_total: usize,
    refusing: bool,
}

/// Timer that never fires on its own. Clones share state so a test can
/// fire whatever the scheduler armed.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut ManualTimerState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Armed timers that have not been taken yet
    pub fn pending(&self) -> Vec<TimerHandle> {
        self.with(|s| s.pending.iter().map(|(h, _)| *h).collect())
    }

    /// Remove and return the oldest pending timer
    pub fn take(&self) -> Option<TimerHandle> {
        self.with(|s| {
            if s.pending.is_empty() {
                None
            } else {
                Some(s.pending.remove(0).0)
            }
        })
    }

    /// Number of times the timer was armed
    pub fn armed_total(&self) -> usize {
        self.with(|s| s.armed_total)
    }

    /// Make `arm` fail until called again with `false`
    pub fn refuse_arming(&self, refuse: bool) {
        self.with(|s| s.refusing = refuse);
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.with(|s| s.pending.last().map(|(_, d)| *d))
    }
}

impl RefreshTimer for ManualTimer {
    fn arm(&mut self, delay: Duration) -> Option<TimerHandle> {
        self.with(|s| {
            if s.refusing {
                return None;
            }
            s.next_id += 1;
            let handle = TimerHandle(s.next_id);
            s.pending.push((handle, delay));
            s.armed_total += 1;
            Some(handle)
        })
    }
}

/// Counters of the refresh machinery
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStats {
    pub refresh_requests: u64,
    pub refresh_events: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_routing_change: Option<DateTime<Utc>>,
    pub scan_oil_events: u64,
    pub last_scan_oil: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled(TimerHandle),
}

pub struct RefreshScheduler {
    state: SchedulerState,
    delay: Duration,
    timer: Box<dyn RefreshTimer>,
    stats: RefreshStats,
}

impl RefreshScheduler {
    pub fn new(timer: Box<dyn RefreshTimer>, delay: Duration) -> Self {
        Self {
            state: SchedulerState::Idle,
            delay,
            timer,
            stats: RefreshStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self.state, SchedulerState::Scheduled(_))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    /// Record a routing change; arms the timer unless one is armed already.
    /// Returns true if the timer was armed. If arming fails the scheduler
    /// stays idle so the next request tries again.
    pub fn request(&mut self, logger: &Logger) -> bool {
        self.stats.refresh_requests += 1;
        self.stats.last_routing_change = Some(Utc::now());

        if self.is_scheduled() {
            return false;
        }

        let Some(handle) = self.timer.arm(self.delay) else {
            log_warning!(
                logger,
                Facility::Zebra,
                "could not arm RPF cache refresh timer, next routing change retries"
            );
            return false;
        };
        self.state = SchedulerState::Scheduled(handle);
        log_debug!(
            logger,
            Facility::Zebra,
            "triggering {} msec RPF cache refresh timer",
            self.delay.as_millis()
        );
        true
    }

    /// Timer expiry. Returns true if the sweep should run.
    ///
    /// # Panics
    ///
    /// If no refresh is scheduled: the event loop delivered a timer this
    /// scheduler never armed, or delivered one twice.
    fn fire(&mut self, handle: TimerHandle, logger: &Logger) -> bool {
        let SchedulerState::Scheduled(armed) = self.state else {
            panic!(
                "RPF cache refresh timer {:?} fired with no refresh scheduled",
                handle
            );
        };
        if armed != handle {
            log_warning!(
                logger,
                Facility::Zebra,
                "ignoring stale RPF cache refresh timer {:?}, armed {:?}",
                handle,
                armed
            );
            return false;
        }
        self.state = SchedulerState::Idle;
        true
    }
}

impl RoutingState {
    /// A routing change happened; schedule a debounced sweep
    pub fn request_refresh(&mut self) {
        self.scheduler.request(&self.logger);
    }

    /// The refresh timer armed by [`RoutingState::request_refresh`] fired
    pub fn on_refresh_timer(&mut self, handle: TimerHandle) {
        if self.scheduler.fire(handle, &self.logger) {
            self.refresh_now();
        }
    }

    /// Run the full sweep immediately, e.g. after a bulk topology change.
    /// Does not disturb a scheduled refresh.
    pub fn refresh_now(&mut self) {
        self.scan_upstream_rpf_cache();
        self.scan_oil();

        self.scheduler.stats.last_refresh = Some(Utc::now());
        self.scheduler.stats.refresh_events += 1;

        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        self.rp.setup_rp_state(&resolver);
    }

    /// Re-run RPF for every upstream flow and re-signal the ones that moved
    pub fn scan_upstream_rpf_cache(&mut self) {
        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);

        for flow in self.upstreams.values_mut() {
            let result = rpf::update(flow, &resolver, self.rp.as_ref(), &self.logger);
            let RpfResult::Changed {
                old_addr,
                old_interface,
            } = result
            else {
                continue;
            };
            let sg = flow.sg;

            if let Some(entry) = self.oil.get_mut(&sg) {
                if entry.needs_olist_rescan() {
                    self.joinprune.inherited_olist_decide(&sg);
                    entry.clear_olist_rescan();
                }
            }

            if flow.is_joined() {
                if let Some(entry) = self.oil.get_mut(&sg) {
                    if !entry.is_installed() {
                        if let Err(e) = entry.install(self.kernel.as_mut()) {
                            log_warning!(
                                self.logger,
                                Facility::Mroute,
                                "{}: install of joined entry failed: {}",
                                sg,
                                e
                            );
                        }
                    }
                }

                match old_interface {
                    Some(old_interface) => {
                        self.joinprune.send(&old_interface, old_addr, &sg, false)
                    }
                    None => log_debug!(
                        self.logger,
                        Facility::Pim,
                        "{}: no previous upstream neighbor to prune",
                        sg
                    ),
                }
                if let Some(interface) = &flow.rpf.interface {
                    self.joinprune.send(interface, flow.rpf.rpf_addr, &sg, true);
                }
                self.joinprune.restart_join_timer(&sg);
            }

            self.joinprune.update_join_desired(&sg);
        }
    }

    /// Reconcile every forwarding cache entry against the resolver
    pub fn scan_oil(&mut self) {
        self.scheduler.stats.last_scan_oil = Some(Utc::now());
        self.scheduler.stats.scan_oil_events += 1;

        for sg in self.oil.keys() {
            self.oil
                .clear_orphan_outputs(&sg, self.kernel.as_mut(), &self.logger);
            self.scan_individual_oil(&sg);
        }
    }

    fn scan_individual_oil(&mut self, sg: &Sg) {
        let Some(vif_source) = self.rp.resolve_upstream_source_address(sg) else {
            return;
        };

        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        let Some(entry) = self.oil.get_mut(sg) else {
            return;
        };

        let new_vif = match resolver.resolve_vif(vif_source) {
            Ok(vif) => vif,
            Err(e) => {
                log_debug!(
                    self.logger,
                    Facility::Zebra,
                    "{}: could not find input interface (vif {}): {}",
                    sg,
                    entry.input_vif(),
                    e
                );
                if let Err(e) = entry.uninstall(self.kernel.as_mut()) {
                    log_warning!(
                        self.logger,
                        Facility::Mroute,
                        "{}: failure removing entry without input interface: {}",
                        sg,
                        e
                    );
                }
                return;
            }
        };

        let old_vif = entry.input_vif();
        if new_vif == old_vif {
            if !entry.is_installed() {
                if let Err(e) = entry.install(self.kernel.as_mut()) {
                    log_warning!(
                        self.logger,
                        Facility::Mroute,
                        "{}: install failed: {}",
                        sg,
                        e
                    );
                }
            }
            return;
        }

        log_debug!(
            self.logger,
            Facility::Zebra,
            "{}: input interface changed from {} vif {} to {} vif {}",
            sg,
            self.vifs.vif_name(old_vif),
            old_vif,
            self.vifs.vif_name(new_vif),
            new_vif
        );

        if entry.is_output(new_vif) {
            // Left in place; the owning flow recomputes its olist
            entry.set_loop_detected(true);
            entry.mark_olist_rescan();
            log_warning!(
                self.logger,
                Facility::Oil,
                "{}: new input {} vif {} loops to an existing output",
                sg,
                self.vifs.vif_name(new_vif),
                new_vif
            );
        } else {
            entry.set_loop_detected(false);
        }

        entry.set_input_vif(new_vif);
        if let Err(e) = entry.install(self.kernel.as_mut()) {
            entry.set_input_vif(old_vif);
            log_warning!(
                self.logger,
                Facility::Mroute,
                "{}: failure updating input interface from {} vif {} to {} vif {}: {}",
                sg,
                self.vifs.vif_name(old_vif),
                old_vif,
                self.vifs.vif_name(new_vif),
                new_vif,
                e
            );
        } else {
            log_info!(
                self.logger,
                Facility::Mroute,
                "{}: input interface now {}",
                sg,
                self.vifs.vif_name(new_vif)
            );
        }
    }

    /// Input vif of an entry that loops back onto one of its outputs
    pub fn looped_entries(&self) -> Vec<(Sg, VifIndex)> {
        self.oil
            .iter()
            .filter(|e| e.loop_detected())
            .map(|e| (e.sg(), e.input_vif()))
            .collect()
    }
}

/// Log a summary of the refresh counters
pub fn log_stats(stats: &RefreshStats, logger: &Logger) {
    log_notice!(
        logger,
        Facility::Zebra,
        "RPF cache: {} requests, {} refreshes, {} OIL scans",
        stats.refresh_requests,
        stats.refresh_events,
        stats.scan_oil_events
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardError;
    use crate::protocols::igmp::IgmpSource;
    use crate::protocols::pim::{IfChannel, JoinState};
    use crate::protocols::signaling::Signal;
    use crate::state::testing::*;
    use crate::OifFlags;
    use std::net::Ipv4Addr;

    fn fire(h: &mut Harness) {
        let handle = h.timer.take().expect("a refresh timer is armed");
        h.state.on_refresh_timer(handle);
    }

    fn move_source_to_eth1(h: &mut Harness) {
        h.state
            .rib
            .remove(&source_route(Ipv4Addr::new(192, 168, 0, 254), 10));
        h.state
            .rib
            .add(source_route(Ipv4Addr::new(192, 168, 1, 254), 11));
    }

    #[test]
    fn test_requests_within_window_coalesce() {
        let mut h = harness();
        for _ in 0..5 {
            h.state.request_refresh();
        }
        assert_eq!(h.timer.armed_total(), 1);
        assert_eq!(h.timer.last_delay(), Some(Duration::from_millis(50)));
        assert!(h.state.scheduler.is_scheduled());

        fire(&mut h);
        assert_eq!(h.state.stats().refresh_requests, 5);
        assert_eq!(h.state.stats().refresh_events, 1);
        assert_eq!(h.state.stats().scan_oil_events, 1);
        assert!(h.state.stats().last_refresh.is_some());
        assert_eq!(h.state.scheduler.state(), SchedulerState::Idle);

        h.state.request_refresh();
        assert_eq!(h.timer.armed_total(), 2);
    }

    #[test]
    fn test_failed_arm_retries_on_next_request() {
        let mut h = harness();
        h.timer.refuse_arming(true);
        h.state.request_refresh();
        assert!(!h.state.scheduler.is_scheduled());
        assert!(h.timer.pending().is_empty());

        h.timer.refuse_arming(false);
        h.state.request_refresh();
        assert!(h.state.scheduler.is_scheduled());
        fire(&mut h);
        assert_eq!(h.state.stats().refresh_requests, 2);
        assert_eq!(h.state.stats().refresh_events, 1);
    }

    #[test]
    #[should_panic(expected = "no refresh scheduled")]
    fn test_fire_while_idle_panics() {
        let mut h = harness();
        h.state.on_refresh_timer(TimerHandle(42));
    }

    #[test]
    fn test_stale_handle_is_ignored() {
        let mut h = harness();
        h.state.request_refresh();
        h.state.on_refresh_timer(TimerHandle(999));
        assert!(h.state.scheduler.is_scheduled());
        assert_eq!(h.state.stats().refresh_events, 0);
    }

    #[test]
    fn test_rpf_change_while_joined_resignals() {
        let mut h = harness();
        h.state.add_upstream(sg()).join_state = JoinState::Joined;
        h.state
            .pim_forward_start(&IfChannel::new(sg(), "eth2"))
            .unwrap();
        h.signals.drain();

        move_source_to_eth1(&mut h);
        h.state.request_refresh();
        fire(&mut h);

        assert_eq!(
            h.signals.join_prunes(),
            vec![
                Signal::JoinPrune {
                    interface: "eth0".to_string(),
                    neighbor: Ipv4Addr::new(192, 168, 0, 254),
                    sg: sg(),
                    is_join: false,
                },
                Signal::JoinPrune {
                    interface: "eth1".to_string(),
                    neighbor: Ipv4Addr::new(192, 168, 1, 254),
                    sg: sg(),
                    is_join: true,
                },
            ]
        );
        let signals = h.signals.signals();
        assert!(signals.contains(&Signal::JoinTimerRestart(sg())));
        assert!(signals.contains(&Signal::JoinDesiredUpdate(sg())));

        let entry = h.state.entry(&sg()).unwrap();
        assert_eq!(entry.input_vif(), 2);
        assert_eq!(entry.outputs(), vec![3]);
        assert_eq!(h.kernel.entry(&sg()).unwrap().input_vif, 2);
    }

    #[test]
    fn test_rpf_change_while_not_joined_only_updates_join_desired() {
        let mut h = harness();
        h.state.add_upstream(sg());
        h.signals.drain();

        move_source_to_eth1(&mut h);
        h.state.request_refresh();
        fire(&mut h);

        assert_eq!(h.signals.signals(), vec![Signal::JoinDesiredUpdate(sg())]);
    }

    #[test]
    fn test_unchanged_rpf_sends_nothing() {
        let mut h = harness();
        h.state.add_upstream(sg()).join_state = JoinState::Joined;
        h.signals.drain();

        h.state.request_refresh();
        fire(&mut h);
        assert!(h.signals.signals().is_empty());
    }

    #[test]
    fn test_olist_rescan_flag_consumed_on_change() {
        let mut h = harness();
        h.state.add_upstream(sg());
        h.state
            .pim_forward_start(&IfChannel::new(sg(), "eth2"))
            .unwrap();
        // Refused output on the input interface raises the rescan flag
        assert!(matches!(
            h.state.pim_forward_start(&IfChannel::new(sg(), "eth0")),
            Err(ForwardError::Oil(_))
        ));
        assert!(h.state.entry(&sg()).unwrap().needs_olist_rescan());
        h.signals.drain();

        move_source_to_eth1(&mut h);
        h.state.refresh_now();

        assert!(h
            .signals
            .signals()
            .contains(&Signal::InheritedOlistDecide(sg())));
        assert!(!h.state.entry(&sg()).unwrap().needs_olist_rescan());
    }

    #[test]
    fn test_scan_oil_removes_unresolvable_entry_from_kernel() {
        let mut h = harness();
        let mut source = IgmpSource::new(SOURCE, GROUP, "eth2");
        h.state.igmp_source_forward_start(&mut source).unwrap();
        assert!(h.kernel.entry(&sg()).is_some());

        h.state
            .rib
            .remove(&source_route(Ipv4Addr::new(192, 168, 0, 254), 10));
        h.state.scan_oil();

        assert!(h.kernel.entry(&sg()).is_none());
        let entry = h.state.entry(&sg()).unwrap();
        assert!(!entry.is_installed());
        assert_eq!(entry.oif_flags(3), OifFlags::IGMP);

        // Route comes back: same input vif, not installed, so reinstall
        h.state
            .rib
            .add(source_route(Ipv4Addr::new(192, 168, 0, 254), 10));
        h.state.scan_oil();
        assert!(h.kernel.entry(&sg()).is_some());
        assert!(h.state.entry(&sg()).unwrap().is_installed());
    }

    #[test]
    fn test_scan_oil_flags_loop_without_removing_output() {
        let (logger, sink) = Logger::memory();
        let mut h = harness();
        h.state.logger = logger;

        let mut source = IgmpSource::new(SOURCE, GROUP, "eth1");
        h.state.igmp_source_forward_start(&mut source).unwrap();

        move_source_to_eth1(&mut h);
        h.state.scan_oil();

        let entry = h.state.entry(&sg()).unwrap();
        assert_eq!(entry.input_vif(), 2);
        assert!(entry.is_output(2));
        assert!(entry.loop_detected());
        assert!(entry.needs_olist_rescan());
        assert_eq!(h.state.looped_entries(), vec![(sg(), 2)]);
        assert!(sink.contains("loops to an existing output"));
    }

    #[test]
    fn test_scan_oil_kernel_failure_keeps_old_input() {
        let mut h = harness();
        let mut source = IgmpSource::new(SOURCE, GROUP, "eth2");
        h.state.igmp_source_forward_start(&mut source).unwrap();

        move_source_to_eth1(&mut h);
        h.kernel.reject_installs(true);
        h.state.scan_oil();

        assert_eq!(h.state.entry(&sg()).unwrap().input_vif(), 1);

        h.kernel.reject_installs(false);
        h.state.scan_oil();
        assert_eq!(h.state.entry(&sg()).unwrap().input_vif(), 2);
    }
}
