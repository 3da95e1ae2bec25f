// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Property-Based Tests: RPF cache refresh debouncing
//!
//! Bursts of routing-change notifications separated by timer expiries must
//! produce one sweep per burst, never more and never fewer.

#[cfg(test)]
mod tests {
    use pim_mfc::logging::Logger;
    use pim_mfc::mroute::MemoryMfc;
    use pim_mfc::protocols::rp::StaticRp;
    use pim_mfc::protocols::signaling::SignalRecorder;
    use pim_mfc::refresh::ManualTimer;
    use pim_mfc::state::{Collaborators, RoutingState};
    use proptest::prelude::*;

    fn state() -> (RoutingState, ManualTimer) {
        let logger = Logger::null();
        let timer = ManualTimer::new();
        let signals = SignalRecorder::new(logger.clone());
        let collaborators = Collaborators {
            kernel: Box::new(MemoryMfc::new()),
            timer: Box::new(timer.clone()),
            rp: Box::new(StaticRp::new(logger.clone())),
            joinprune: Box::new(signals.clone()),
            membership: Box::new(signals),
        };
        (RoutingState::new(collaborators, logger), timer)
    }

    proptest! {
        /// **Property:** N requests inside one window run exactly one sweep.
        #[test]
        fn test_requests_in_window_run_one_sweep(bursts in prop::collection::vec(1usize..40, 1..8)) {
            let (mut state, timer) = state();

            for (i, requests) in bursts.iter().enumerate() {
                for _ in 0..*requests {
                    state.request_refresh();
                }
                prop_assert_eq!(timer.pending().len(), 1);

                let handle = timer.take().unwrap();
                state.on_refresh_timer(handle);
                prop_assert_eq!(state.stats().refresh_events as usize, i + 1);
                prop_assert!(!state.scheduler.is_scheduled());
            }

            let total: usize = bursts.iter().sum();
            prop_assert_eq!(state.stats().refresh_requests as usize, total);
            prop_assert_eq!(timer.armed_total(), bursts.len());
        }
    }
}
