// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Routing changes flowing through the debounced RPF cache refresh

use super::common::*;
use pim_mfc::protocols::igmp::IgmpSource;
use pim_mfc::protocols::pim::{IfChannel, JoinState};
use pim_mfc::protocols::signaling::Signal;
use pim_mfc::protocols::rib::Route;
use pim_mfc::vif::IfAddr;
use pim_mfc::zebra::ZebraEvent;
use std::net::Ipv4Addr;

#[test]
fn test_rpf_move_while_joined_resignals_and_moves_input() {
    let mut r = router();
    r.state.add_upstream(sg()).join_state = JoinState::Joined;
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();
    r.signals.drain();

    r.move_source_to_eth1();

    assert_eq!(
        r.signals.join_prunes(),
        vec![
            Signal::JoinPrune {
                interface: "eth0".to_string(),
                neighbor: UPSTREAM0,
                sg: sg(),
                is_join: false,
            },
            Signal::JoinPrune {
                interface: "eth1".to_string(),
                neighbor: UPSTREAM1,
                sg: sg(),
                is_join: true,
            },
        ]
    );
    assert!(r.signals.signals().contains(&Signal::JoinTimerRestart(sg())));

    let flow = r.state.upstream(&sg()).unwrap();
    assert_eq!(flow.rpf.interface.as_deref(), Some("eth1"));
    assert_eq!(flow.rpf.rpf_addr, UPSTREAM1);

    let entry = r.state.entry(&sg()).unwrap();
    assert_eq!(entry.input_vif(), ETH1_VIF);
    assert_eq!(entry.outputs(), vec![ETH2_VIF]);
    assert_eq!(r.kernel.entry(&sg()).unwrap().input_vif, ETH1_VIF);
}

#[test]
fn test_route_changes_in_one_window_run_one_sweep() {
    let mut r = router();
    let before = r.state.stats().refresh_events;
    let armed = r.timer.armed_total();

    for n in 0..5u8 {
        r.state.handle_zebra_event(ZebraEvent::RouteAdd(Route::new(
            format!("172.16.{}.0/24", n).parse().unwrap(),
            UPSTREAM0,
            10,
            pim_mfc::protocols::rib::RouteOrigin::Kernel,
        )));
    }
    assert_eq!(r.timer.armed_total(), armed + 1);

    r.settle();
    assert_eq!(r.state.stats().refresh_events, before + 1);
    assert!(!r.state.scheduler.is_scheduled());
}

#[test]
fn test_source_becoming_unreachable_pulls_entry_from_kernel() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();
    assert!(r.kernel.entry(&sg()).is_some());

    r.state
        .handle_zebra_event(ZebraEvent::RouteDelete(source_route(UPSTREAM0, 10)));
    r.settle();

    assert!(r.kernel.entry(&sg()).is_none());
    // Outputs are kept so forwarding resumes once a route returns
    let entry = r.state.entry(&sg()).unwrap();
    assert!(!entry.is_installed());
    assert_eq!(entry.outputs(), vec![ETH2_VIF]);

    r.state
        .handle_zebra_event(ZebraEvent::RouteAdd(source_route(UPSTREAM1, 11)));
    r.settle();
    let installed = r.kernel.entry(&sg()).unwrap();
    assert_eq!(installed.input_vif, ETH1_VIF);
    assert_eq!(installed.outputs(), vec![ETH2_VIF]);
}

#[test]
fn test_rpf_moving_onto_an_output_is_flagged() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth1"))
        .unwrap();

    r.move_source_to_eth1();

    let entry = r.state.entry(&sg()).unwrap();
    assert!(entry.loop_detected());
    assert!(entry.is_output(ETH1_VIF));
    assert_eq!(r.state.looped_entries(), vec![(sg(), ETH1_VIF)]);
    assert!(r.log.contains("loop"));
}

#[test]
fn test_interface_down_tears_down_its_vif() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();

    let mut down = interface(2);
    down.flags.running = false;
    r.state.handle_zebra_event(ZebraEvent::InterfaceDown(down));
    r.settle();

    assert_eq!(r.state.vifs.vif_of("eth2"), None);
    assert!(r
        .signals
        .signals()
        .contains(&Signal::ChannelsDeleted {
            interface: "eth2".to_string()
        }));
    assert!(!r
        .kernel
        .vifs()
        .iter()
        .any(|(vif, _)| *vif == ETH2_VIF));

    // The address comes back with the link
    r.state.handle_zebra_event(ZebraEvent::InterfaceUp(interface(2)));
    assert!(r.state.vifs.vif_of("eth2").is_some());
    assert_eq!(
        r.state.interface("eth2").unwrap().primary_address(),
        Some(Ipv4Addr::new(192, 168, 2, 1))
    );
}

#[test]
fn test_interface_down_withdraws_its_outputs() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth1"))
        .unwrap();
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();

    let mut down = interface(2);
    down.flags.running = false;
    r.state.handle_zebra_event(ZebraEvent::InterfaceDown(down));

    let entry = r.state.entry(&sg()).unwrap();
    assert_eq!(entry.outputs(), vec![ETH1_VIF]);
    assert!(entry.oif_flags(ETH2_VIF).is_empty());
    assert!(entry.is_consistent());
    assert_eq!(r.kernel.entry(&sg()).unwrap().outputs(), vec![ETH1_VIF]);
    assert_eq!(
        r.state.pim_forward_stop(&IfChannel::new(sg(), "eth2")),
        None
    );
}

#[test]
fn test_reused_vif_does_not_inherit_outputs() {
    let mut r = router();
    let mut source = IgmpSource::new(SOURCE, GROUP, "eth2");
    r.state.igmp_source_forward_start(&mut source).unwrap();
    assert_eq!(r.kernel.entry(&sg()).unwrap().outputs(), vec![ETH2_VIF]);

    let mut down = interface(2);
    down.flags.running = false;
    r.state.handle_zebra_event(ZebraEvent::InterfaceDown(down));
    // The only output went with the vif
    assert!(r.state.entry(&sg()).is_none());
    assert!(r.kernel.entry(&sg()).is_none());

    r.state.igmp_source_forward_stop(&mut source).unwrap();
    assert!(!source.is_forwarding());

    let eth3 = interface(3);
    r.state.enable_interface(&eth3.name, true, true);
    r.state
        .handle_zebra_event(ZebraEvent::InterfaceAdd(eth3.clone()));
    r.state.handle_zebra_event(ZebraEvent::AddressAdd {
        interface: eth3.name.clone(),
        addr: IfAddr::primary(Ipv4Addr::new(192, 168, 3, 1), 24),
    });
    r.settle();

    assert_eq!(r.state.vifs.vif_of("eth3"), Some(ETH2_VIF));
    assert!(r.state.entry(&sg()).is_none());
    assert!(r.kernel.entry(&sg()).is_none());
}
