// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Forwarding activation driven by PIM joins and IGMP membership

use super::common::*;
use pim_mfc::forward::ForwardError;
use pim_mfc::oil::{AddOutcome, DelOutcome, OilError};
use pim_mfc::protocols::igmp::{FilterMode, IgmpGroup, IgmpSource};
use pim_mfc::protocols::pim::IfChannel;
use pim_mfc::protocols::signaling::Signal;
use pim_mfc::OifFlags;

#[test]
fn test_pim_join_creates_entry_on_rpf_vif() {
    let mut r = router();
    r.state.add_upstream(sg());

    let outcome = r
        .state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();
    assert_eq!(outcome, AddOutcome::Activated);

    let entry = r.state.entry(&sg()).unwrap();
    assert_eq!(entry.input_vif(), ETH0_VIF);
    assert_eq!(entry.outputs(), vec![ETH2_VIF]);
    assert_eq!(entry.oif_flags(ETH2_VIF), OifFlags::PIM);
    assert!(entry.is_installed());
    assert_eq!(r.kernel.install_count(), 1);
    assert_eq!(r.kernel.entry(&sg()).unwrap().outputs(), vec![ETH2_VIF]);
}

#[test]
fn test_igmp_shares_pim_output_without_reinstall() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();

    let mut source = IgmpSource::new(SOURCE, GROUP, "eth2");
    r.state.igmp_source_forward_start(&mut source).unwrap();
    assert!(source.is_forwarding());

    let entry = r.state.entry(&sg()).unwrap();
    assert_eq!(entry.oif_flags(ETH2_VIF), OifFlags::PIM | OifFlags::IGMP);
    assert_eq!(entry.active_oif_count(), 1);
    assert_eq!(r.kernel.install_count(), 1);
    assert!(r.signals.signals().contains(&Signal::LocalMemberAdd {
        interface: "eth2".to_string(),
        sg: sg(),
    }));
}

#[test]
fn test_pim_leave_keeps_igmp_output() {
    let mut r = router();
    r.state.add_upstream(sg());
    let channel = IfChannel::new(sg(), "eth2");
    r.state.pim_forward_start(&channel).unwrap();
    let mut source = IgmpSource::new(SOURCE, GROUP, "eth2");
    r.state.igmp_source_forward_start(&mut source).unwrap();

    assert_eq!(
        r.state.pim_forward_stop(&channel),
        Some(DelOutcome::StillWanted)
    );
    let entry = r.state.entry(&sg()).unwrap();
    assert_eq!(entry.oif_flags(ETH2_VIF), OifFlags::IGMP);
    assert!(entry.is_output(ETH2_VIF));

    // Last interest gone: the entry leaves kernel and table
    r.state.igmp_source_forward_stop(&mut source).unwrap();
    assert!(!source.is_forwarding());
    assert!(r.state.entry(&sg()).is_none());
    assert!(r.kernel.entry(&sg()).is_none());
    assert_eq!(r.kernel.remove_count(), 1);
}

#[test]
fn test_second_stop_reports_missing_protocol() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth1"))
        .unwrap();

    let (oil, kernel, logger) = (&mut r.state.oil, r.state.kernel.as_mut(), &r.state.logger);
    assert_eq!(
        oil.del_oif(&sg(), ETH1_VIF, OifFlags::PIM, kernel, logger).unwrap(),
        DelOutcome::Deactivated
    );
    assert!(matches!(
        oil.del_oif(&sg(), ETH1_VIF, OifFlags::PIM, kernel, logger),
        Err(OilError::NotPresentForProtocol { .. })
    ));
    assert!(oil.get(&sg()).unwrap().is_consistent());
}

#[test]
fn test_join_on_input_interface_is_refused() {
    let mut r = router();
    r.state.add_upstream(sg());

    let result = r.state.pim_forward_start(&IfChannel::new(sg(), "eth0"));
    assert!(matches!(
        result,
        Err(ForwardError::Oil(OilError::Looped { .. }))
    ));
    assert!(r.state.entry(&sg()).is_none());
    assert_eq!(r.kernel.install_count(), 0);

    let mut source = IgmpSource::new(SOURCE, GROUP, "eth0");
    assert!(matches!(
        r.state.igmp_source_forward_start(&mut source),
        Err(ForwardError::Looped { .. })
    ));
    assert!(!source.is_forwarding());
}

#[test]
fn test_igmp_for_unroutable_source() {
    let mut r = router();
    let mut source = IgmpSource::new("172.16.0.1".parse().unwrap(), GROUP, "eth2");
    assert!(matches!(
        r.state.igmp_source_forward_start(&mut source),
        Err(ForwardError::NoInputInterface(_))
    ));
    assert!(r.state.oil.is_empty());
}

#[test]
fn test_anysource_without_rp_is_unresolvable() {
    let mut r = router();
    let mut group = IgmpGroup::new(GROUP, "eth2", FilterMode::Exclude);
    assert!(matches!(
        r.state.igmp_anysource_forward_start(&mut group),
        Err(ForwardError::Unresolvable(_))
    ));
    assert!(r.state.oil.is_empty());
    assert!(r.state.igmp_anysource_forward_stop(&mut group).is_ok());
}

#[test]
fn test_kernel_rejection_leaves_no_output() {
    let mut r = router();
    r.state.add_upstream(sg());
    r.kernel.reject_installs(true);

    assert!(r
        .state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .is_err());
    assert!(r.state.entry(&sg()).is_none());

    r.kernel.reject_installs(false);
    r.state
        .pim_forward_start(&IfChannel::new(sg(), "eth2"))
        .unwrap();
    assert!(r.state.entry(&sg()).unwrap().is_consistent());
}
