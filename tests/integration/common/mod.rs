// SPDX-License-Identifier: Apache-2.0 OR MIT
// Integration test utilities
//
// Builds a routing state with in-memory collaborators and brings up a
// small topology through the same interface/address/route feed the
// daemon uses:
//
//   eth0 (ifindex 10, vif 1)  192.168.0.1/24, upstream 192.168.0.254
//   eth1 (ifindex 11, vif 2)  192.168.1.1/24, upstream 192.168.1.254
//   eth2 (ifindex 12, vif 3)  192.168.2.1/24, downstream receivers
//
// The source network 10.0.0.0/8 is initially reached through eth0.

#![allow(dead_code)]

use std::net::Ipv4Addr;

use pim_mfc::logging::{Logger, MemorySink};
use pim_mfc::mroute::MemoryMfc;
use pim_mfc::protocols::rib::{Route, RouteOrigin};
use pim_mfc::protocols::rp::StaticRp;
use pim_mfc::protocols::signaling::SignalRecorder;
use pim_mfc::refresh::ManualTimer;
use pim_mfc::state::{Collaborators, RoutingState};
use pim_mfc::vif::{IfAddr, LinkFlags};
use pim_mfc::zebra::{InterfaceInfo, ZebraEvent};
use pim_mfc::{Sg, VifIndex};

pub const SOURCE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 1, 1);
pub const UPSTREAM0: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 254);
pub const UPSTREAM1: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 254);

pub const ETH0_VIF: VifIndex = 1;
pub const ETH1_VIF: VifIndex = 2;
pub const ETH2_VIF: VifIndex = 3;

pub struct Router {
    pub state: RoutingState,
    pub kernel: MemoryMfc,
    pub timer: ManualTimer,
    pub signals: SignalRecorder,
    pub log: MemorySink,
}

pub fn sg() -> Sg {
    Sg::new(SOURCE, GROUP)
}

pub fn source_route(gateway: Ipv4Addr, ifindex: u32) -> Route {
    Route::new(
        "10.0.0.0/8".parse().unwrap(),
        gateway,
        ifindex,
        RouteOrigin::Kernel,
    )
}

pub fn interface(index: u8) -> InterfaceInfo {
    InterfaceInfo::new(
        &format!("eth{}", index),
        10 + u32::from(index),
        LinkFlags::operative(),
    )
}

/// A router with eth0..eth2 up and every pending refresh fired
pub fn router() -> Router {
    let (logger, log) = Logger::memory();
    let kernel = MemoryMfc::new();
    let timer = ManualTimer::new();
    let signals = SignalRecorder::new(logger.clone());
    let collaborators = Collaborators {
        kernel: Box::new(kernel.clone()),
        timer: Box::new(timer.clone()),
        rp: Box::new(StaticRp::new(logger.clone())),
        joinprune: Box::new(signals.clone()),
        membership: Box::new(signals.clone()),
    };
    let mut state = RoutingState::new(collaborators, logger);

    for index in 0..3u8 {
        let info = interface(index);
        state.enable_interface(&info.name, true, true);
        state.handle_zebra_event(ZebraEvent::InterfaceAdd(info.clone()));
        state.handle_zebra_event(ZebraEvent::AddressAdd {
            interface: info.name.clone(),
            addr: IfAddr::primary(Ipv4Addr::new(192, 168, index, 1), 24),
        });
    }
    state.handle_zebra_event(ZebraEvent::RouteAdd(source_route(UPSTREAM0, 10)));

    let mut router = Router {
        state,
        kernel,
        timer,
        signals,
        log,
    };
    router.settle();
    router.signals.drain();
    router
}

impl Router {
    /// Fire refresh timers until none is pending
    pub fn settle(&mut self) {
        while let Some(handle) = self.timer.take() {
            self.state.on_refresh_timer(handle);
        }
    }

    /// Move the source network behind eth1 and let the refresh run
    pub fn move_source_to_eth1(&mut self) {
        self.state
            .handle_zebra_event(ZebraEvent::RouteDelete(source_route(UPSTREAM0, 10)));
        self.state
            .handle_zebra_event(ZebraEvent::RouteAdd(source_route(UPSTREAM1, 11)));
        self.settle();
    }
}
