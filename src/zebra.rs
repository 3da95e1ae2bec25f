// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Interface, address and route change handling.
//!
//! The supervisor turns netlink notifications and interface snapshots into
//! [`ZebraEvent`]s. Each event updates the interface table or the routing
//! mirror, (de)activates vifs, and schedules an RPF cache refresh when the
//! change can move an RPF interface.

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::logging::{Facility, Logger};
use crate::protocols::rib::{Route, RouteOrigin};
use crate::state::RoutingState;
use crate::vif::{IfAddr, LinkFlags, VifError, VifResolver};
use crate::{log_debug, log_info, log_warning};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub ifindex: u32,
    pub flags: LinkFlags,
}

impl InterfaceInfo {
    pub fn new(name: &str, ifindex: u32, flags: LinkFlags) -> Self {
        Self {
            name: name.to_string(),
            ifindex,
            flags,
        }
    }

    pub fn is_operative(&self) -> bool {
        self.flags.up && self.flags.running
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ZebraEvent {
    RouterId(Ipv4Addr),
    InterfaceAdd(InterfaceInfo),
    InterfaceDelete(InterfaceInfo),
    InterfaceUp(InterfaceInfo),
    InterfaceDown(InterfaceInfo),
    AddressAdd { interface: String, addr: IfAddr },
    AddressDelete { interface: String, addr: IfAddr },
    RouteAdd(Route),
    RouteDelete(Route),
}

fn log_interface(logger: &Logger, event: &str, info: &InterfaceInfo) {
    log_debug!(
        logger,
        Facility::Zebra,
        "{}: {} index {} flags {:?} operative {}",
        event,
        info.name,
        info.ifindex,
        info.flags,
        info.is_operative()
    );
}

impl RoutingState {
    pub fn handle_zebra_event(&mut self, event: ZebraEvent) {
        match event {
            ZebraEvent::RouterId(id) => self.router_id_update(id),
            ZebraEvent::InterfaceAdd(info) => self.interface_add(&info),
            ZebraEvent::InterfaceDelete(info) => self.interface_delete(&info),
            ZebraEvent::InterfaceUp(info) => self.interface_up(&info),
            ZebraEvent::InterfaceDown(info) => self.interface_down(&info),
            ZebraEvent::AddressAdd { interface, addr } => self.address_add(&interface, addr),
            ZebraEvent::AddressDelete { interface, addr } => self.address_delete(&interface, addr),
            ZebraEvent::RouteAdd(route) => self.route_add(route),
            ZebraEvent::RouteDelete(route) => self.route_delete(&route),
        }
    }

    fn router_id_update(&mut self, id: Ipv4Addr) {
        if self.router_id != Some(id) {
            log_info!(self.logger, Facility::Zebra, "router id is now {}", id);
            self.router_id = Some(id);
        }
    }

    /// Register or refresh an interface. Multicast routing settings and
    /// static routes configured for it are applied here.
    fn upsert_interface(&mut self, info: &InterfaceInfo) {
        let known = self.vifs.get(&info.name).is_some();
        let iface = self.vifs.upsert(&info.name, info.ifindex, info.flags);
        if let Some((pim, igmp)) = self.enabled.get(&info.name) {
            iface.pim_enabled = *pim;
            iface.igmp_enabled = *igmp;
        }
        if known {
            return;
        }

        for route in self.static_routes.iter().filter(|r| r.interface == info.name) {
            self.rib.add(Route::new(
                route.prefix,
                route.nexthop.unwrap_or(Ipv4Addr::UNSPECIFIED),
                info.ifindex,
                RouteOrigin::Static,
            ));
        }
    }

    fn interface_add(&mut self, info: &InterfaceInfo) {
        log_interface(&self.logger, "interface add", info);
        self.upsert_interface(info);
        if info.is_operative() {
            self.addr_add_all(&info.name);
        }
    }

    fn interface_delete(&mut self, info: &InterfaceInfo) {
        log_interface(&self.logger, "interface delete", info);
        if self.vifs.get(&info.name).is_none() {
            return;
        }
        if info.is_operative() {
            return;
        }
        self.addr_del_all(&info.name);
        let removed = self.rib.remove_interface(info.ifindex);
        self.vifs.remove(&info.name);
        log_info!(
            self.logger,
            Facility::Zebra,
            "interface {} removed with {} routes",
            info.name,
            removed
        );
    }

    fn interface_up(&mut self, info: &InterfaceInfo) {
        log_interface(&self.logger, "interface up", info);
        self.upsert_interface(info);
        if info.is_operative() {
            self.addr_add_all(&info.name);
        }
    }

    fn interface_down(&mut self, info: &InterfaceInfo) {
        log_interface(&self.logger, "interface down", info);
        self.upsert_interface(info);
        if !info.is_operative() {
            self.membership.delete_all_channels(&info.name);
            self.addr_del_all(&info.name);
        }
        self.release_vif(&info.name);
    }

    /// Bring every address of an interface into service: connected routes,
    /// and a vif if multicast routing is enabled on it
    pub fn addr_add_all(&mut self, name: &str) {
        let Some(iface) = self.vifs.get(name) else {
            return;
        };
        let ifindex = iface.ifindex;
        let connected: Vec<Route> = iface
            .addresses
            .iter()
            .filter_map(|a| Route::connected(a.addr, a.prefix_len, ifindex))
            .collect();
        for route in connected {
            self.rib.add(route);
        }
        self.try_activate(name);
        self.request_refresh();
    }

    /// Take an interface's addresses out of service and release its vif.
    /// The address records are kept for when the interface comes back.
    pub fn addr_del_all(&mut self, name: &str) {
        let Some(iface) = self.vifs.get(name) else {
            return;
        };
        let ifindex = iface.ifindex;
        let connected: Vec<Route> = iface
            .addresses
            .iter()
            .filter_map(|a| Route::connected(a.addr, a.prefix_len, ifindex))
            .collect();
        for route in &connected {
            self.rib.remove(route);
        }
        self.release_vif(name);

        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        self.rp.setup_rp_state(&resolver);
        self.rp.reevaluate_local_rp_role(&self.vifs);
        self.request_refresh();
    }

    /// Release an interface's vif and take it out of every output list,
    /// so a vif index reused by another interface starts clean
    fn release_vif(&mut self, name: &str) {
        let Some(vif) = self.vifs.deactivate(name, self.kernel.as_mut(), &self.logger) else {
            return;
        };
        let touched = self.oil.remove_vif(vif, self.kernel.as_mut(), &self.logger);
        if touched > 0 {
            log_info!(
                self.logger,
                Facility::Zebra,
                "{}: vif {} removed from {} forwarding cache entries",
                name,
                vif,
                touched
            );
        }
    }

    /// Activate the vif of an operative interface; returns true if a vif
    /// was newly created
    fn try_activate(&mut self, name: &str) -> bool {
        let Some(iface) = self.vifs.get(name) else {
            return false;
        };
        if !iface.is_operative() || iface.vif().is_some() {
            return false;
        }
        match self.vifs.activate(name, self.kernel.as_mut(), &self.logger) {
            Ok(_) => true,
            Err(VifError::MulticastDisabled(_)) | Err(VifError::NoPrimaryAddress(_)) => false,
            Err(e) => {
                log_warning!(
                    self.logger,
                    Facility::Zebra,
                    "could not activate vif on {}: {}",
                    name,
                    e
                );
                false
            }
        }
    }

    fn address_add(&mut self, name: &str, mut addr: IfAddr) {
        let Some(iface) = self.vifs.get_mut(name) else {
            log_debug!(
                self.logger,
                Facility::Zebra,
                "address {} on unknown interface {}",
                addr.addr,
                name
            );
            return;
        };
        log_debug!(
            self.logger,
            Facility::Zebra,
            "{} connected IP address {}/{} {}",
            name,
            addr.addr,
            addr.prefix_len,
            if addr.secondary { "secondary" } else { "primary" }
        );

        let old_primary = iface.primary_address();
        if !addr.secondary {
            if let Some(primary) = old_primary {
                if primary != addr.addr {
                    log_warning!(
                        self.logger,
                        Facility::Zebra,
                        "{}: forcing secondary flag on {}/{}",
                        name,
                        addr.addr,
                        addr.prefix_len
                    );
                    addr.secondary = true;
                }
            }
        }

        match iface.addresses.iter_mut().find(|a| a.addr == addr.addr) {
            Some(existing) => *existing = addr,
            None => iface.addresses.push(addr),
        }
        let operative = iface.is_operative();
        let loopback = iface.flags.loopback;
        let ifindex = iface.ifindex;
        let primary_changed = iface.primary_address() != old_primary;

        if operative {
            if let Some(route) = Route::connected(addr.addr, addr.prefix_len, ifindex) {
                self.rib.add(route);
            }
        }
        let activated = self.try_activate(name);

        if let Some(iface) = self.vifs.get(name) {
            if iface.multicast_enabled() {
                self.rp.notify_rp_added(iface);
            }
        }

        if loopback {
            let others: Vec<String> = self
                .vifs
                .iter()
                .filter(|i| !i.flags.loopback && i.is_operative())
                .map(|i| i.name.clone())
                .collect();
            for other in others {
                self.addr_add_all(&other);
            }
        }

        if primary_changed || activated {
            self.request_refresh();
        }
    }

    fn address_delete(&mut self, name: &str, addr: IfAddr) {
        let Some(iface) = self.vifs.get_mut(name) else {
            return;
        };
        log_debug!(
            self.logger,
            Facility::Zebra,
            "{} disconnected IP address {}/{}",
            name,
            addr.addr,
            addr.prefix_len
        );

        iface.addresses.retain(|a| a.addr != addr.addr);
        let ifindex = iface.ifindex;
        let lost_primary = iface.primary_address().is_none();

        if let Some(route) = Route::connected(addr.addr, addr.prefix_len, ifindex) {
            self.rib.remove(&route);
        }
        if lost_primary {
            self.release_vif(name);
        }

        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        self.rp.setup_rp_state(&resolver);
        self.rp.reevaluate_local_rp_role(&self.vifs);
        self.request_refresh();
    }

    fn route_add(&mut self, route: Route) {
        log_debug!(
            self.logger,
            Facility::Zebra,
            "route add {} via {} ifindex {}",
            route.prefix,
            route.nexthop,
            route.ifindex
        );
        self.rib.add(route);
        self.request_refresh();
        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        self.rp.setup_rp_state(&resolver);
    }

    fn route_delete(&mut self, route: &Route) {
        log_debug!(
            self.logger,
            Facility::Zebra,
            "route delete {} via {} ifindex {}",
            route.prefix,
            route.nexthop,
            route.ifindex
        );
        if !self.rib.remove(route) {
            return;
        }
        self.request_refresh();
        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        self.rp.setup_rp_state(&resolver);
    }
}
