// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Unicast routing mirror used for RPF lookups.
//!
//! Holds static routes from the configuration, connected prefixes of local
//! addresses, and routes learned from the kernel. Lookup is longest-prefix
//! match; routes sharing the winning prefix are returned in insertion
//! order as ECMP candidates.

use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::net::Ipv4Addr;

use super::NexthopLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteOrigin {
    Static,
    Connected,
    Kernel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub prefix: Ipv4Network,
    /// `0.0.0.0` for directly connected prefixes
    pub nexthop: Ipv4Addr,
    pub ifindex: u32,
    pub origin: RouteOrigin,
}

impl Route {
    pub fn new(prefix: Ipv4Network, nexthop: Ipv4Addr, ifindex: u32, origin: RouteOrigin) -> Self {
        Self {
            prefix,
            nexthop,
            ifindex,
            origin,
        }
    }

    /// Connected route for an interface address
    pub fn connected(addr: Ipv4Addr, prefix_len: u8, ifindex: u32) -> Option<Self> {
        let net = Ipv4Network::new(addr, prefix_len).ok()?;
        let prefix = Ipv4Network::new(net.network(), prefix_len).ok()?;
        Some(Self::new(
            prefix,
            Ipv4Addr::UNSPECIFIED,
            ifindex,
            RouteOrigin::Connected,
        ))
    }

    fn same_path(&self, other: &Route) -> bool {
        self.prefix == other.prefix
            && self.nexthop == other.nexthop
            && self.ifindex == other.ifindex
    }
}

#[derive(Debug, Clone, Default)]
pub struct Rib {
    routes: Vec<Route>,
}

impl Rib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; returns false if the same path was already present
    pub fn add(&mut self, route: Route) -> bool {
        if let Some(existing) = self.routes.iter_mut().find(|r| r.same_path(&route)) {
            existing.origin = route.origin;
            return false;
        }
        self.routes.push(route);
        true
    }

    /// Remove a route by prefix, nexthop and ifindex
    pub fn remove(&mut self, route: &Route) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| !r.same_path(route));
        self.routes.len() != before
    }

    /// Drop every route through an interface
    pub fn remove_interface(&mut self, ifindex: u32) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| r.ifindex != ifindex);
        before - self.routes.len()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl NexthopLookup for Rib {
    fn lookup_nexthops(&self, addr: Ipv4Addr) -> Vec<(Ipv4Addr, u32)> {
        let Some(best) = self
            .routes
            .iter()
            .filter(|r| r.prefix.contains(addr))
            .map(|r| r.prefix.prefix())
            .max()
        else {
            return Vec::new();
        };

        self.routes
            .iter()
            .filter(|r| r.prefix.prefix() == best && r.prefix.contains(addr))
            .map(|r| (r.nexthop, r.ifindex))
            .collect()
    }
}
