// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Interfaces, kernel vifs and the address → vif resolver.
//!
//! Every interface the daemon knows about is tracked here with its link
//! flags and IPv4 addresses. Interfaces with multicast routing enabled get
//! a kernel vif once they are operative and have a primary address; vifs
//! are allocated lowest-free-first starting at 1.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::logging::{Facility, Logger};
use crate::mroute::{KernelError, MfcKernel};
use crate::protocols::NexthopLookup;
use crate::{log_debug, log_info, log_warning};
use crate::{VifIndex, MAXVIFS, REGISTER_VIF};

/// Linux interface flags (from if.h)
pub mod interface_flags {
    pub const IFF_UP: u32 = 0x1;
    pub const IFF_LOOPBACK: u32 = 0x8;
    pub const IFF_RUNNING: u32 = 0x40;
    pub const IFF_MULTICAST: u32 = 0x1000;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkFlags {
    pub up: bool,
    pub running: bool,
    pub loopback: bool,
    pub multicast: bool,
}

impl LinkFlags {
    pub fn from_raw(flags: u32) -> Self {
        use interface_flags::*;
        Self {
            up: flags & IFF_UP != 0,
            running: flags & IFF_RUNNING != 0,
            loopback: flags & IFF_LOOPBACK != 0,
            multicast: flags & IFF_MULTICAST != 0,
        }
    }

    /// Flags of an operative multicast-capable interface
    pub fn operative() -> Self {
        Self {
            up: true,
            running: true,
            loopback: false,
            multicast: true,
        }
    }

    pub fn is_operative(&self) -> bool {
        self.up && self.running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IfAddr {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
    pub secondary: bool,
}

impl IfAddr {
    pub fn primary(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            addr,
            prefix_len,
            secondary: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Interface {
    pub name: String,
    pub ifindex: u32,
    pub flags: LinkFlags,
    pub addresses: Vec<IfAddr>,
    pub pim_enabled: bool,
    pub igmp_enabled: bool,
    vif: Option<VifIndex>,
}

impl Interface {
    pub fn new(name: &str, ifindex: u32, flags: LinkFlags) -> Self {
        Self {
            name: name.to_string(),
            ifindex,
            flags,
            addresses: Vec::new(),
            pim_enabled: false,
            igmp_enabled: false,
            vif: None,
        }
    }

    /// Up and running
    pub fn is_operative(&self) -> bool {
        self.flags.up && self.flags.running
    }

    pub fn multicast_enabled(&self) -> bool {
        self.pim_enabled || self.igmp_enabled
    }

    /// First non-secondary address
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.addresses
            .iter()
            .find(|a| !a.secondary)
            .map(|a| a.addr)
    }

    pub fn vif(&self) -> Option<VifIndex> {
        self.vif
    }
}

#[derive(Debug, Error)]
pub enum VifError {
    #[error("unknown interface {0}")]
    UnknownInterface(String),

    #[error("multicast routing not enabled on {0}")]
    MulticastDisabled(String),

    #[error("interface {0} has no primary address")]
    NoPrimaryAddress(String),

    #[error("no free vif for {0}")]
    NoFreeVif(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Interface table with the vif ↔ interface mapping
#[derive(Debug, Clone)]
pub struct VifTable {
    interfaces: BTreeMap<String, Interface>,
    /// Interface name owning each vif
    vifs: Vec<Option<String>>,
}

impl Default for VifTable {
    fn default() -> Self {
        Self {
            interfaces: BTreeMap::new(),
            vifs: vec![None; MAXVIFS],
        }
    }
}

impl VifTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interface or refresh its index and flags
    pub fn upsert(&mut self, name: &str, ifindex: u32, flags: LinkFlags) -> &mut Interface {
        let iface = self
            .interfaces
            .entry(name.to_string())
            .or_insert_with(|| Interface::new(name, ifindex, flags));
        iface.ifindex = ifindex;
        iface.flags = flags;
        iface
    }

    /// Forget an interface. Its vif must already be released.
    pub fn remove(&mut self, name: &str) -> Option<Interface> {
        self.interfaces.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Interface> {
        self.interfaces.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.interfaces.keys().cloned().collect()
    }

    pub fn by_ifindex(&self, ifindex: u32) -> Option<&Interface> {
        self.interfaces.values().find(|i| i.ifindex == ifindex)
    }

    pub fn vif_for_ifindex(&self, ifindex: u32) -> Option<VifIndex> {
        self.by_ifindex(ifindex).and_then(|i| i.vif)
    }

    pub fn vif_of(&self, name: &str) -> Option<VifIndex> {
        self.interfaces.get(name).and_then(|i| i.vif)
    }

    pub fn interface_for_vif(&self, vif: VifIndex) -> Option<&Interface> {
        self.vifs
            .get(vif)
            .and_then(|owner| owner.as_deref())
            .and_then(|name| self.interfaces.get(name))
    }

    /// Interface name for log messages
    pub fn vif_name(&self, vif: VifIndex) -> String {
        self.interface_for_vif(vif)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| format!("<vif {}>", vif))
    }

    /// Enable or disable multicast routing on an interface
    pub fn set_multicast(&mut self, name: &str, pim: bool, igmp: bool) -> Result<(), VifError> {
        let iface = self
            .interfaces
            .get_mut(name)
            .ok_or_else(|| VifError::UnknownInterface(name.to_string()))?;
        iface.pim_enabled = pim;
        iface.igmp_enabled = igmp;
        Ok(())
    }

    fn free_vif(&self) -> Option<VifIndex> {
        (REGISTER_VIF + 1..MAXVIFS).find(|v| self.vifs[*v].is_none())
    }

    /// Create the kernel vif for an interface if it has none yet
    pub fn activate(
        &mut self,
        name: &str,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> Result<VifIndex, VifError> {
        let iface = self
            .interfaces
            .get(name)
            .ok_or_else(|| VifError::UnknownInterface(name.to_string()))?;
        if let Some(vif) = iface.vif {
            return Ok(vif);
        }
        if !iface.multicast_enabled() {
            return Err(VifError::MulticastDisabled(name.to_string()));
        }
        let local = iface
            .primary_address()
            .ok_or_else(|| VifError::NoPrimaryAddress(name.to_string()))?;
        let ifindex = iface.ifindex;
        let vif = self
            .free_vif()
            .ok_or_else(|| VifError::NoFreeVif(name.to_string()))?;

        kernel.add_vif(vif, ifindex, local)?;

        self.vifs[vif] = Some(name.to_string());
        if let Some(iface) = self.interfaces.get_mut(name) {
            iface.vif = Some(vif);
        }
        log_info!(
            logger,
            Facility::Mroute,
            "vif {} activated on {} (ifindex {}, {})",
            vif,
            name,
            ifindex,
            local
        );
        Ok(vif)
    }

    /// Release the kernel vif of an interface, if any.
    ///
    /// A kernel failure is logged; the vif is freed regardless.
    pub fn deactivate(
        &mut self,
        name: &str,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> Option<VifIndex> {
        let vif = self.interfaces.get_mut(name)?.vif.take()?;
        self.vifs[vif] = None;
        match kernel.del_vif(vif) {
            Ok(()) => log_info!(logger, Facility::Mroute, "vif {} on {} released", vif, name),
            Err(e) => log_warning!(
                logger,
                Facility::Mroute,
                "vif {} on {} released, kernel delete failed: {}",
                vif,
                name,
                e
            ),
        }
        Some(vif)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),

    #[error("nexthop ifindex {ifindex} for {addr} is not a known interface")]
    UnknownInterface { addr: Ipv4Addr, ifindex: u32 },

    #[error("no vif on {interface} (nexthop interface for {addr})")]
    NoVif { addr: Ipv4Addr, interface: String },
}

/// Where traffic from an address would arrive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nexthop {
    pub interface: String,
    pub ifindex: u32,
    pub vif: VifIndex,
    /// Upstream neighbor; the address itself when directly connected
    pub rpf_addr: Ipv4Addr,
}

/// Maps an address to the vif used to reach it.
///
/// Stateless: borrows the interface table and the routing lookup for the
/// duration of a lookup. Only the first nexthop of an ECMP route is used.
pub struct VifResolver<'a> {
    vifs: &'a VifTable,
    routes: &'a dyn NexthopLookup,
    logger: &'a Logger,
}

impl<'a> VifResolver<'a> {
    pub fn new(vifs: &'a VifTable, routes: &'a dyn NexthopLookup, logger: &'a Logger) -> Self {
        Self {
            vifs,
            routes,
            logger,
        }
    }

    pub fn resolve_nexthop(&self, addr: Ipv4Addr) -> Result<Nexthop, ResolveError> {
        let candidates = self.routes.lookup_nexthops(addr);
        let Some(&(gateway, ifindex)) = candidates.first() else {
            log_debug!(
                self.logger,
                Facility::Rpf,
                "could not find nexthop ifindex for address {}",
                addr
            );
            return Err(ResolveError::NoRoute(addr));
        };

        if candidates.len() > 1 {
            log_debug!(
                self.logger,
                Facility::Rpf,
                "ignoring {} nexthops for {}, using only ifindex {}",
                candidates.len(),
                addr,
                ifindex
            );
        }

        let Some(iface) = self.vifs.by_ifindex(ifindex) else {
            log_debug!(
                self.logger,
                Facility::Rpf,
                "nexthop ifindex {} for {} is not a known interface",
                ifindex,
                addr
            );
            return Err(ResolveError::UnknownInterface { addr, ifindex });
        };

        let Some(vif) = iface.vif() else {
            log_debug!(
                self.logger,
                Facility::Rpf,
                "nexthop interface {} for {} has no vif",
                iface.name,
                addr
            );
            return Err(ResolveError::NoVif {
                addr,
                interface: iface.name.clone(),
            });
        };

        let rpf_addr = if gateway.is_unspecified() {
            addr
        } else {
            gateway
        };

        Ok(Nexthop {
            interface: iface.name.clone(),
            ifindex,
            vif,
            rpf_addr,
        })
    }

    pub fn resolve_vif(&self, addr: Ipv4Addr) -> Result<VifIndex, ResolveError> {
        self.resolve_nexthop(addr).map(|nh| nh.vif)
    }
}
