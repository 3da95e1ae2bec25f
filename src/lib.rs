// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Control-plane core of a PIM multicast routing daemon.
//!
//! Keeps the kernel multicast forwarding cache (MFC) in step with three
//! independent inputs: unicast routing changes, PIM join/prune state and
//! local IGMP membership. The pieces, leaves first:
//!
//! - [`vif`]: interface table and the address → vif resolver
//! - [`rpf`]: per-upstream-flow RPF selection
//! - [`oil`]: forwarding cache entries and their per-protocol output lists
//! - [`forward`]: IGMP/PIM entry points that start and stop forwarding
//! - [`refresh`]: debounced RPF cache refresh and MFC reconciliation
//! - [`zebra`]: interface, address and route change handling
//!
//! All mutable state lives in [`state::RoutingState`], driven from a single
//! event loop in [`supervisor`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub mod config;
pub mod forward;
pub mod logging;
pub mod mroute;
pub mod oil;
pub mod protocols;
pub mod refresh;
pub mod rpf;
pub mod state;
pub mod supervisor;
pub mod vif;
pub mod zebra;

/// Number of virtual interfaces supported by the kernel (MAXVIFS in mroute.h)
pub const MAXVIFS: usize = 32;

/// Kernel virtual interface index
pub type VifIndex = usize;

/// Vif 0 is reserved for the PIM register interface and is never handed
/// out to a physical interface, so a resolved input vif is always >= 1.
pub const REGISTER_VIF: VifIndex = 0;

/// Minimum TTL a packet needs to be replicated onto an output vif
pub const MIN_OUTPUT_TTL: u8 = 1;

/// Default debounce delay for the RPF cache refresh, in milliseconds
pub const DEFAULT_RPF_REFRESH_DELAY_MS: u64 = 50;

/// A multicast flow key.
///
/// A source of `0.0.0.0` denotes the any-source (*,G) flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sg {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
}

impl Sg {
    pub const fn new(source: Ipv4Addr, group: Ipv4Addr) -> Self {
        Self { source, group }
    }

    /// The (*,G) key for a group
    pub const fn wildcard(group: Ipv4Addr) -> Self {
        Self {
            source: Ipv4Addr::UNSPECIFIED,
            group,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.source.is_unspecified()
    }
}

impl fmt::Display for Sg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "(*,{})", self.group)
        } else {
            write!(f, "({},{})", self.source, self.group)
        }
    }
}

bitflags! {
    /// Protocols that want a vif as an output of a forwarding cache entry.
    ///
    /// A vif is an active output exactly when at least one bit is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OifFlags: u8 {
        /// Local receiver learned through IGMP
        const IGMP = 0x01;
        /// Downstream PIM join
        const PIM = 0x02;
        /// Operator-configured output
        const STATIC = 0x04;
        /// Anything else (e.g. MSDP, source-active state)
        const OTHER = 0x08;
    }
}

impl OifFlags {
    /// Any protocol at all
    pub const PROTO_ANY: OifFlags = OifFlags::all();

    /// Short name used in log messages
    pub fn protocol_name(self) -> &'static str {
        if self == OifFlags::IGMP {
            "igmp"
        } else if self == OifFlags::PIM {
            "pim"
        } else if self == OifFlags::STATIC {
            "static"
        } else if self == OifFlags::OTHER {
            "other"
        } else if self.is_empty() {
            "none"
        } else {
            "mixed"
        }
    }
}
