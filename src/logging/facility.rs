// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facility {
    /// Event loop, startup and shutdown
    Supervisor = 0,
    /// Interface, address and route change feed
    Zebra = 1,
    /// RPF tracking and the refresh scheduler
    Rpf = 2,
    /// Outgoing interface list bookkeeping
    Oil = 3,
    /// Kernel multicast forwarding cache calls
    Mroute = 4,
    /// IGMP-driven forwarding requests
    Igmp = 5,
    /// PIM-driven forwarding requests
    Pim = 6,
    /// Configuration loading
    Config = 7,
    /// Test harness and fixtures
    Test = 12,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    pub const ALL: [Facility; 9] = [
        Facility::Supervisor,
        Facility::Zebra,
        Facility::Rpf,
        Facility::Oil,
        Facility::Mroute,
        Facility::Igmp,
        Facility::Pim,
        Facility::Config,
        Facility::Test,
    ];

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Supervisor => "Supervisor",
            Facility::Zebra => "Zebra",
            Facility::Rpf => "Rpf",
            Facility::Oil => "Oil",
            Facility::Mroute => "Mroute",
            Facility::Igmp => "Igmp",
            Facility::Pim => "Pim",
            Facility::Config => "Config",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }
}

impl FromStr for Facility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Facility::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown facility '{}'", s))
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
