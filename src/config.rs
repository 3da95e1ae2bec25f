// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for pim-mfcd.
//!
//! JSON5 configuration format supporting:
//! - Interfaces with multicast routing enabled (PIM and/or IGMP)
//! - Static RP mappings and static unicast routes
//! - Refresh debounce, default output TTL and kernel backend selection
//! - Comments and trailing commas

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::logging::{Facility, Logger, Severity};
use crate::{DEFAULT_RPF_REFRESH_DELAY_MS, MAXVIFS, MIN_OUTPUT_TTL};

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Debounce delay between a routing change and the RPF cache refresh
    pub rpf_cache_refresh_delay_ms: u64,

    /// TTL threshold installed for every active output vif
    pub default_output_ttl: u8,

    /// Where forwarding cache entries are programmed
    pub kernel: KernelBackend,

    /// Global log level
    pub log_level: Severity,

    /// Per-facility log level overrides
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub facility_levels: HashMap<String, Severity>,

    /// Interfaces on which multicast routing is enabled
    pub interfaces: Vec<InterfaceConfig>,

    /// Static group-range → RP mappings
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub static_rp: Vec<StaticRpConfig>,

    /// Unicast routes seeded into the routing lookup
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub static_routes: Vec<StaticRouteConfig>,

    /// Period of the full interface re-synchronisation
    pub interface_resync_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpf_cache_refresh_delay_ms: DEFAULT_RPF_REFRESH_DELAY_MS,
            default_output_ttl: MIN_OUTPUT_TTL,
            kernel: KernelBackend::Linux,
            log_level: Severity::Info,
            facility_levels: HashMap::new(),
            interfaces: Vec::new(),
            static_rp: Vec::new(),
            static_routes: Vec::new(),
            interface_resync_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KernelBackend {
    /// Program the kernel MFC through the multicast routing socket
    #[default]
    Linux,
    /// Keep forwarding cache entries in process only
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub pim: bool,
    #[serde(default)]
    pub igmp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticRpConfig {
    /// Multicast group range served by this RP
    pub group: Ipv4Network,
    pub rp: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticRouteConfig {
    pub prefix: Ipv4Network,
    /// Gateway; absent for a directly connected prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexthop: Option<Ipv4Addr>,
    pub interface: String,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration with pretty formatting
    pub fn to_json5(&self) -> String {
        // json5 has no pretty printer; its syntax is a superset of JSON
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_output_ttl == 0 {
            return Err(ConfigError::InvalidTtl);
        }

        let mut seen = HashSet::new();
        for iface in &self.interfaces {
            validate_interface_name(&iface.name)?;
            if !seen.insert(iface.name.as_str()) {
                return Err(ConfigError::DuplicateInterface(iface.name.clone()));
            }
        }

        // vif 0 is the register vif
        let available = MAXVIFS - 1;
        let enabled = self.interfaces.iter().filter(|i| i.pim || i.igmp).count();
        if enabled > available {
            return Err(ConfigError::TooManyInterfaces {
                configured: enabled,
                available,
            });
        }

        for rp in &self.static_rp {
            if !rp.group.network().is_multicast() || rp.group.prefix() < 4 {
                return Err(ConfigError::InvalidRpGroup(rp.group));
            }
        }

        for route in &self.static_routes {
            validate_interface_name(&route.interface)?;
        }

        for facility in self.facility_levels.keys() {
            facility
                .parse::<Facility>()
                .map_err(|_| ConfigError::UnknownFacility(facility.clone()))?;
        }

        Ok(())
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.rpf_cache_refresh_delay_ms)
    }

    /// Apply the configured levels to a logger
    pub fn apply_log_levels(&self, logger: &Logger) {
        logger.set_global_level(self.log_level);
        for (name, level) in &self.facility_levels {
            if let Ok(facility) = name.parse::<Facility>() {
                logger.set_facility_level(facility, *level);
            }
        }
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// Validate an interface name
fn validate_interface_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidInterfaceName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("interface name cannot be empty"));
    }
    if name.len() > 15 {
        // Linux IFNAMSIZ limit
        return Err(invalid("interface name too long (max 15 chars)"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid("interface name contains invalid characters"));
    }
    if name.chars().next().map(|c| c.is_ascii_digit()) == Some(true) {
        return Err(invalid("interface name cannot start with a digit"));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid interface name '{name}': {reason}")]
    InvalidInterfaceName { name: String, reason: String },

    #[error("interface '{0}' configured more than once")]
    DuplicateInterface(String),

    #[error("{configured} multicast interfaces configured but only {available} vifs available")]
    TooManyInterfaces { configured: usize, available: usize },

    #[error("static RP group range {0} is not a multicast prefix")]
    InvalidRpGroup(Ipv4Network),

    #[error("default_output_ttl must be at least 1")]
    InvalidTtl,

    #[error("unknown logging facility '{0}'")]
    UnknownFacility(String),
}
