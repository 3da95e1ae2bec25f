// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Static rendezvous point table.
//!
//! Group ranges map to an RP address. The longest matching range wins.
//! For every RP the table tracks whether it is reachable (an RPF nexthop
//! with a vif exists) and whether it is one of this router's own addresses.

use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::net::Ipv4Addr;

use super::RpServices;
use crate::config::StaticRpConfig;
use crate::logging::{Facility, Logger};
use crate::vif::{Interface, VifResolver, VifTable};
use crate::Sg;
use crate::{log_debug, log_info};

#[derive(Debug, Clone, Serialize)]
pub struct RpEntry {
    pub group: Ipv4Network,
    pub rp: Ipv4Addr,
    /// Interface towards the RP, if reachable
    pub rpf_interface: Option<String>,
    /// This router owns the RP address
    pub i_am_rp: bool,
}

pub struct StaticRp {
    entries: Vec<RpEntry>,
    logger: Logger,
}

impl StaticRp {
    pub fn new(logger: Logger) -> Self {
        Self {
            entries: Vec::new(),
            logger,
        }
    }

    pub fn from_config(config: &[StaticRpConfig], logger: Logger) -> Self {
        let mut table = Self::new(logger);
        for entry in config {
            table.add(entry.group, entry.rp);
        }
        table
    }

    /// Add or replace the RP for a group range
    pub fn add(&mut self, group: Ipv4Network, rp: Ipv4Addr) {
        self.entries.retain(|e| e.group != group);
        self.entries.push(RpEntry {
            group,
            rp,
            rpf_interface: None,
            i_am_rp: false,
        });
    }

    pub fn entries(&self) -> &[RpEntry] {
        &self.entries
    }

    /// RP entry serving a group
    pub fn rp_for(&self, group: Ipv4Addr) -> Option<&RpEntry> {
        self.entries
            .iter()
            .filter(|e| e.group.contains(group))
            .max_by_key(|e| e.group.prefix())
    }

    pub fn i_am_rp(&self, group: Ipv4Addr) -> bool {
        self.rp_for(group).map(|e| e.i_am_rp).unwrap_or(false)
    }

    fn set_i_am_rp(&mut self, idx: usize, value: bool) {
        let entry = &mut self.entries[idx];
        if entry.i_am_rp != value {
            entry.i_am_rp = value;
            log_info!(
                self.logger,
                Facility::Pim,
                "{} RP {} for {}",
                if value { "became" } else { "no longer" },
                entry.rp,
                entry.group
            );
        }
    }
}

impl RpServices for StaticRp {
    fn resolve_upstream_source_address(&self, sg: &Sg) -> Option<Ipv4Addr> {
        if !sg.is_wildcard() {
            return Some(sg.source);
        }
        let rp = self.rp_for(sg.group).map(|e| e.rp);
        if rp.is_none() {
            log_debug!(self.logger, Facility::Pim, "no RP configured for {}", sg);
        }
        rp
    }

    fn setup_rp_state(&mut self, resolver: &VifResolver<'_>) {
        for entry in &mut self.entries {
            let rpf_interface = resolver.resolve_nexthop(entry.rp).ok().map(|nh| nh.interface);
            if rpf_interface != entry.rpf_interface {
                log_info!(
                    self.logger,
                    Facility::Pim,
                    "RP {} for {} now {}",
                    entry.rp,
                    entry.group,
                    match &rpf_interface {
                        Some(iface) => format!("reachable via {}", iface),
                        None => "unreachable".to_string(),
                    }
                );
                entry.rpf_interface = rpf_interface;
            }
        }
    }

    fn reevaluate_local_rp_role(&mut self, interfaces: &VifTable) {
        for idx in 0..self.entries.len() {
            let rp = self.entries[idx].rp;
            let local = interfaces
                .iter()
                .any(|i| i.addresses.iter().any(|a| a.addr == rp));
            self.set_i_am_rp(idx, local);
        }
    }

    fn notify_rp_added(&mut self, interface: &Interface) {
        for idx in 0..self.entries.len() {
            let rp = self.entries[idx].rp;
            if interface.addresses.iter().any(|a| a.addr == rp) {
                self.set_i_am_rp(idx, true);
            }
        }
    }
}
