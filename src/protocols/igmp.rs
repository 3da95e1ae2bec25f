// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv3 group and source records as seen by the forwarding core.
//!
//! The IGMP state machine owns these records; the forwarding core only
//! reads the flow key and interface and toggles the per-source forwarding
//! flag.
//!
//! | Filter mode | Sources | Forwarded flows |
//! |-------------|---------|-----------------|
//! | INCLUDE {S1..Sn} | listed | (Si,G) for each source |
//! | EXCLUDE {} | none | (*,G) through the wildcard source |

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::Sg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// One source of a group on one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgmpSource {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    /// Interface the membership was learned on (the output interface)
    pub interface: String,
    forwarding: bool,
}

impl IgmpSource {
    pub fn new(source: Ipv4Addr, group: Ipv4Addr, interface: &str) -> Self {
        Self {
            source,
            group,
            interface: interface.to_string(),
            forwarding: false,
        }
    }

    pub fn sg(&self) -> Sg {
        Sg::new(self.source, self.group)
    }

    /// Whether this source currently holds an IGMP output on its flow
    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    pub(crate) fn set_forwarding(&mut self, forwarding: bool) {
        self.forwarding = forwarding;
    }
}

/// A group joined on one interface
#[derive(Debug, Clone, Serialize)]
pub struct IgmpGroup {
    pub group: Ipv4Addr,
    pub interface: String,
    pub filter_mode: FilterMode,
    sources: BTreeMap<Ipv4Addr, IgmpSource>,
}

impl IgmpGroup {
    pub fn new(group: Ipv4Addr, interface: &str, filter_mode: FilterMode) -> Self {
        Self {
            group,
            interface: interface.to_string(),
            filter_mode,
            sources: BTreeMap::new(),
        }
    }

    /// The source record for `source`, created if missing
    pub fn source_mut(&mut self, source: Ipv4Addr) -> &mut IgmpSource {
        let group = self.group;
        let interface = self.interface.clone();
        self.sources
            .entry(source)
            .or_insert_with(|| IgmpSource::new(source, group, &interface))
    }

    pub fn find_source(&self, source: Ipv4Addr) -> Option<&IgmpSource> {
        self.sources.get(&source)
    }

    pub fn find_source_mut(&mut self, source: Ipv4Addr) -> Option<&mut IgmpSource> {
        self.sources.get_mut(&source)
    }

    pub fn remove_source(&mut self, source: Ipv4Addr) -> Option<IgmpSource> {
        self.sources.remove(&source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &IgmpSource> {
        self.sources.values()
    }

    /// EXCLUDE mode with no real sources listed: the group is wanted from
    /// any source. The wildcard record itself does not count.
    pub fn is_exclude_empty(&self) -> bool {
        self.filter_mode == FilterMode::Exclude
            && self.sources.keys().all(|s| s.is_unspecified())
    }
}
