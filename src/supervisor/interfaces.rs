// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interface list snapshots.
//!
//! The kernel's interface list is read with `pnet::datalink` and compared
//! against the previous snapshot; the difference is turned into the
//! interface and address events the routing state understands.

use std::collections::BTreeMap;

use ipnetwork::IpNetwork;

use crate::vif::{IfAddr, LinkFlags};
use crate::zebra::{InterfaceInfo, ZebraEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub ifindex: u32,
    pub flags: LinkFlags,
    pub addresses: Vec<IfAddr>,
}

/// Interfaces by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    entries: BTreeMap<String, SnapshotEntry>,
}

impl InterfaceSnapshot {
    /// Read the current interface list from the system
    pub fn capture() -> Self {
        let mut snapshot = Self::default();
        for iface in pnet::datalink::interfaces() {
            // The first IPv4 address reported for an interface is its primary
            let mut addresses: Vec<IfAddr> = Vec::new();
            for ip in &iface.ips {
                if let IpNetwork::V4(net) = ip {
                    addresses.push(IfAddr {
                        addr: net.ip(),
                        prefix_len: net.prefix(),
                        secondary: !addresses.is_empty(),
                    });
                }
            }
            snapshot.insert(
                &iface.name,
                SnapshotEntry {
                    ifindex: iface.index,
                    flags: LinkFlags::from_raw(iface.flags as u32),
                    addresses,
                },
            );
        }
        snapshot
    }

    pub fn insert(&mut self, name: &str, entry: SnapshotEntry) {
        self.entries.insert(name.to_string(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Events that take a routing state from `self` to `newer`.
    ///
    /// Ordering matters: a new interface is announced before its addresses,
    /// address changes precede an up transition (so the vif is created with
    /// its final primary), and a vanished interface has its addresses
    /// withdrawn before the delete.
    pub fn diff(&self, newer: &InterfaceSnapshot) -> Vec<ZebraEvent> {
        let mut events = Vec::new();

        for (name, old) in &self.entries {
            match newer.entries.get(name) {
                Some(new) if new.ifindex == old.ifindex => {}
                _ => removed_events(name, old, &mut events),
            }
        }

        for (name, new) in &newer.entries {
            match self.entries.get(name) {
                Some(old) if old.ifindex == new.ifindex => changed_events(name, old, new, &mut events),
                _ => added_events(name, new, &mut events),
            }
        }

        events
    }
}

fn info(name: &str, entry: &SnapshotEntry, flags: LinkFlags) -> InterfaceInfo {
    InterfaceInfo::new(name, entry.ifindex, flags)
}

fn address_events(name: &str, addrs: &[IfAddr], add: bool, events: &mut Vec<ZebraEvent>) {
    for addr in addrs {
        let interface = name.to_string();
        events.push(if add {
            ZebraEvent::AddressAdd { interface, addr: *addr }
        } else {
            ZebraEvent::AddressDelete { interface, addr: *addr }
        });
    }
}

fn removed_events(name: &str, old: &SnapshotEntry, events: &mut Vec<ZebraEvent>) {
    address_events(name, &old.addresses, false, events);
    events.push(ZebraEvent::InterfaceDelete(info(name, old, LinkFlags::default())));
}

fn added_events(name: &str, new: &SnapshotEntry, events: &mut Vec<ZebraEvent>) {
    events.push(ZebraEvent::InterfaceAdd(info(name, new, new.flags)));
    address_events(name, &new.addresses, true, events);
}

fn changed_events(name: &str, old: &SnapshotEntry, new: &SnapshotEntry, events: &mut Vec<ZebraEvent>) {
    let going_down = old.flags.is_operative() && !new.flags.is_operative();
    if going_down {
        events.push(ZebraEvent::InterfaceDown(info(name, new, new.flags)));
    }

    // A primary that changed address must be withdrawn before its
    // replacement can be accepted as primary
    let gone: Vec<IfAddr> = old
        .addresses
        .iter()
        .filter(|a| !new.addresses.contains(a))
        .copied()
        .collect();
    let fresh: Vec<IfAddr> = new
        .addresses
        .iter()
        .filter(|a| !old.addresses.contains(a))
        .copied()
        .collect();
    address_events(name, &gone, false, events);
    address_events(name, &fresh, true, events);

    if !old.flags.is_operative() && new.flags.is_operative() {
        events.push(ZebraEvent::InterfaceUp(info(name, new, new.flags)));
    } else if !going_down && old.flags != new.flags {
        events.push(ZebraEvent::InterfaceAdd(info(name, new, new.flags)));
    }
}
