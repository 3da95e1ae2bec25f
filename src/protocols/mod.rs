// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Protocol-side objects and the collaborators the forwarding core calls.
//!
//! The forwarding core does not run the IGMP or PIM state machines itself.
//! It consumes their objects (sources, groups, per-interface channels,
//! upstream flows) and calls out through the narrow traits below:
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`NexthopLookup`] | vif resolver |
//! | [`RpServices`] | forwarding activation, refresh sweep, interface feed |
//! | [`JoinPruneSignaling`] | refresh sweep on RPF change |
//! | [`LocalMembership`] | IGMP forwarding start/stop, interface down |
//!
//! In-process implementations: [`rib::Rib`] (routing lookup),
//! [`rp::StaticRp`] (static RP table) and [`signaling::SignalRecorder`]
//! (join/prune and membership notifications).

pub mod igmp;
pub mod pim;
pub mod rib;
pub mod rp;
pub mod signaling;

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::vif::{Interface, VifResolver, VifTable};
use crate::zebra::ZebraEvent;
use crate::Sg;

/// Inputs to the routing state event loop
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// Interface, address or route change
    Zebra(ZebraEvent),
    /// Links or addresses changed; re-read the interface list
    InterfacesChanged,
    /// Timer expired
    TimerExpired(TimerType),
}

/// Timers driven by the supervisor's timer manager
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// Debounced RPF cache refresh; `id` is the arming handle
    RpfCacheRefresh { id: u64 },
    /// Periodic full interface re-synchronisation
    InterfaceResync,
}

/// Request to schedule a timer
#[derive(Debug, Clone)]
pub struct TimerRequest {
    /// Type of timer
    pub timer_type: TimerType,
    /// When the timer should fire
    pub fire_at: Instant,
    /// Whether this cancels any existing timer of the same type
    pub replace_existing: bool,
}

/// Unicast routing lookup
pub trait NexthopLookup {
    /// Candidate `(nexthop, ifindex)` pairs for reaching `addr`, best first.
    /// A nexthop of `0.0.0.0` means directly connected.
    fn lookup_nexthops(&self, addr: Ipv4Addr) -> Vec<(Ipv4Addr, u32)>;
}

/// Rendezvous point services
pub trait RpServices: Send {
    /// Address to run RPF towards for a flow: the source itself for (S,G),
    /// the group's RP for (*,G). `None` if there is no such address.
    fn resolve_upstream_source_address(&self, sg: &Sg) -> Option<Ipv4Addr>;

    /// Re-resolve reachability of every configured RP
    fn setup_rp_state(&mut self, resolver: &VifResolver<'_>);

    /// Recompute whether this router is the RP for any group range
    fn reevaluate_local_rp_role(&mut self, interfaces: &VifTable);

    /// An address was added to a multicast-enabled interface
    fn notify_rp_added(&mut self, interface: &Interface);
}

/// PIM join/prune signaling towards upstream neighbors
pub trait JoinPruneSignaling: Send {
    fn send(&mut self, interface: &str, neighbor: Ipv4Addr, sg: &Sg, is_join: bool);

    /// Restart the periodic join timer of an upstream flow
    fn restart_join_timer(&mut self, sg: &Sg);

    /// Re-evaluate JoinDesired for an upstream flow
    fn update_join_desired(&mut self, sg: &Sg);

    /// Recompute the inherited output list of an upstream flow
    fn inherited_olist_decide(&mut self, sg: &Sg);
}

/// PIM per-interface local membership tracking
pub trait LocalMembership: Send {
    fn add_local_member(&mut self, interface: &str, sg: &Sg);

    fn remove_local_member(&mut self, interface: &str, sg: &Sg);

    /// Drop every per-interface channel on an interface going down
    fn delete_all_channels(&mut self, interface: &str);
}
