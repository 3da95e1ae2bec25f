// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM-SM upstream flows and per-interface channels (RFC 7761 subset)
//!
//! The join/prune state machine that drives these records lives outside
//! the forwarding core. Here they carry what the core needs: the flow key,
//! the address RPF is computed towards, the join state, and the current
//! RPF selection.
//!
//! | Record | Key | Meaning |
//! |--------|-----|---------|
//! | [`UpstreamFlow`] | (S,G) | this router wants to receive the flow |
//! | [`IfChannel`] | (S,G), interface | a downstream join on one interface |

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::rpf::RpfSelection;
use crate::Sg;

/// Upstream (S,G) join state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum JoinState {
    #[default]
    NotJoined,
    Joined,
    PrunePending,
}

/// An (S,G) flow this router is trying to receive
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamFlow {
    pub sg: Sg,
    /// Address RPF is computed towards (S, or the RP for (*,G))
    pub upstream_addr: Ipv4Addr,
    pub join_state: JoinState,
    pub rpf: RpfSelection,
}

impl UpstreamFlow {
    pub fn new(sg: Sg, upstream_addr: Ipv4Addr) -> Self {
        Self {
            sg,
            upstream_addr,
            join_state: JoinState::NotJoined,
            rpf: RpfSelection::default(),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.join_state == JoinState::Joined
    }
}

/// Downstream (S,G) state on one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IfChannel {
    pub sg: Sg,
    pub interface: String,
}

impl IfChannel {
    pub fn new(sg: Sg, interface: &str) -> Self {
        Self {
            sg,
            interface: interface.to_string(),
        }
    }
}
