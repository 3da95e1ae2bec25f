// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Reverse path forwarding selection for upstream flows.
//!
//! Each [`UpstreamFlow`] remembers the interface and neighbor it currently
//! expects traffic from. [`update`] recomputes that selection from the
//! routing table and reports whether it moved.

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::log_debug;
use crate::logging::{Facility, Logger};
use crate::protocols::pim::UpstreamFlow;
use crate::protocols::RpServices;
use crate::vif::VifResolver;

/// Current RPF choice of an upstream flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpfSelection {
    /// Interface towards the upstream address; `None` until first resolved
    pub interface: Option<String>,
    /// Upstream neighbor (the address itself when directly connected)
    pub rpf_addr: Ipv4Addr,
}

impl Default for RpfSelection {
    fn default() -> Self {
        Self {
            interface: None,
            rpf_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl RpfSelection {
    pub fn is_resolved(&self) -> bool {
        self.interface.is_some()
    }
}

/// Outcome of [`update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpfResult {
    Unchanged,
    /// Interface or neighbor moved; carries the previous selection
    Changed {
        old_addr: Ipv4Addr,
        old_interface: Option<String>,
    },
    /// No upstream address or no usable route; the flow is left untouched
    Failure,
}

impl RpfResult {
    pub fn is_changed(&self) -> bool {
        matches!(self, RpfResult::Changed { .. })
    }
}

/// Recompute the RPF selection of an upstream flow
pub fn update(
    flow: &mut UpstreamFlow,
    resolver: &VifResolver<'_>,
    rp: &dyn RpServices,
    logger: &Logger,
) -> RpfResult {
    let Some(upstream_addr) = rp.resolve_upstream_source_address(&flow.sg) else {
        log_debug!(
            logger,
            Facility::Rpf,
            "{}: no upstream address to run RPF towards",
            flow.sg
        );
        return RpfResult::Failure;
    };

    let nexthop = match resolver.resolve_nexthop(upstream_addr) {
        Ok(nh) => nh,
        Err(e) => {
            log_debug!(logger, Facility::Rpf, "{}: RPF lookup failed: {}", flow.sg, e);
            return RpfResult::Failure;
        }
    };

    flow.upstream_addr = upstream_addr;

    let same_interface = flow.rpf.interface.as_deref() == Some(nexthop.interface.as_str());
    if same_interface && flow.rpf.rpf_addr == nexthop.rpf_addr {
        return RpfResult::Unchanged;
    }

    let old = std::mem::replace(
        &mut flow.rpf,
        RpfSelection {
            interface: Some(nexthop.interface),
            rpf_addr: nexthop.rpf_addr,
        },
    );
    log_debug!(
        logger,
        Facility::Rpf,
        "{}: RPF moved from {} on {} to {} on {}",
        flow.sg,
        old.rpf_addr,
        old.interface.as_deref().unwrap_or("<none>"),
        flow.rpf.rpf_addr,
        flow.rpf.interface.as_deref().unwrap_or("<none>")
    );

    RpfResult::Changed {
        old_addr: old.rpf_addr,
        old_interface: old.interface,
    }
}
