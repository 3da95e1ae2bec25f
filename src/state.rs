// SPDX-License-Identifier: Apache-2.0 OR MIT
//! The routing state container.
//!
//! [`RoutingState`] owns every table the forwarding core mutates plus boxed
//! handles to its collaborators. It is driven from a single event loop;
//! the operations themselves live next to the code they belong to
//! (`forward.rs`, `refresh.rs`, `zebra.rs`) as further `impl` blocks.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::{Config, StaticRouteConfig};
use crate::logging::{Facility, Logger};
use crate::mroute::MfcKernel;
use crate::oil::{ChannelOil, OilTable};
use crate::protocols::pim::UpstreamFlow;
use crate::protocols::rib::Rib;
use crate::protocols::{JoinPruneSignaling, LocalMembership, RpServices};
use crate::refresh::{RefreshScheduler, RefreshStats, RefreshTimer};
use crate::rpf;
use crate::vif::{Interface, VifResolver, VifTable};
use crate::{log_debug, log_info};
use crate::{Sg, DEFAULT_RPF_REFRESH_DELAY_MS, MIN_OUTPUT_TTL};

/// Collaborators the routing state calls out to
pub struct Collaborators {
    pub kernel: Box<dyn MfcKernel>,
    pub timer: Box<dyn RefreshTimer>,
    pub rp: Box<dyn RpServices>,
    pub joinprune: Box<dyn JoinPruneSignaling>,
    pub membership: Box<dyn LocalMembership>,
}

pub struct RoutingState {
    pub vifs: VifTable,
    pub rib: Rib,
    pub oil: OilTable,
    pub upstreams: BTreeMap<Sg, UpstreamFlow>,
    pub scheduler: RefreshScheduler,
    pub kernel: Box<dyn MfcKernel>,
    pub rp: Box<dyn RpServices>,
    pub joinprune: Box<dyn JoinPruneSignaling>,
    pub membership: Box<dyn LocalMembership>,
    pub logger: Logger,
    /// TTL threshold installed for new outputs
    pub output_ttl: u8,
    pub router_id: Option<Ipv4Addr>,
    /// Interfaces with multicast routing enabled, by name: (pim, igmp)
    pub enabled: BTreeMap<String, (bool, bool)>,
    /// Routes to seed into the RIB once their interface appears
    pub static_routes: Vec<StaticRouteConfig>,
}

impl RoutingState {
    pub fn new(collaborators: Collaborators, logger: Logger) -> Self {
        let Collaborators {
            kernel,
            timer,
            rp,
            joinprune,
            membership,
        } = collaborators;
        Self {
            vifs: VifTable::new(),
            rib: Rib::new(),
            oil: OilTable::new(),
            upstreams: BTreeMap::new(),
            scheduler: RefreshScheduler::new(
                timer,
                Duration::from_millis(DEFAULT_RPF_REFRESH_DELAY_MS),
            ),
            kernel,
            rp,
            joinprune,
            membership,
            logger,
            output_ttl: MIN_OUTPUT_TTL,
            router_id: None,
            enabled: BTreeMap::new(),
            static_routes: Vec::new(),
        }
    }

    /// Routing state set up from a validated configuration
    pub fn from_config(config: &Config, collaborators: Collaborators, logger: Logger) -> Self {
        let mut state = Self::new(collaborators, logger);
        state.scheduler.set_delay(config.refresh_delay());
        state.output_ttl = config.default_output_ttl;
        state.enabled = config
            .interfaces
            .iter()
            .map(|i| (i.name.clone(), (i.pim, i.igmp)))
            .collect();
        state.static_routes = config.static_routes.clone();
        log_info!(
            state.logger,
            Facility::Supervisor,
            "routing state ready: {} multicast interfaces, refresh delay {:?}",
            state.enabled.len(),
            config.refresh_delay()
        );
        state
    }

    /// Enable multicast routing on an interface by name. Takes effect the
    /// next time the interface is seen or comes up.
    pub fn enable_interface(&mut self, name: &str, pim: bool, igmp: bool) {
        self.enabled.insert(name.to_string(), (pim, igmp));
        if self.vifs.get(name).is_some() {
            // Cannot fail: the interface exists
            let _ = self.vifs.set_multicast(name, pim, igmp);
        }
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.vifs.get(name)
    }

    pub fn entry(&self, sg: &Sg) -> Option<&ChannelOil> {
        self.oil.get(sg)
    }

    pub fn upstream(&self, sg: &Sg) -> Option<&UpstreamFlow> {
        self.upstreams.get(sg)
    }

    pub fn upstream_mut(&mut self, sg: &Sg) -> Option<&mut UpstreamFlow> {
        self.upstreams.get_mut(sg)
    }

    pub fn stats(&self) -> &RefreshStats {
        self.scheduler.stats()
    }

    /// Start tracking an upstream flow, resolving its RPF right away.
    /// Returns the existing flow if there already is one.
    pub fn add_upstream(&mut self, sg: Sg) -> &mut UpstreamFlow {
        let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
        let rp = self.rp.as_ref();
        let logger = &self.logger;
        self.upstreams.entry(sg).or_insert_with(|| {
            let upstream_addr = rp
                .resolve_upstream_source_address(&sg)
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            let mut flow = UpstreamFlow::new(sg, upstream_addr);
            let result = rpf::update(&mut flow, &resolver, rp, logger);
            log_debug!(
                logger,
                Facility::Pim,
                "upstream {} added towards {} ({:?})",
                sg,
                flow.upstream_addr,
                result
            );
            flow
        })
    }

    pub fn remove_upstream(&mut self, sg: &Sg) -> Option<UpstreamFlow> {
        let flow = self.upstreams.remove(sg)?;
        log_debug!(self.logger, Facility::Pim, "upstream {} removed", sg);
        Some(flow)
    }

    /// Snapshot for status dumps
    pub fn status(&self) -> StateStatus {
        StateStatus {
            router_id: self.router_id,
            interfaces: self.vifs.iter().cloned().collect(),
            entries: self.oil.iter().cloned().collect(),
            upstreams: self.upstreams.values().cloned().collect(),
            stats: self.scheduler.stats().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateStatus {
    pub router_id: Option<Ipv4Addr>,
    pub interfaces: Vec<Interface>,
    pub entries: Vec<ChannelOil>,
    pub upstreams: Vec<UpstreamFlow>,
    pub stats: RefreshStats,
}
