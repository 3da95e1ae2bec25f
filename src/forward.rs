// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Forwarding activation: where IGMP and PIM ask for (and give up) flow
//! replication onto an interface.
//!
//! Both protocols end up on the same forwarding cache entry and are told
//! apart by their [`OifFlags`] bit. IGMP sources carry their own
//! "forwarding" flag, which makes their start/stop calls idempotent. PIM
//! channels carry none; a duplicate start surfaces as
//! [`OilError::AlreadyPresentForProtocol`].

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::logging::Facility;
use crate::oil::{AddOutcome, DelOutcome, OilError};
use crate::protocols::igmp::{IgmpGroup, IgmpSource};
use crate::protocols::pim::IfChannel;
use crate::state::RoutingState;
use crate::vif::{ResolveError, VifResolver};
use crate::{log_debug, log_error, log_notice};
use crate::{OifFlags, Sg, VifIndex};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no upstream address for {0}")]
    Unresolvable(Sg),

    #[error("no input interface: {0}")]
    NoInputInterface(#[from] ResolveError),

    #[error("multicast routing not enabled on {0}")]
    MulticastDisabled(String),

    #[error("{sg}: input interface {interface} is also the output")]
    Looped { sg: Sg, interface: String },

    #[error("no upstream flow for {0}")]
    NoUpstream(Sg),

    #[error(transparent)]
    Oil(#[from] OilError),
}

impl RoutingState {
    fn output_vif(&self, interface: &str) -> Result<VifIndex, ForwardError> {
        self.vifs
            .vif_of(interface)
            .ok_or_else(|| ForwardError::MulticastDisabled(interface.to_string()))
    }

    fn add_output(
        &mut self,
        sg: Sg,
        input_vif: Option<VifIndex>,
        output_vif: VifIndex,
        flag: OifFlags,
    ) -> Result<AddOutcome, OilError> {
        self.oil.add_oif_or_create(
            sg,
            input_vif,
            output_vif,
            flag,
            self.output_ttl,
            self.kernel.as_mut(),
            &self.logger,
        )
    }

    /// Start forwarding an IGMP source onto the interface it was learned on
    pub fn igmp_source_forward_start(&mut self, source: &mut IgmpSource) -> Result<(), ForwardError> {
        let sg = source.sg();
        log_debug!(
            self.logger,
            Facility::Igmp,
            "{}: forward start on {} (forwarding={})",
            sg,
            source.interface,
            source.is_forwarding()
        );

        if source.is_forwarding() {
            return Ok(());
        }

        let output_vif = match self.output_vif(&source.interface) {
            Ok(vif) => vif,
            Err(e) => {
                log_debug!(self.logger, Facility::Igmp, "{}: {}", sg, e);
                return Err(e);
            }
        };

        let input_vif = if self.oil.contains(&sg) {
            None
        } else {
            let vif_source = self
                .rp
                .resolve_upstream_source_address(&sg)
                .ok_or(ForwardError::Unresolvable(sg))?;
            let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
            let input_vif = match resolver.resolve_vif(vif_source) {
                Ok(vif) => vif,
                Err(e) => {
                    log_debug!(
                        self.logger,
                        Facility::Igmp,
                        "{}: could not find input interface for {}",
                        sg,
                        vif_source
                    );
                    return Err(e.into());
                }
            };

            if input_vif == output_vif {
                log_notice!(
                    self.logger,
                    Facility::Igmp,
                    "ignoring request for looped entry {}: {} is both input and output (vif {})",
                    sg,
                    source.interface,
                    input_vif
                );
                return Err(ForwardError::Looped {
                    sg,
                    interface: source.interface.clone(),
                });
            }
            Some(input_vif)
        };

        self.add_output(sg, input_vif, output_vif, OifFlags::IGMP)?;

        self.membership.add_local_member(&source.interface, &sg);
        source.set_forwarding(true);
        Ok(())
    }

    /// Stop forwarding an IGMP source; the source record itself stays
    pub fn igmp_source_forward_stop(&mut self, source: &mut IgmpSource) -> Result<(), ForwardError> {
        let sg = source.sg();
        log_debug!(
            self.logger,
            Facility::Igmp,
            "{}: forward stop on {} (forwarding={})",
            sg,
            source.interface,
            source.is_forwarding()
        );

        if !source.is_forwarding() {
            return Ok(());
        }

        match self.vifs.vif_of(&source.interface) {
            Some(vif) => {
                match self.oil.del_oif(
                    &sg,
                    vif,
                    OifFlags::IGMP,
                    self.kernel.as_mut(),
                    &self.logger,
                ) {
                    Ok(outcome) => log_debug!(
                        self.logger,
                        Facility::Igmp,
                        "{}: IGMP output {} withdrawn: {:?}",
                        sg,
                        source.interface,
                        outcome
                    ),
                    Err(e @ OilError::Kernel(_)) => return Err(e.into()),
                    // Duplicate stops happen when both protocols race
                    Err(e) => log_debug!(
                        self.logger,
                        Facility::Igmp,
                        "{}: ignoring withdrawal result: {}",
                        sg,
                        e
                    ),
                }
            }
            None => log_debug!(
                self.logger,
                Facility::Igmp,
                "{}: {} has no vif, nothing to withdraw",
                sg,
                source.interface
            ),
        }

        self.membership.remove_local_member(&source.interface, &sg);
        source.set_forwarding(false);
        Ok(())
    }

    /// Forward a group from any source: EXCLUDE mode with no sources
    pub fn igmp_anysource_forward_start(&mut self, group: &mut IgmpGroup) -> Result<(), ForwardError> {
        if !group.is_exclude_empty() {
            log_error!(
                self.logger,
                Facility::Igmp,
                "any-source forwarding requested for group {} on {} which is not EXCLUDE {{}}",
                group.group,
                group.interface
            );
            return Err(ForwardError::Unresolvable(Sg::wildcard(group.group)));
        }
        let source = group.source_mut(Ipv4Addr::UNSPECIFIED);
        self.igmp_source_forward_start(source)
    }

    pub fn igmp_anysource_forward_stop(&mut self, group: &mut IgmpGroup) -> Result<(), ForwardError> {
        match group.find_source_mut(Ipv4Addr::UNSPECIFIED) {
            Some(source) => self.igmp_source_forward_stop(source),
            None => Ok(()),
        }
    }

    /// Forward a flow onto the interface of a downstream PIM join
    pub fn pim_forward_start(&mut self, channel: &IfChannel) -> Result<AddOutcome, ForwardError> {
        let sg = channel.sg;
        let upstream_addr = self
            .upstreams
            .get(&sg)
            .map(|up| up.upstream_addr)
            .ok_or(ForwardError::NoUpstream(sg))?;
        log_debug!(
            self.logger,
            Facility::Pim,
            "{}: forward start on {} (upstream {})",
            sg,
            channel.interface,
            upstream_addr
        );

        let output_vif = self.output_vif(&channel.interface)?;

        let input_vif = if self.oil.contains(&sg) {
            None
        } else {
            if upstream_addr.is_unspecified() {
                return Err(ForwardError::Unresolvable(sg));
            }
            let resolver = VifResolver::new(&self.vifs, &self.rib, &self.logger);
            match resolver.resolve_vif(upstream_addr) {
                Ok(vif) => Some(vif),
                Err(e) => {
                    log_debug!(
                        self.logger,
                        Facility::Pim,
                        "{}: could not find input interface for {}",
                        sg,
                        upstream_addr
                    );
                    return Err(e.into());
                }
            }
        };

        Ok(self.add_output(sg, input_vif, output_vif, OifFlags::PIM)?)
    }

    /// Withdraw a PIM join's output. Missing state is not an error.
    pub fn pim_forward_stop(&mut self, channel: &IfChannel) -> Option<DelOutcome> {
        let sg = channel.sg;
        log_debug!(
            self.logger,
            Facility::Pim,
            "{}: forward stop on {}",
            sg,
            channel.interface
        );

        if !self.oil.contains(&sg) {
            log_debug!(
                self.logger,
                Facility::Pim,
                "{}: forward stop on {} with no forwarding cache entry",
                sg,
                channel.interface
            );
            return None;
        }
        let vif = self.vifs.vif_of(&channel.interface)?;

        match self
            .oil
            .del_oif(&sg, vif, OifFlags::PIM, self.kernel.as_mut(), &self.logger)
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log_debug!(self.logger, Facility::Pim, "{}: del_oif: {}", sg, e);
                None
            }
        }
    }
}
