// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Forwarding cache entries ("channel OIL") and their output lists.
//!
//! One [`ChannelOil`] exists per (S,G) being forwarded. Each output vif
//! carries a bitmask of the protocols that want it ([`OifFlags`]) and the
//! TTL threshold programmed into the kernel. The two are kept in lockstep:
//!
//! - a vif has a nonzero TTL exactly when some protocol flag is set
//! - `active_oif_count` is the number of vifs with a nonzero TTL
//! - an entry whose count drops to zero is removed from the kernel and
//!   released from the table
//!
//! The flags and TTLs are only changed through [`OilTable`]. When the
//! kernel rejects a TTL change the TTL is rolled back, so the TTL table
//! always matches what the kernel holds. A rejected delete still clears
//! the protocol flag, leaving an orphan output (TTL set, no protocol)
//! until [`OilTable::clear_orphan_outputs`] runs from the next
//! reconciliation sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::logging::{Facility, Logger};
use crate::mroute::{KernelError, MfcEntry, MfcKernel};
use crate::{log_debug, log_info, log_warning};
use crate::{OifFlags, Sg, VifIndex, MAXVIFS, REGISTER_VIF};

#[derive(Debug, Error)]
pub enum OilError {
    #[error("protocol {} already holds vif {vif}", .flag.protocol_name())]
    AlreadyPresentForProtocol { vif: VifIndex, flag: OifFlags },

    #[error("vif {vif} is already an output without any protocol holding it")]
    ExistingOutput { vif: VifIndex },

    #[error("protocol {} does not hold vif {vif}", .flag.protocol_name())]
    NotPresentForProtocol { vif: VifIndex, flag: OifFlags },

    #[error("vif {vif} is not an output")]
    NoSuchOutput { vif: VifIndex },

    #[error("no forwarding cache entry for {0}")]
    NoSuchEntry(Sg),

    #[error("vif {0} cannot be an output")]
    InvalidVif(VifIndex),

    #[error("vif {vif} is the input interface")]
    Looped { vif: VifIndex },

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Result of a successful [`OilTable::add_oif`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The vif became an active output and the kernel was updated
    Activated,
    /// Another protocol already holds the vif; only the flag was added
    Shared,
}

/// Result of a successful [`OilTable::del_oif`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelOutcome {
    /// The vif stopped being an output; other outputs remain
    Deactivated,
    /// That was the last output: the entry left the kernel and the table
    Released,
    /// Another protocol still holds the vif, which stays active
    StillWanted,
}

/// Kernel forwarding cache entry for one (S,G)
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOil {
    sg: Sg,
    input_vif: VifIndex,
    oif_flags: [OifFlags; MAXVIFS],
    output_ttl: [u8; MAXVIFS],
    oif_creation: [Option<DateTime<Utc>>; MAXVIFS],
    active_oif_count: usize,
    installed: bool,
    needs_olist_rescan: bool,
    loop_detected: bool,
    created_at: DateTime<Utc>,
}

impl ChannelOil {
    fn new(sg: Sg, input_vif: VifIndex) -> Self {
        Self {
            sg,
            input_vif,
            oif_flags: [OifFlags::empty(); MAXVIFS],
            output_ttl: [0; MAXVIFS],
            oif_creation: [None; MAXVIFS],
            active_oif_count: 0,
            installed: false,
            needs_olist_rescan: false,
            loop_detected: false,
            created_at: Utc::now(),
        }
    }

    pub fn sg(&self) -> Sg {
        self.sg
    }

    pub fn input_vif(&self) -> VifIndex {
        self.input_vif
    }

    pub fn oif_flags(&self, vif: VifIndex) -> OifFlags {
        self.oif_flags.get(vif).copied().unwrap_or_default()
    }

    pub fn output_ttl(&self, vif: VifIndex) -> u8 {
        self.output_ttl.get(vif).copied().unwrap_or(0)
    }

    pub fn output_ttls(&self) -> &[u8; MAXVIFS] {
        &self.output_ttl
    }

    /// When the vif last became an output
    pub fn oif_created_at(&self, vif: VifIndex) -> Option<DateTime<Utc>> {
        self.oif_creation.get(vif).copied().flatten()
    }

    pub fn active_oif_count(&self) -> usize {
        self.active_oif_count
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn needs_olist_rescan(&self) -> bool {
        self.needs_olist_rescan
    }

    /// The input vif was found to be one of the outputs
    pub fn loop_detected(&self) -> bool {
        self.loop_detected
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Vifs with a nonzero TTL
    pub fn outputs(&self) -> Vec<VifIndex> {
        (0..MAXVIFS).filter(|v| self.output_ttl[*v] > 0).collect()
    }

    pub fn is_output(&self, vif: VifIndex) -> bool {
        self.output_ttl(vif) > 0
    }

    pub fn mfc_entry(&self) -> MfcEntry {
        MfcEntry {
            sg: self.sg,
            input_vif: self.input_vif,
            ttls: self.output_ttl,
        }
    }

    /// Outputs no protocol holds any more, left by a rejected delete
    pub fn orphan_outputs(&self) -> Vec<VifIndex> {
        (0..MAXVIFS)
            .filter(|v| self.output_ttl[*v] > 0 && self.oif_flags[*v].is_empty())
            .collect()
    }

    /// Flags and TTLs agree and the output count is exact
    pub fn is_consistent(&self) -> bool {
        let mirrored = (0..MAXVIFS)
            .all(|v| self.oif_flags[v].is_empty() == (self.output_ttl[v] == 0));
        let counted = self.output_ttl.iter().filter(|t| **t > 0).count();
        mirrored && counted == self.active_oif_count
    }

    pub(crate) fn set_input_vif(&mut self, vif: VifIndex) {
        self.input_vif = vif;
    }

    pub(crate) fn set_loop_detected(&mut self, looped: bool) {
        self.loop_detected = looped;
    }

    pub(crate) fn mark_olist_rescan(&mut self) {
        self.needs_olist_rescan = true;
    }

    pub(crate) fn clear_olist_rescan(&mut self) {
        self.needs_olist_rescan = false;
    }

    /// Add or update the entry in the kernel
    pub(crate) fn install(&mut self, kernel: &mut dyn MfcKernel) -> Result<(), KernelError> {
        kernel.install(&self.mfc_entry())?;
        self.installed = true;
        Ok(())
    }

    /// Stop replicating onto `vif`. The TTL is restored if the kernel
    /// refuses the update.
    fn zero_output(&mut self, vif: VifIndex, kernel: &mut dyn MfcKernel) -> Result<(), KernelError> {
        let old_ttl = self.output_ttl[vif];
        if old_ttl == 0 {
            return Ok(());
        }
        self.output_ttl[vif] = 0;
        if let Err(e) = self.install(kernel) {
            self.output_ttl[vif] = old_ttl;
            return Err(e);
        }
        self.active_oif_count -= 1;
        self.oif_creation[vif] = None;
        Ok(())
    }

    /// Remove the entry from the kernel. Returns false if it was not there.
    pub(crate) fn uninstall(&mut self, kernel: &mut dyn MfcKernel) -> Result<bool, KernelError> {
        if !self.installed {
            return Ok(false);
        }
        kernel.remove(&self.mfc_entry())?;
        self.installed = false;
        Ok(true)
    }
}

/// All forwarding cache entries, at most one per (S,G)
#[derive(Debug, Default)]
pub struct OilTable {
    entries: BTreeMap<Sg, ChannelOil>,
}

impl OilTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sg: &Sg) -> Option<&ChannelOil> {
        self.entries.get(sg)
    }

    pub(crate) fn get_mut(&mut self, sg: &Sg) -> Option<&mut ChannelOil> {
        self.entries.get_mut(sg)
    }

    pub fn contains(&self, sg: &Sg) -> bool {
        self.entries.contains_key(sg)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelOil> {
        self.entries.values()
    }

    pub fn keys(&self) -> Vec<Sg> {
        self.entries.keys().copied().collect()
    }

    /// The entry for `sg`, created with `input_vif` if there is none.
    /// An existing entry keeps its input vif.
    pub(crate) fn get_or_create(&mut self, sg: Sg, input_vif: VifIndex, logger: &Logger) -> &mut ChannelOil {
        self.entries.entry(sg).or_insert_with(|| {
            log_info!(
                logger,
                Facility::Oil,
                "forwarding cache entry {} created with input vif {}",
                sg,
                input_vif
            );
            ChannelOil::new(sg, input_vif)
        })
    }

    /// Drop an entry from bookkeeping without touching the kernel
    pub(crate) fn release(&mut self, sg: &Sg, logger: &Logger) -> Option<ChannelOil> {
        let entry = self.entries.remove(sg)?;
        log_info!(logger, Facility::Oil, "forwarding cache entry {} released", sg);
        Some(entry)
    }

    /// Ask the owning upstream flow to recompute its inherited output list
    pub fn mark_olist_rescan(&mut self, sg: &Sg) {
        if let Some(entry) = self.entries.get_mut(sg) {
            entry.mark_olist_rescan();
        }
    }

    /// [`OilTable::add_oif`], creating the entry with `input_vif` first
    /// when there is none. An entry created here that got no output is
    /// released again, so no entry is ever left without outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn add_oif_or_create(
        &mut self,
        sg: Sg,
        input_vif: Option<VifIndex>,
        vif: VifIndex,
        flag: OifFlags,
        ttl: u8,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> Result<AddOutcome, OilError> {
        let created = match input_vif {
            Some(input_vif) if !self.contains(&sg) => {
                self.get_or_create(sg, input_vif, logger);
                true
            }
            _ => false,
        };

        let result = self.add_oif(&sg, vif, flag, ttl, kernel, logger);
        if result.is_err() && created {
            self.release(&sg, logger);
        }
        result
    }

    /// Make `vif` an output of `sg` on behalf of one protocol.
    ///
    /// The kernel is only updated when the vif was not an output before.
    pub fn add_oif(
        &mut self,
        sg: &Sg,
        vif: VifIndex,
        flag: OifFlags,
        ttl: u8,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> Result<AddOutcome, OilError> {
        if vif == REGISTER_VIF || vif >= MAXVIFS {
            return Err(OilError::InvalidVif(vif));
        }
        let entry = self
            .entries
            .get_mut(sg)
            .ok_or(OilError::NoSuchEntry(*sg))?;

        if vif == entry.input_vif {
            entry.mark_olist_rescan();
            log_debug!(
                logger,
                Facility::Oil,
                "refusing {} request for {} output vif {}: it is the input vif",
                flag.protocol_name(),
                sg,
                vif
            );
            return Err(OilError::Looped { vif });
        }

        let current = entry.oif_flags[vif];
        if current.intersects(flag) {
            log_debug!(
                logger,
                Facility::Oil,
                "{} already holds vif {} of {}",
                flag.protocol_name(),
                vif,
                sg
            );
            return Err(OilError::AlreadyPresentForProtocol { vif, flag });
        }

        if current.intersects(OifFlags::PROTO_ANY) {
            if entry.output_ttl[vif] == 0 {
                log_warning!(
                    logger,
                    Facility::Oil,
                    "vif {} of {} held by {:?} has no TTL",
                    vif,
                    sg,
                    current
                );
            }
            entry.oif_flags[vif] |= flag;
            log_debug!(
                logger,
                Facility::Oil,
                "{} joined {:?} on vif {} of {}",
                flag.protocol_name(),
                current,
                vif,
                sg
            );
            return Ok(AddOutcome::Shared);
        }

        if entry.output_ttl[vif] > 0 {
            log_debug!(
                logger,
                Facility::Oil,
                "vif {} of {} already has TTL {} without a protocol",
                vif,
                sg,
                entry.output_ttl[vif]
            );
            return Err(OilError::ExistingOutput { vif });
        }

        let old_ttl = entry.output_ttl[vif];
        entry.output_ttl[vif] = ttl;
        if let Err(e) = entry.install(kernel) {
            entry.output_ttl[vif] = old_ttl;
            log_warning!(
                logger,
                Facility::Mroute,
                "could not add output vif {} to {}: {}",
                vif,
                sg,
                e
            );
            return Err(OilError::Kernel(e));
        }

        entry.active_oif_count += 1;
        entry.oif_flags[vif] |= flag;
        entry.oif_creation[vif] = Some(Utc::now());
        log_debug!(
            logger,
            Facility::Oil,
            "{} added output vif {} (ttl {}) to {}, {} active",
            flag.protocol_name(),
            vif,
            ttl,
            sg,
            entry.active_oif_count
        );
        Ok(AddOutcome::Activated)
    }

    /// Withdraw one protocol's interest in `vif` as an output of `sg`.
    ///
    /// A kernel rejection keeps the TTL but not the flag: the vif stays an
    /// orphan output until reconciliation clears it.
    pub fn del_oif(
        &mut self,
        sg: &Sg,
        vif: VifIndex,
        flag: OifFlags,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> Result<DelOutcome, OilError> {
        if vif >= MAXVIFS {
            return Err(OilError::InvalidVif(vif));
        }
        let entry = self
            .entries
            .get_mut(sg)
            .ok_or(OilError::NoSuchEntry(*sg))?;

        if !entry.oif_flags[vif].intersects(flag) {
            log_debug!(
                logger,
                Facility::Oil,
                "{} does not hold vif {} (ttl {}) of {}",
                flag.protocol_name(),
                vif,
                entry.output_ttl[vif],
                sg
            );
            return Err(OilError::NotPresentForProtocol { vif, flag });
        }

        entry.oif_flags[vif].remove(flag);

        if entry.oif_flags[vif].intersects(OifFlags::PROTO_ANY) {
            if entry.output_ttl[vif] == 0 {
                log_debug!(
                    logger,
                    Facility::Oil,
                    "{} removed from vif {} of {} which has no TTL",
                    flag.protocol_name(),
                    vif,
                    sg
                );
            }
            return Ok(DelOutcome::StillWanted);
        }

        if entry.output_ttl[vif] == 0 {
            log_debug!(
                logger,
                Facility::Oil,
                "vif {} is not an output of {}",
                vif,
                sg
            );
            return Err(OilError::NoSuchOutput { vif });
        }

        if let Err(e) = entry.zero_output(vif, kernel) {
            log_warning!(
                logger,
                Facility::Mroute,
                "could not remove output vif {} from {}: {}",
                vif,
                sg,
                e
            );
            return Err(OilError::Kernel(e));
        }

        log_debug!(
            logger,
            Facility::Oil,
            "{} removed output vif {} from {}, {} active",
            flag.protocol_name(),
            vif,
            sg,
            entry.active_oif_count
        );

        if self.release_if_empty(sg, kernel, logger) {
            Ok(DelOutcome::Released)
        } else {
            Ok(DelOutcome::Deactivated)
        }
    }

    /// Zero the TTL of every orphan output of `sg`. Returns how many were
    /// cleared; the entry is released if nothing is left.
    pub fn clear_orphan_outputs(
        &mut self,
        sg: &Sg,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> usize {
        let Some(entry) = self.entries.get_mut(sg) else {
            return 0;
        };
        let mut cleared = 0;
        for vif in entry.orphan_outputs() {
            if let Err(e) = entry.zero_output(vif, kernel) {
                log_warning!(
                    logger,
                    Facility::Mroute,
                    "could not remove orphan output vif {} from {}: {}",
                    vif,
                    sg,
                    e
                );
                break;
            }
            log_info!(
                logger,
                Facility::Oil,
                "cleared orphan output vif {} of {}",
                vif,
                sg
            );
            cleared += 1;
        }
        if cleared > 0 {
            self.release_if_empty(sg, kernel, logger);
        }
        cleared
    }

    /// Drop `vif` from every entry, whichever protocols hold it. Used when
    /// the vif itself goes away. Returns the number of entries touched.
    pub(crate) fn remove_vif(
        &mut self,
        vif: VifIndex,
        kernel: &mut dyn MfcKernel,
        logger: &Logger,
    ) -> usize {
        if vif >= MAXVIFS {
            return 0;
        }
        let mut touched = 0;
        for sg in self.keys() {
            let Some(entry) = self.entries.get_mut(&sg) else {
                continue;
            };
            let held = entry.oif_flags[vif];
            if held.is_empty() && entry.output_ttl[vif] == 0 {
                continue;
            }
            touched += 1;
            entry.oif_flags[vif] = OifFlags::empty();
            match entry.zero_output(vif, kernel) {
                Ok(()) => log_info!(
                    logger,
                    Facility::Oil,
                    "{}: output vif {} held by {:?} went away",
                    sg,
                    vif,
                    held
                ),
                Err(e) => {
                    log_warning!(
                        logger,
                        Facility::Mroute,
                        "{}: could not remove vanished output vif {}: {}",
                        sg,
                        vif,
                        e
                    );
                    continue;
                }
            }
            self.release_if_empty(&sg, kernel, logger);
        }
        touched
    }

    /// Remove an entry with no outputs from the kernel and the table.
    /// Returns true if it was released.
    fn release_if_empty(&mut self, sg: &Sg, kernel: &mut dyn MfcKernel, logger: &Logger) -> bool {
        let Some(entry) = self.entries.get_mut(sg) else {
            return false;
        };
        if entry.active_oif_count > 0 {
            return false;
        }

        // Leaked kernel state is preferred over a dangling entry
        if let Err(e) = entry.uninstall(kernel) {
            log_warning!(
                logger,
                Facility::Mroute,
                "failure removing {} from the kernel: {}",
                sg,
                e
            );
        }
        self.release(sg, logger);
        true
    }
}
