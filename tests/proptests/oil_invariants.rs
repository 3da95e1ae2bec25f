// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Property-Based Tests: output interface lists
//!
//! Random sequences of per-protocol add/remove requests, with the kernel
//! randomly refusing updates, are applied to a forwarding cache entry.
//!
//! # Coverage
//!
//! - **Flag/TTL mirror:** after every operation a vif held by some protocol
//!   has a nonzero TTL and the active output count equals the number of
//!   nonzero TTLs. A rejected delete may leave orphan outputs (TTL, no
//!   protocol); once the kernel accepts again, clearing them restores the
//!   exact mirror.
//! - **Kernel mirror:** an installed entry's kernel copy has the same
//!   outputs as the table.
//! - **Round trip:** a successful add followed by a delete with the same
//!   protocol and vif restores that vif's flags and TTL.

#[cfg(test)]
mod tests {
    use pim_mfc::logging::Logger;
    use pim_mfc::mroute::MemoryMfc;
    use pim_mfc::oil::{DelOutcome, OilTable};
    use pim_mfc::{OifFlags, Sg, VifIndex};
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    const INPUT_VIF: VifIndex = 1;

    #[derive(Debug, Clone)]
    enum Op {
        Add(VifIndex, OifFlags),
        Del(VifIndex, OifFlags),
        KernelRejects(bool),
    }

    fn flag() -> impl Strategy<Value = OifFlags> {
        prop_oneof![
            Just(OifFlags::IGMP),
            Just(OifFlags::PIM),
            Just(OifFlags::STATIC),
        ]
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (1usize..6, flag()).prop_map(|(v, f)| Op::Add(v, f)),
            4 => (1usize..6, flag()).prop_map(|(v, f)| Op::Del(v, f)),
            1 => any::<bool>().prop_map(Op::KernelRejects),
        ]
    }

    fn sg() -> Sg {
        Sg::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(224, 1, 1, 1))
    }

    fn check(table: &OilTable, kernel: &MemoryMfc) -> Result<(), TestCaseError> {
        if let Some(entry) = table.get(&sg()) {
            prop_assert!(entry.active_oif_count() > 0);
            prop_assert_eq!(entry.active_oif_count(), entry.outputs().len());
            for vif in 0..pim_mfc::MAXVIFS {
                if !entry.oif_flags(vif).is_empty() {
                    prop_assert!(entry.output_ttl(vif) > 0);
                }
            }
            if entry.is_installed() {
                let installed = kernel.entry(&sg());
                prop_assert!(installed.is_some());
                prop_assert_eq!(installed.unwrap().outputs(), entry.outputs());
            }
        } else {
            prop_assert!(kernel.entry(&sg()).is_none());
        }
        Ok(())
    }

    proptest! {
        /// **Property:** the flag/TTL mirror and output count hold after
        /// every operation, whatever the kernel does.
        #[test]
        fn test_oil_invariants_hold(ops in prop::collection::vec(op(), 1..60)) {
            let logger = Logger::null();
            let kernel = MemoryMfc::new();
            let mut backend = kernel.clone();
            let mut table = OilTable::new();

            for op in ops {
                match op {
                    Op::Add(vif, flag) => {
                        let _ = table.add_oif_or_create(
                            sg(), Some(INPUT_VIF), vif, flag, 1, &mut backend, &logger,
                        );
                    }
                    Op::Del(vif, flag) => {
                        let _ = table.del_oif(&sg(), vif, flag, &mut backend, &logger);
                    }
                    Op::KernelRejects(reject) => kernel.reject_installs(reject),
                }
                check(&table, &kernel)?;
            }

            kernel.reject_installs(false);
            table.clear_orphan_outputs(&sg(), &mut backend, &logger);
            check(&table, &kernel)?;
            if let Some(entry) = table.get(&sg()) {
                prop_assert!(entry.is_consistent());
                prop_assert!(entry.orphan_outputs().is_empty());
            }
        }

        /// **Property:** add then delete with the same protocol and vif
        /// leaves that vif as it was.
        #[test]
        fn test_add_del_round_trip(
            setup in prop::collection::vec((2usize..6, flag()), 0..10),
            vif in 2usize..6,
            flag in flag(),
        ) {
            let logger = Logger::null();
            let mut kernel = MemoryMfc::new();
            let mut table = OilTable::new();
            for (v, f) in setup {
                let _ = table.add_oif_or_create(sg(), Some(INPUT_VIF), v, f, 1, &mut kernel, &logger);
            }

            let before = table
                .get(&sg())
                .map(|e| (e.oif_flags(vif), e.output_ttl(vif), e.active_oif_count()));

            if table
                .add_oif_or_create(sg(), Some(INPUT_VIF), vif, flag, 1, &mut kernel, &logger)
                .is_ok()
            {
                let outcome = table.del_oif(&sg(), vif, flag, &mut kernel, &logger).unwrap();
                match (table.get(&sg()), before) {
                    (Some(entry), Some((flags_before, ttl_before, count_before))) => {
                        prop_assert_eq!(entry.oif_flags(vif), flags_before);
                        prop_assert_eq!(entry.output_ttl(vif), ttl_before);
                        prop_assert_eq!(entry.active_oif_count(), count_before);
                    }
                    (None, None) => prop_assert_eq!(outcome, DelOutcome::Released),
                    (after, before) => prop_assert!(
                        false,
                        "entry presence changed: before {:?}, after {}",
                        before,
                        after.is_some()
                    ),
                }
            }
        }

        /// **Property:** removing a protocol twice never reaches the kernel
        /// the second time.
        #[test]
        fn test_second_delete_is_bookkeeping_only(vif in 2usize..6, flag in flag()) {
            let logger = Logger::null();
            let kernel = MemoryMfc::new();
            let mut backend = kernel.clone();
            let mut table = OilTable::new();
            table
                .add_oif_or_create(sg(), Some(INPUT_VIF), 7, OifFlags::PIM, 1, &mut backend, &logger)
                .unwrap();
            table.add_oif(&sg(), vif, flag, 1, &mut backend, &logger).unwrap();

            prop_assert!(table.del_oif(&sg(), vif, flag, &mut backend, &logger).is_ok());
            let installs = kernel.install_count();
            kernel.reject_installs(true);
            let second = table.del_oif(&sg(), vif, flag, &mut backend, &logger);
            let second_is_absent = matches!(
                second,
                Err(pim_mfc::oil::OilError::NotPresentForProtocol { .. })
                    | Err(pim_mfc::oil::OilError::NoSuchOutput { .. })
            );
            prop_assert!(second_is_absent);
            prop_assert_eq!(kernel.install_count(), installs);
        }
    }
}
