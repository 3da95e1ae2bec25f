// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Kernel multicast routing socket. Needs root and a kernel with
//! CONFIG_IP_MROUTE, and no other multicast routing daemon running.

use pim_mfc::logging::Logger;
use pim_mfc::mroute::{LinuxMfc, MfcEntry, MfcKernel};
use pim_mfc::{Sg, MAXVIFS};
use pim_test_macros::requires_root;
use std::net::Ipv4Addr;

#[test]
#[ignore]
#[requires_root]
fn test_linux_mfc_install_and_remove() {
    let mut kernel = LinuxMfc::open(Logger::null()).unwrap();

    // Unresolved input vif: the kernel accepts the entry with no outputs
    let entry = MfcEntry {
        sg: Sg::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(239, 1, 2, 3)),
        input_vif: 0,
        ttls: [0; MAXVIFS],
    };
    kernel.install(&entry).unwrap();
    kernel.remove(&entry).unwrap();
    assert!(kernel.remove(&entry).is_err());
}
