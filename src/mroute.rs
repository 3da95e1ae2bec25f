// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Kernel multicast forwarding cache (MFC)
//!
//! [`MfcKernel`] is the narrow interface the control plane uses to program
//! forwarding: vif add/delete and MFC entry install/remove. Two backends:
//!
//! - [`LinuxMfc`] talks to the kernel through the multicast routing socket
//!   (`MRT_*` socket options on a raw IGMP socket). Only one process per
//!   network namespace can own that socket.
//! - [`MemoryMfc`] keeps entries in process. It backs the `memory` kernel
//!   setting and the tests, and can be told to reject calls.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::logging::{Facility, Logger};
use crate::{Sg, VifIndex, MAXVIFS};

/// The `(input_vif, {output_vif: ttl})` view of a forwarding cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfcEntry {
    pub sg: Sg,
    pub input_vif: VifIndex,
    pub ttls: [u8; MAXVIFS],
}

impl MfcEntry {
    /// Vifs with a nonzero TTL
    pub fn outputs(&self) -> Vec<VifIndex> {
        self.ttls
            .iter()
            .enumerate()
            .filter(|(_, ttl)| **ttl > 0)
            .map(|(vif, _)| vif)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("{op} failed for {target}: {source}")]
    Io {
        op: &'static str,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} rejected for {target}")]
    Rejected { op: &'static str, target: String },
}

/// Kernel forwarding table operations
pub trait MfcKernel: Send {
    fn add_vif(&mut self, vif: VifIndex, ifindex: u32, local: Ipv4Addr)
        -> Result<(), KernelError>;

    fn del_vif(&mut self, vif: VifIndex) -> Result<(), KernelError>;

    /// Add or replace the MFC entry for `entry.sg`
    fn install(&mut self, entry: &MfcEntry) -> Result<(), KernelError>;

    fn remove(&mut self, entry: &MfcEntry) -> Result<(), KernelError>;
}

// Multicast routing socket options (linux/mroute.h)
const MRT_BASE: libc::c_int = 200;
const MRT_INIT: libc::c_int = MRT_BASE;
const MRT_DONE: libc::c_int = MRT_BASE + 1;
const MRT_ADD_VIF: libc::c_int = MRT_BASE + 2;
const MRT_DEL_VIF: libc::c_int = MRT_BASE + 3;
const MRT_ADD_MFC: libc::c_int = MRT_BASE + 4;
const MRT_DEL_MFC: libc::c_int = MRT_BASE + 5;

/// `vifc_lcl_ifindex` holds an ifindex rather than a local address
const VIFF_USE_IFINDEX: u8 = 0x8;

/// struct vifctl
#[repr(C)]
struct VifCtl {
    vifc_vifi: libc::c_ushort,
    vifc_flags: libc::c_uchar,
    vifc_threshold: libc::c_uchar,
    vifc_rate_limit: libc::c_uint,
    /// union { vifc_lcl_addr; vifc_lcl_ifindex }
    vifc_lcl_ifindex: libc::c_int,
    vifc_rmt_addr: libc::in_addr,
}

/// struct mfcctl
#[repr(C)]
struct MfcCtl {
    mfcc_origin: libc::in_addr,
    mfcc_mcastgrp: libc::in_addr,
    mfcc_parent: libc::c_ushort,
    mfcc_ttls: [libc::c_uchar; MAXVIFS],
    mfcc_pkt_cnt: libc::c_uint,
    mfcc_byte_cnt: libc::c_uint,
    mfcc_wrong_if: libc::c_uint,
    mfcc_expire: libc::c_int,
}

fn in_addr(addr: Ipv4Addr) -> libc::in_addr {
    libc::in_addr {
        s_addr: u32::from(addr).to_be(),
    }
}

impl MfcCtl {
    fn from_entry(entry: &MfcEntry) -> Self {
        Self {
            mfcc_origin: in_addr(entry.sg.source),
            mfcc_mcastgrp: in_addr(entry.sg.group),
            mfcc_parent: entry.input_vif as libc::c_ushort,
            mfcc_ttls: entry.ttls,
            mfcc_pkt_cnt: 0,
            mfcc_byte_cnt: 0,
            mfcc_wrong_if: 0,
            mfcc_expire: 0,
        }
    }
}

fn setsockopt_ip<T>(fd: RawFd, option: libc::c_int, value: &T) -> std::io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            option,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Kernel MFC programmed through the multicast routing socket
pub struct LinuxMfc {
    socket: socket2::Socket,
    logger: Logger,
}

impl LinuxMfc {
    /// Open the multicast routing socket and enable multicast routing.
    ///
    /// Needs root (or CAP_NET_ADMIN) and fails with EADDRINUSE if another
    /// multicast routing daemon owns the namespace.
    pub fn open(logger: Logger) -> Result<Self> {
        use socket2::{Domain, Protocol, Socket, Type};

        if !nix::unistd::geteuid().is_root() {
            logger.warning(
                Facility::Mroute,
                "Not running as root; MRT_INIT will fail without CAP_NET_ADMIN",
            );
        }

        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_IGMP)),
        )
        .context("Failed to create raw IGMP socket")?;

        let enable: libc::c_int = 1;
        setsockopt_ip(socket.as_raw_fd(), MRT_INIT, &enable)
            .context("MRT_INIT failed (is another multicast routing daemon running?)")?;

        logger.info(Facility::Mroute, "Multicast routing socket initialized");
        Ok(Self { socket, logger })
    }
}

impl MfcKernel for LinuxMfc {
    fn add_vif(
        &mut self,
        vif: VifIndex,
        ifindex: u32,
        local: Ipv4Addr,
    ) -> Result<(), KernelError> {
        let ctl = VifCtl {
            vifc_vifi: vif as libc::c_ushort,
            vifc_flags: VIFF_USE_IFINDEX,
            vifc_threshold: 1,
            vifc_rate_limit: 0,
            vifc_lcl_ifindex: ifindex as libc::c_int,
            vifc_rmt_addr: in_addr(Ipv4Addr::UNSPECIFIED),
        };
        setsockopt_ip(self.socket.as_raw_fd(), MRT_ADD_VIF, &ctl).map_err(|source| {
            KernelError::Io {
                op: "MRT_ADD_VIF",
                target: format!("vif {} (ifindex {}, {})", vif, ifindex, local),
                source,
            }
        })
    }

    fn del_vif(&mut self, vif: VifIndex) -> Result<(), KernelError> {
        let ctl = VifCtl {
            vifc_vifi: vif as libc::c_ushort,
            vifc_flags: 0,
            vifc_threshold: 0,
            vifc_rate_limit: 0,
            vifc_lcl_ifindex: 0,
            vifc_rmt_addr: in_addr(Ipv4Addr::UNSPECIFIED),
        };
        setsockopt_ip(self.socket.as_raw_fd(), MRT_DEL_VIF, &ctl).map_err(|source| {
            KernelError::Io {
                op: "MRT_DEL_VIF",
                target: format!("vif {}", vif),
                source,
            }
        })
    }

    fn install(&mut self, entry: &MfcEntry) -> Result<(), KernelError> {
        let ctl = MfcCtl::from_entry(entry);
        setsockopt_ip(self.socket.as_raw_fd(), MRT_ADD_MFC, &ctl).map_err(|source| {
            KernelError::Io {
                op: "MRT_ADD_MFC",
                target: entry.sg.to_string(),
                source,
            }
        })
    }

    fn remove(&mut self, entry: &MfcEntry) -> Result<(), KernelError> {
        let ctl = MfcCtl::from_entry(entry);
        setsockopt_ip(self.socket.as_raw_fd(), MRT_DEL_MFC, &ctl).map_err(|source| {
            KernelError::Io {
                op: "MRT_DEL_MFC",
                target: entry.sg.to_string(),
                source,
            }
        })
    }
}

impl Drop for LinuxMfc {
    fn drop(&mut self) {
        let disable: libc::c_int = 1;
        if let Err(e) = setsockopt_ip(self.socket.as_raw_fd(), MRT_DONE, &disable) {
            self.logger
                .warning(Facility::Mroute, &format!("MRT_DONE failed: {}", e));
        }
    }
}

#[derive(Debug, Default)]
struct MemoryMfcState {
    entries: BTreeMap<Sg, MfcEntry>,
    vifs: BTreeMap<VifIndex, (u32, Ipv4Addr)>,
    install_calls: usize,
    remove_calls: usize,
    reject_installs: bool,
    reject_removes: bool,
}

/// In-process MFC.
///
/// Clones share state, so a test can keep one handle while the routing
/// state owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryMfc {
    state: Arc<Mutex<MemoryMfcState>>,
}

impl MemoryMfc {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryMfcState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn entry(&self, sg: &Sg) -> Option<MfcEntry> {
        self.with(|s| s.entries.get(sg).cloned())
    }

    pub fn entries(&self) -> Vec<MfcEntry> {
        self.with(|s| s.entries.values().cloned().collect())
    }

    pub fn vifs(&self) -> Vec<(VifIndex, u32)> {
        self.with(|s| s.vifs.iter().map(|(v, (idx, _))| (*v, *idx)).collect())
    }

    /// Number of install calls received, including rejected ones
    pub fn install_count(&self) -> usize {
        self.with(|s| s.install_calls)
    }

    pub fn remove_count(&self) -> usize {
        self.with(|s| s.remove_calls)
    }

    pub fn reject_installs(&self, reject: bool) {
        self.with(|s| s.reject_installs = reject);
    }

    pub fn reject_removes(&self, reject: bool) {
        self.with(|s| s.reject_removes = reject);
    }
}

impl MfcKernel for MemoryMfc {
    fn add_vif(
        &mut self,
        vif: VifIndex,
        ifindex: u32,
        local: Ipv4Addr,
    ) -> Result<(), KernelError> {
        self.with(|s| {
            s.vifs.insert(vif, (ifindex, local));
        });
        Ok(())
    }

    fn del_vif(&mut self, vif: VifIndex) -> Result<(), KernelError> {
        self.with(|s| match s.vifs.remove(&vif) {
            Some(_) => Ok(()),
            None => Err(KernelError::Rejected {
                op: "MRT_DEL_VIF",
                target: format!("vif {}", vif),
            }),
        })
    }

    fn install(&mut self, entry: &MfcEntry) -> Result<(), KernelError> {
        self.with(|s| {
            s.install_calls += 1;
            if s.reject_installs {
                return Err(KernelError::Rejected {
                    op: "MRT_ADD_MFC",
                    target: entry.sg.to_string(),
                });
            }
            s.entries.insert(entry.sg, entry.clone());
            Ok(())
        })
    }

    fn remove(&mut self, entry: &MfcEntry) -> Result<(), KernelError> {
        self.with(|s| {
            s.remove_calls += 1;
            if s.reject_removes {
                return Err(KernelError::Rejected {
                    op: "MRT_DEL_MFC",
                    target: entry.sg.to_string(),
                });
            }
            match s.entries.remove(&entry.sg) {
                Some(_) => Ok(()),
                None => Err(KernelError::Rejected {
                    op: "MRT_DEL_MFC",
                    target: entry.sg.to_string(),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(input_vif: VifIndex, outputs: &[VifIndex]) -> MfcEntry {
        let mut ttls = [0u8; MAXVIFS];
        for vif in outputs {
            ttls[*vif] = 1;
        }
        MfcEntry {
            sg: Sg::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(239, 1, 1, 1)),
            input_vif,
            ttls,
        }
    }

    #[test]
    fn test_mfcctl_layout_matches_kernel() {
        // 4 + 4 + 2 + 32 + 2 padding + 4 * 4
        assert_eq!(std::mem::size_of::<MfcCtl>(), 60);
        assert_eq!(std::mem::size_of::<VifCtl>(), 16);
    }

    #[test]
    fn test_mfcctl_from_entry() {
        let ctl = MfcCtl::from_entry(&entry(1, &[2, 3]));
        assert_eq!(ctl.mfcc_parent, 1);
        assert_eq!(ctl.mfcc_ttls[2], 1);
        assert_eq!(ctl.mfcc_ttls[1], 0);
        assert_eq!(
            ctl.mfcc_origin.s_addr,
            u32::from(Ipv4Addr::new(10, 0, 0, 1)).to_be()
        );
    }

    #[test]
    fn test_memory_mfc_install_replace_remove() {
        let mut kernel = MemoryMfc::new();
        let observer = kernel.clone();

        kernel.install(&entry(1, &[2])).unwrap();
        kernel.install(&entry(1, &[2, 3])).unwrap();
        let sg = entry(1, &[]).sg;
        assert_eq!(observer.entry(&sg).unwrap().outputs(), vec![2, 3]);
        assert_eq!(observer.install_count(), 2);

        kernel.remove(&entry(1, &[])).unwrap();
        assert!(observer.entry(&sg).is_none());
        assert!(kernel.remove(&entry(1, &[])).is_err());
        assert_eq!(observer.remove_count(), 2);
    }

    #[test]
    fn test_memory_mfc_rejects_on_request() {
        let mut kernel = MemoryMfc::new();
        kernel.reject_installs(true);
        let err = kernel.install(&entry(1, &[2])).unwrap_err();
        assert!(err.to_string().contains("MRT_ADD_MFC"));
        assert!(kernel.entries().is_empty());
    }

    #[test]
    fn test_memory_mfc_vifs() {
        let mut kernel = MemoryMfc::new();
        kernel
            .add_vif(1, 7, Ipv4Addr::new(192, 168, 1, 1))
            .unwrap();
        assert_eq!(kernel.vifs(), vec![(1, 7)]);
        kernel.del_vif(1).unwrap();
        assert!(kernel.del_vif(1).is_err());
    }

    #[test]
    #[ignore]
    #[pim_test_macros::requires_root]
    fn test_linux_mfc_open() {
        let kernel = LinuxMfc::open(Logger::null());
        assert!(kernel.is_ok(), "MRT_INIT failed: {:?}", kernel.err());
    }
}
