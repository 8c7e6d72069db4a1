//! # NUMA Placement Helpers
//!
//! Thin wrappers over the Linux memory-policy and affinity syscalls:
//!
//! - [`numa_available`] / [`node_count`]: topology discovery via sysfs.
//! - [`ScopedNumaPreferred`]: RAII guard that biases page-fault placement
//!   toward one node (`set_mempolicy(MPOL_PREFERRED)`) and restores the
//!   default policy on drop. Engine memory holds one while constructing
//!   each node's structures.
//! - [`bind_region_to_node`]: `mbind` an already-mapped region so its
//!   pages fault onto the given node.
//! - [`pin_to_node`]: bind the calling thread's CPU affinity to every CPU
//!   of a node. Workers call this once, first thing in their loop.
//!
//! Placement is best-effort: an unprivileged or single-node environment
//! may reject a policy call, and the engine must still run there. Every
//! failure is logged at warn level and swallowed. Topology *absence* is
//! different: `numa_available` returning false is a fatal startup error,
//! checked by engine memory.

use std::path::Path;

use crate::thread::ThreadGroupId;

// Memory-policy modes from <linux/mempolicy.h>.
#[cfg(target_os = "linux")]
const MPOL_DEFAULT: libc::c_long = 0;
#[cfg(target_os = "linux")]
const MPOL_PREFERRED: libc::c_long = 1;

// One-u64 nodemask; node ids are < 64 on every machine we bind.
#[cfg(target_os = "linux")]
const NODEMASK_BITS: libc::c_ulong = 64;

/// True iff the machine exposes a NUMA topology the engine can bind to.
pub fn numa_available() -> bool {
    cfg!(target_os = "linux") && Path::new("/sys/devices/system/node/node0").exists()
}

/// Number of NUMA nodes the machine exposes (at least 1 when available).
pub fn node_count() -> usize {
    let mut count = 0;
    while Path::new(&format!("/sys/devices/system/node/node{count}")).exists() {
        count += 1;
    }
    count.max(1)
}

/// Biases allocation toward one node for the lifetime of the guard.
pub struct ScopedNumaPreferred {
    active: bool,
}

impl ScopedNumaPreferred {
    pub fn new(node: ThreadGroupId) -> Self {
        let active = set_preferred(node);
        if !active {
            tracing::warn!(node, "set_mempolicy(MPOL_PREFERRED) unavailable; allocation not biased");
        }
        Self { active }
    }
}

impl Drop for ScopedNumaPreferred {
    fn drop(&mut self) {
        if self.active {
            reset_mempolicy();
        }
    }
}

#[cfg(target_os = "linux")]
fn set_preferred(node: ThreadGroupId) -> bool {
    if u64::from(node) >= 64 {
        return false;
    }
    let mask: libc::c_ulong = 1 << node;
    // SAFETY: passes a valid one-word nodemask and its bit length.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_set_mempolicy,
            MPOL_PREFERRED,
            &mask as *const libc::c_ulong,
            NODEMASK_BITS,
        )
    };
    rc == 0
}

#[cfg(not(target_os = "linux"))]
fn set_preferred(_node: ThreadGroupId) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn reset_mempolicy() {
    // SAFETY: MPOL_DEFAULT takes no nodemask.
    unsafe {
        libc::syscall(
            libc::SYS_set_mempolicy,
            MPOL_DEFAULT,
            std::ptr::null::<libc::c_ulong>(),
            0 as libc::c_ulong,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn reset_mempolicy() {}

/// Binds an anonymous mapping to a node so its pages fault locally.
/// Best-effort; the region stays usable either way.
pub fn bind_region_to_node(addr: *mut u8, len: usize, node: ThreadGroupId) {
    if !bind_region(addr, len, node) {
        tracing::warn!(node, len, "mbind unavailable; page pool not node-bound");
    }
}

#[cfg(target_os = "linux")]
fn bind_region(addr: *mut u8, len: usize, node: ThreadGroupId) -> bool {
    if u64::from(node) >= 64 {
        return false;
    }
    let mask: libc::c_ulong = 1 << node;
    // SAFETY: addr/len describe a mapping we own; the nodemask is one word.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            addr as *mut libc::c_void,
            len as libc::c_ulong,
            MPOL_PREFERRED,
            &mask as *const libc::c_ulong,
            NODEMASK_BITS,
            0 as libc::c_uint,
        )
    };
    rc == 0
}

#[cfg(not(target_os = "linux"))]
fn bind_region(_addr: *mut u8, _len: usize, _node: ThreadGroupId) -> bool {
    false
}

/// Pins the calling thread to every CPU of the given node.
/// Best-effort; an unpinned worker is slower, not incorrect.
pub fn pin_to_node(node: ThreadGroupId) {
    match node_cpus(node) {
        Some(cpus) if !cpus.is_empty() => {
            if !set_affinity(&cpus) {
                tracing::warn!(node, "sched_setaffinity failed; worker not pinned");
            }
        }
        _ => {
            tracing::warn!(node, "no cpulist for node; worker not pinned");
        }
    }
}

/// Parses `/sys/devices/system/node/node<N>/cpulist` ("0-3,8,10-11").
fn node_cpus(node: ThreadGroupId) -> Option<Vec<usize>> {
    let text = std::fs::read_to_string(format!("/sys/devices/system/node/node{node}/cpulist")).ok()?;
    let mut cpus = Vec::new();
    for part in text.trim().split(',') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().ok()?;
                let hi: usize = hi.trim().parse().ok()?;
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.trim().parse().ok()?),
        }
    }
    Some(cpus)
}

#[cfg(target_os = "linux")]
fn set_affinity(cpus: &[usize]) -> bool {
    // SAFETY: cpu_set_t is a plain bitmask; zeroed is its empty value.
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for &cpu in cpus {
        if cpu < libc::CPU_SETSIZE as usize {
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }
    }
    // SAFETY: pid 0 targets the calling thread; the set is fully initialized.
    let rc = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
    rc == 0
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_cpus: &[usize]) -> bool {
    false
}
