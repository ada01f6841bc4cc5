//! Shared types between the xdp-lbmap control plane and the XDP load balancer.
//!
//! This crate is `no_std` compatible so it can be used in eBPF programs.
//! All types must be `repr(C)` for stable ABI across eBPF and userspace.

#![no_std]

/// Capacity of the forward table, fixed when the kernel program creates it.
pub const FORWARD_TABLE_MAX_ENTRIES: u32 = 4096;

/// Width of a fingerprint token key in bytes.
pub const TOKEN_LEN: usize = 8;

/// Version of the key/value layout below. Any change to `FingerprintKey` or
/// `ForwardEntry` is a new version and needs an explicit table migration.
pub const FORWARD_TABLE_LAYOUT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// eBPF Map Key/Value Types
// ---------------------------------------------------------------------------

/// Key for the forward table: an opaque 8-byte fingerprint token.
pub type FingerprintKey = [u8; TOKEN_LEN];

/// Value for the forward table: where a packet carrying the token is sent.
///
/// Mirrors `struct dest_info` in the XDP program.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ForwardEntry {
    /// Destination IPv4 address, octets packed little-endian.
    pub daddr: u32,
    /// Destination port, bytes stored in network order.
    pub dport: u16,
    /// Alignment only. Always zero.
    pub padding: u16,
}

impl ForwardEntry {
    pub const fn new(daddr: u32, dport: u16) -> Self {
        Self {
            daddr,
            dport,
            padding: 0,
        }
    }
}

#[cfg(feature = "userspace")]
unsafe impl aya::Pod for ForwardEntry {}

const _: () = assert!(core::mem::size_of::<FingerprintKey>() == 8);
const _: () = assert!(core::mem::size_of::<ForwardEntry>() == 8);

// ---------------------------------------------------------------------------
// eBPF Map Names and Pin Paths
// ---------------------------------------------------------------------------

/// Map name: HashMap<FingerprintKey, ForwardEntry>, token-to-destination mapping.
pub const MAP_FORWARD_PARAMS: &str = "forward_params";

/// Default bpffs pin path of the forward table.
pub const DEFAULT_FORWARD_PARAMS_PIN: &str = "/sys/fs/bpf/ens5/forward_params";

// ---------------------------------------------------------------------------
// Batch Fill
// ---------------------------------------------------------------------------

/// Destination written by the synthetic batch fill.
pub const BATCH_PLACEHOLDER: ForwardEntry = ForwardEntry::new(65535, 4000);

/// Range of the first key byte covered by the batch fill.
pub const BATCH_OUTER: u8 = 255;

/// Range of the second key byte covered by the batch fill.
pub const BATCH_INNER: u8 = 15;
