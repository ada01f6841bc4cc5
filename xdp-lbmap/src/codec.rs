//! Conversions between operator input and the forward table's binary layout.
//!
//! The XDP program reads `daddr` and `dport` straight out of the map value and
//! compares them against packet headers, so both fields must hold their bytes
//! in network order in memory. Packing is done with explicit little-endian
//! conversions rather than `to_be()` so the stored bytes do not depend on the
//! host.

use std::net::Ipv4Addr;

use thiserror::Error;
use xdp_lbmap_common::{FingerprintKey, TOKEN_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("not a dotted-decimal IPv4 address")]
    Address,
    #[error("not a port number in 0..=65535")]
    Port,
    #[error("odd number of hex digits")]
    OddLength,
    #[error("invalid hex digit at offset {0}")]
    InvalidHex(usize),
    #[error("decoded to {0} bytes, key width is 8")]
    KeyWidth(usize),
}

/// Pack a dotted-decimal IPv4 address into the table's `daddr` field.
pub fn encode_address(addr: &str) -> Result<u32, CodecError> {
    let ip: Ipv4Addr = addr.trim().parse().map_err(|_| CodecError::Address)?;
    Ok(u32::from_le_bytes(ip.octets()))
}

/// Render a `daddr` field as dotted decimal.
pub fn decode_address(daddr: u32) -> String {
    Ipv4Addr::from(daddr.to_le_bytes()).to_string()
}

/// Pack a decimal port number into the table's `dport` field.
pub fn encode_port(port: &str) -> Result<u16, CodecError> {
    let port: u16 = port.trim().parse().map_err(|_| CodecError::Port)?;

    let mut buf = [0u8; 2];
    buf[0] = (port >> 8) as u8;
    buf[1] = port as u8;
    Ok(u16::from_le_bytes(buf))
}

/// Recover the port number from a `dport` field.
pub fn decode_port(dport: u16) -> u16 {
    u16::from_be_bytes(dport.to_le_bytes())
}

/// Decode a hex fingerprint token into a table key.
pub fn decode_token(token: &str) -> Result<FingerprintKey, CodecError> {
    let token = token.trim();
    if token.len() % 2 != 0 {
        return Err(CodecError::OddLength);
    }
    if let Some(pos) = token.bytes().position(|b| !b.is_ascii_hexdigit()) {
        return Err(CodecError::InvalidHex(pos));
    }

    let decoded = token.len() / 2;
    if decoded != TOKEN_LEN {
        return Err(CodecError::KeyWidth(decoded));
    }

    let mut key = [0u8; TOKEN_LEN];
    for (i, byte) in key.iter_mut().enumerate() {
        let pair = &token[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| CodecError::InvalidHex(i * 2))?;
    }
    Ok(key)
}

/// Render a table key as lowercase hex.
pub fn encode_token(key: &FingerprintKey) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}
