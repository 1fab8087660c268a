//! Application-layer packages carried in FRMPayloads.
//!
//! Each package exposes a `Command` enum, `decode_commands(uplink, bytes)`
//! and `encode_commands(&[Command])`. Several commands may be concatenated
//! in a single payload.
pub mod clocksync;
pub mod fragmentation;
pub mod multicastsetup;

use crate::{LoRaWANError, LoRaWANResult};

/// Takes `n` bytes from `b` at `*pos`, advancing the cursor.
pub(crate) fn take<'a>(b: &'a [u8], pos: &mut usize, n: usize) -> LoRaWANResult<&'a [u8]> {
    let end = *pos + n;
    if end > b.len() {
        return Err(LoRaWANError::InvalidLength {
            expected: end,
            got: b.len(),
        });
    }
    let out = &b[*pos..end];
    *pos = end;
    Ok(out)
}

pub(crate) fn u24_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], 0])
}

pub(crate) fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Answer to `PackageVersionReq`, shared by all packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageVersionAns {
    pub package_identifier: u8,
    pub package_version: u8,
}
