// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring sizing.
//!
//! Hardware wants every ring to be a whole number of cache lines long, so a
//! requested depth is converted to bytes, rounded up to the next cache line,
//! and converted back. The configured depth can therefore be larger than the
//! one asked for; it is never smaller.

use drv_asic_dr_api::{DrError, RingKind, CACHE_LINE_BYTES, MAX_RING_BYTES};

/// Configuration of one ring on one sub-device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RingConfig {
    pub kind: RingKind,
    /// True if the host pushes descriptors into this ring.
    pub producer: bool,
    /// Descriptor width in 64-bit words.
    pub words: usize,
    /// Configured entry count; zero if this slice does not own the ring.
    pub depth: u32,
}

impl RingConfig {
    pub fn desc_bytes(&self) -> usize {
        self.words * 8
    }

    /// Bytes of descriptor memory, not counting the pushed-pointer line.
    pub fn ring_bytes(&self) -> usize {
        self.depth as usize * self.desc_bytes()
    }

    /// Bytes this ring takes out of a DMA buffer: its descriptors, rounded to
    /// a cache line, and one more line for the device's pushed pointer.
    pub fn footprint(&self) -> usize {
        align_up(self.ring_bytes(), CACHE_LINE_BYTES) + CACHE_LINE_BYTES
    }
}

pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Converts a requested depth into the depth the ring actually gets.
///
/// Fails with `BadParameter` if the unrounded ring would reach
/// [`MAX_RING_BYTES`].
pub fn round_depth(depth: u32, words: usize) -> Result<u32, DrError> {
    let desc_bytes = words * 8;
    if desc_bytes == 0 {
        return Err(DrError::BadParameter);
    }
    let bytes = (depth as usize)
        .checked_mul(desc_bytes)
        .ok_or(DrError::BadParameter)?;
    if bytes >= MAX_RING_BYTES {
        return Err(DrError::BadParameter);
    }
    let aligned = align_up(bytes, CACHE_LINE_BYTES);
    Ok((aligned / desc_bytes) as u32)
}
