// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-generation hardware back-ends.
//!
//! The three ASIC generations share one DR protocol but disagree on where
//! the registers live, where the wrap bit sits in a ring pointer, which
//! optional features exist, and how completion headers are laid out. All of
//! that is captured behind [`DrBackend`]; a device picks its back-end once,
//! from its [`Family`], and keeps the `&'static` reference for its lifetime.

use drv_asic_dr_api::{
    Bus, CompletionHeader, Family, RingId, RxHeader, MAX_RING_BYTES,
};

use crate::config::RingConfig;

mod gen1;
mod gen2;
mod gen3;

pub use gen1::Gen1;
pub use gen2::Gen2;
pub use gen3::Gen3;

/// Returns the back-end for a hardware family.
pub fn backend_for(family: Family) -> &'static dyn DrBackend {
    match family {
        Family::Gen1 => &Gen1,
        Family::Gen2 => &Gen2,
        Family::Gen3 => &Gen3,
    }
}

/// Encoding of a ring pointer shared with hardware.
///
/// A pointer is an index (in the view) or a byte offset (in hardware
/// registers and pushed-pointer memory) in the low bits, with a wrap bit
/// above it that flips each time the index passes the end of the ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PtrFormat {
    pub wrap_bit: u32,
}

impl PtrFormat {
    pub const fn wrap_mask(self) -> u32 {
        1 << self.wrap_bit
    }

    pub const fn ptr_mask(self) -> u32 {
        self.wrap_mask() - 1
    }

    pub const fn index(self, p: u32) -> u32 {
        p & self.ptr_mask()
    }

    pub const fn wrap(self, p: u32) -> u32 {
        p & self.wrap_mask()
    }

    /// Moves `p` forward one slot in a ring of `entries` slots.
    pub fn advance(self, p: u32, entries: u32) -> u32 {
        let index = self.index(p);
        if index + 1 >= entries {
            self.wrap(p) ^ self.wrap_mask()
        } else {
            self.wrap(p) | (index + 1)
        }
    }

    /// Converts a view pointer to the byte-offset form hardware uses.
    pub fn to_hw(self, p: u32, desc_bytes: u32) -> u32 {
        self.wrap(p) | (self.index(p) * desc_bytes)
    }

    /// Converts a hardware byte-offset pointer to a view pointer.
    pub fn from_hw(self, raw: u32, desc_bytes: u32) -> u32 {
        self.wrap(raw) | (self.index(raw) / desc_bytes)
    }
}

// Byte offsets within the largest ring must stay below every wrap bit.
static_assertions::const_assert!(MAX_RING_BYTES <= 1 << 20);

/// Register offsets inside one ring's DR register block.
#[derive(Copy, Clone, Debug)]
pub struct DruOffsets {
    pub ctrl: u32,
    pub size: u32,
    pub base_lo: u32,
    pub base_hi: u32,
    pub limit_lo: u32,
    pub limit_hi: u32,
    pub head: u32,
    pub tail: u32,
    pub ring_timeout: u32,
    pub data_timeout: u32,
}

/// Where a generation puts its DR-related registers.
#[derive(Copy, Clone, Debug)]
pub struct RegMap {
    /// Base of each bus's register space, indexed by `Bus as usize`.
    pub bus_base: [u32; 4],
    /// Offset of the first ring block from its bus base.
    pub rings_offset: u32,
    /// Distance between consecutive ring blocks on one bus.
    pub ring_stride: u32,
    pub dru: DruOffsets,
    pub ctrl_enable: u32,
    /// Zero if the generation has no pushed-pointer mode.
    pub ctrl_pushed_ptr: u32,

    /// Bus flush control, relative to the bus base.
    pub bus_flush: u32,
    pub flush_bit: u32,
    /// Bus status, relative to the bus base.
    pub bus_status: u32,
    pub status_flush_pending: u32,
    /// Write-one-to-clear.
    pub status_link_down: u32,
    /// Arbitration control for the rings on a bus, relative to the bus base.
    pub bus_arb: u32,

    /// Device-wide DMA control.
    pub dma_ctrl: u32,
    pub dma_enable: u32,
    /// Device-wide weights between the buses.
    pub glb_arb: u32,
}

impl RegMap {
    pub fn bus(&self, bus: Bus) -> u32 {
        self.bus_base[bus as usize]
    }

    /// Base of the register block belonging to `ring`.
    pub fn ring_block(&self, ring: RingId) -> u32 {
        self.bus(ring.bus())
            + self.rings_offset
            + ring.bus_slot() as u32 * self.ring_stride
    }
}

/// Absolute register offsets for one ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RingRegs {
    pub ctrl: u32,
    pub size: u32,
    pub base_lo: u32,
    pub base_hi: u32,
    pub limit_lo: u32,
    pub limit_hi: u32,
    pub head: u32,
    pub tail: u32,
    pub ring_timeout: u32,
    pub data_timeout: u32,
}

/// A fixed register write, used for tuning defaults and flush tweaks.
pub type RegWrite = (u32, u32);

/// Everything about the DR engine that differs between generations.
pub trait DrBackend: Sync {
    fn family(&self) -> Family;

    /// Number of valid ring ids; every id below this is valid.
    fn ring_count(&self) -> usize;

    fn max_subdevices(&self) -> usize;

    fn ptr_format(&self) -> PtrFormat;

    fn reg_map(&self) -> &'static RegMap;

    /// Fixed arbitration weights between buses, written at init.
    fn default_global_arbitration(&self) -> &'static [RegWrite];

    /// Arbitration between the rings on `bus`, written at init when a ring
    /// on that bus is in use.
    fn default_bus_arbitration(&self, bus: Bus) -> &'static [RegWrite];

    /// Writes required before `bus` may be flushed.
    fn pre_flush(&self, bus: Bus) -> &'static [RegWrite];

    fn decode_completion(&self, header: u64) -> CompletionHeader;

    fn decode_rx(&self, header: u64) -> RxHeader {
        let h = RxHdr(header);
        RxHeader {
            start: h.start(),
            end: h.end(),
            size: h.size(),
            pipe: h.pipe(),
        }
    }

    fn words_per_descriptor(&self, ring: RingId) -> usize {
        ring.words_per_descriptor()
    }

    fn supports_pushed_pointer(&self) -> bool {
        self.reg_map().ctrl_pushed_ptr != 0
    }

    fn is_valid(&self, ring: RingId) -> bool {
        ring.index() < self.ring_count()
    }

    /// The out-of-reset configuration of a ring: no depth yet.
    fn default_config(&self, ring: RingId) -> RingConfig {
        RingConfig {
            kind: ring.kind(),
            producer: ring.is_host_producer(),
            words: self.words_per_descriptor(ring),
            depth: 0,
        }
    }

    fn ring_regs(&self, ring: RingId) -> RingRegs {
        let map = self.reg_map();
        let base = map.ring_block(ring);
        let o = &map.dru;
        RingRegs {
            ctrl: base + o.ctrl,
            size: base + o.size,
            base_lo: base + o.base_lo,
            base_hi: base + o.base_hi,
            limit_lo: base + o.limit_lo,
            limit_hi: base + o.limit_hi,
            head: base + o.head,
            tail: base + o.tail,
            ring_timeout: base + o.ring_timeout,
            data_timeout: base + o.data_timeout,
        }
    }
}

bitfield::bitfield! {
    /// Header word of a receive-ring descriptor; the same on all
    /// generations. The second word holds the buffer address.
    #[derive(Copy, Clone)]
    pub struct RxHdr(u64);
    pub start, set_start: 0;
    pub end, set_end: 1;
    pub u8, kind, set_kind: 6, 2;
    pub u8, pipe, set_pipe: 9, 7;
    pub u32, size, set_size: 63, 32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_asic_dr_api::{COMMON_RING_COUNT, RING_ID_COUNT};

    const FMT: PtrFormat = PtrFormat { wrap_bit: 20 };

    #[test]
    fn advance_toggles_wrap_at_end() {
        assert_eq!(FMT.advance(0, 8), 1);
        assert_eq!(FMT.advance(6, 8), 7);
        assert_eq!(FMT.advance(7, 8), 1 << 20);
        assert_eq!(FMT.advance((1 << 20) | 7, 8), 0);
    }

    #[test]
    fn hw_conversion() {
        let p = (1 << 20) | 5;
        assert_eq!(FMT.to_hw(p, 16), (1 << 20) | 80);
        assert_eq!(FMT.from_hw((1 << 20) | 80, 16), p);
        assert_eq!(FMT.from_hw(32, 32), 1);
    }

    #[test]
    fn ring_counts() {
        assert_eq!(backend_for(Family::Gen1).ring_count(), COMMON_RING_COUNT);
        assert_eq!(backend_for(Family::Gen2).ring_count(), RING_ID_COUNT);
        assert_eq!(backend_for(Family::Gen3).ring_count(), RING_ID_COUNT);
        assert!(!Gen1.is_valid(RingId::CmpQueReadBlock0));
        assert!(Gen2.is_valid(RingId::CmpQueReadBlock0));
    }

    #[test]
    fn ring_register_blocks_do_not_overlap() {
        for family in [Family::Gen1, Family::Gen2, Family::Gen3] {
            let b = backend_for(family);
            let map = b.reg_map();
            let mut blocks: Vec<u32> = RingId::iter(b.ring_count())
                .map(|r| map.ring_block(r))
                .collect();
            blocks.sort_unstable();
            for pair in blocks.windows(2) {
                assert!(pair[1] - pair[0] >= map.ring_stride, "{family:?}");
            }
        }
    }

    #[test]
    fn rx_header_fields() {
        let mut h = RxHdr(0);
        h.set_start(true);
        h.set_pipe(5);
        h.set_size(1500);
        let d = Gen2.decode_rx(h.0);
        assert!(d.start);
        assert!(!d.end);
        assert_eq!(d.pipe, 5);
        assert_eq!(d.size, 1500);
    }
}
