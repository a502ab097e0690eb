// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Second-generation DR engine.
//!
//! Adds the queue read/write rings on cbus and pushed-pointer mode. The
//! completion header trades the data size for a 40-bit timestamp.

use bitfield::bitfield;
use drv_asic_dr_api::{Bus, CompletionHeader, Family, RING_ID_COUNT};

use super::{DrBackend, DruOffsets, PtrFormat, RegMap, RegWrite};

pub struct Gen2;

/// Ring register block layout shared by GEN2 and GEN3.
pub(super) const DRU: DruOffsets = DruOffsets {
    ctrl: 0x00,
    size: 0x04,
    base_lo: 0x08,
    base_hi: 0x0c,
    limit_lo: 0x10,
    limit_hi: 0x14,
    head: 0x18,
    tail: 0x1c,
    ring_timeout: 0x20,
    data_timeout: 0x24,
};

const REG_MAP: RegMap = RegMap {
    bus_base: [0x0300_0000, 0x0301_0000, 0x0302_0000, 0x0303_0000],
    rings_offset: 0x200,
    ring_stride: 0x80,
    dru: DRU,
    ctrl_enable: 1 << 0,
    ctrl_pushed_ptr: 1 << 2,

    bus_flush: 0x10,
    flush_bit: 1 << 0,
    bus_status: 0x14,
    status_flush_pending: 1 << 0,
    status_link_down: 1 << 4,
    bus_arb: 0x18,

    dma_ctrl: 0x0008_0000,
    dma_enable: 1 << 0,
    glb_arb: 0x0008_0010,
};

static GLOBAL_ARB: [RegWrite; 2] = [
    (REG_MAP.glb_arb, 0x0204_0401),
    (REG_MAP.glb_arb + 4, 0x0000_000f),
];

static PBUS_ARB: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Pbus as usize] + REG_MAP.bus_arb, 0x0000_0011)];
static CBUS_ARB: [RegWrite; 2] = [
    (REG_MAP.bus_base[Bus::Cbus as usize] + REG_MAP.bus_arb, 0x0000_0007),
    (REG_MAP.bus_base[Bus::Cbus as usize] + REG_MAP.bus_arb + 4, 0x0000_0001),
];

static PBUS_PRE_FLUSH: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Pbus as usize] + 0x30, 0)];
static TBUS_PRE_FLUSH: [RegWrite; 2] = [
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x30, 0),
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x34, 0),
];

bitfield! {
    /// Completion header from GEN2 on.
    #[derive(Copy, Clone)]
    pub struct CmpHdr(u64);
    pub start, set_start: 0;
    pub end, set_end: 1;
    pub u8, kind, set_kind: 6, 2;
    pub u8, status, set_status: 8, 7;
    pub u8, attr, set_attr: 11, 9;
    pub u64, timestamp, set_timestamp: 63, 24;
}

pub(super) fn decode_timestamped(header: u64) -> CompletionHeader {
    let h = CmpHdr(header);
    CompletionHeader {
        start: h.start(),
        end: h.end(),
        kind: h.kind(),
        status: h.status(),
        attr: h.attr(),
        size_or_timestamp: h.timestamp(),
    }
}

impl DrBackend for Gen2 {
    fn family(&self) -> Family {
        Family::Gen2
    }

    fn ring_count(&self) -> usize {
        RING_ID_COUNT
    }

    fn max_subdevices(&self) -> usize {
        1
    }

    fn ptr_format(&self) -> PtrFormat {
        PtrFormat { wrap_bit: 20 }
    }

    fn reg_map(&self) -> &'static RegMap {
        &REG_MAP
    }

    fn default_global_arbitration(&self) -> &'static [RegWrite] {
        &GLOBAL_ARB
    }

    fn default_bus_arbitration(&self, bus: Bus) -> &'static [RegWrite] {
        match bus {
            Bus::Pbus => &PBUS_ARB,
            Bus::Cbus => &CBUS_ARB,
            Bus::Mbus | Bus::Tbus => &[],
        }
    }

    fn pre_flush(&self, bus: Bus) -> &'static [RegWrite] {
        match bus {
            Bus::Pbus => &PBUS_PRE_FLUSH,
            Bus::Tbus => &TBUS_PRE_FLUSH,
            Bus::Mbus | Bus::Cbus => &[],
        }
    }

    fn decode_completion(&self, header: u64) -> CompletionHeader {
        decode_timestamped(header)
    }
}
