// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! First-generation DR engine.
//!
//! GEN1 has no pushed-pointer mode, so every view update is a register read,
//! and no queue-read rings. Completions report the size of the data moved.

use bitfield::bitfield;
use drv_asic_dr_api::{Bus, CompletionHeader, Family, COMMON_RING_COUNT};

use super::{DrBackend, DruOffsets, PtrFormat, RegMap, RegWrite};

pub struct Gen1;

const REG_MAP: RegMap = RegMap {
    bus_base: [0x0004_0000, 0x0004_4000, 0x0004_8000, 0x0004_c000],
    rings_offset: 0x100,
    ring_stride: 0x40,
    dru: DruOffsets {
        ctrl: 0x00,
        base_lo: 0x04,
        base_hi: 0x08,
        limit_lo: 0x0c,
        limit_hi: 0x10,
        size: 0x14,
        head: 0x18,
        tail: 0x1c,
        ring_timeout: 0x20,
        data_timeout: 0x24,
    },
    ctrl_enable: 1 << 0,
    ctrl_pushed_ptr: 0,

    bus_flush: 0x00,
    flush_bit: 1 << 0,
    bus_status: 0x04,
    status_flush_pending: 1 << 0,
    status_link_down: 1 << 1,
    bus_arb: 0x08,

    dma_ctrl: 0x0001_8000,
    dma_enable: 1 << 0,
    glb_arb: 0x0001_8004,
};

// Weights between mbus, cbus, pbus and tbus, one byte each.
static GLOBAL_ARB: [RegWrite; 1] = [(REG_MAP.glb_arb, 0x0102_0401)];

static PBUS_ARB: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Pbus as usize] + REG_MAP.bus_arb, 0x0000_0001)];
static CBUS_ARB: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Cbus as usize] + REG_MAP.bus_arb, 0x0000_0003)];

// Diagnostic capture must be quiet before the pipe bus drains.
static PBUS_PRE_FLUSH: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Pbus as usize] + 0x0c, 0)];
// PFC generation, then packet receive.
static TBUS_PRE_FLUSH: [RegWrite; 2] = [
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x10, 0),
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x14, 0),
];

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CmpHdr(u64);
    pub start, set_start: 0;
    pub end, set_end: 1;
    pub u8, kind, set_kind: 6, 2;
    pub u8, status, set_status: 8, 7;
    pub u8, attr, set_attr: 11, 9;
    pub u32, data_size, set_data_size: 63, 32;
}

impl DrBackend for Gen1 {
    fn family(&self) -> Family {
        Family::Gen1
    }

    fn ring_count(&self) -> usize {
        COMMON_RING_COUNT
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
        let h = CmpHdr(header);
        CompletionHeader {
            start: h.start(),
            end: h.end(),
            kind: h.kind(),
            status: h.status(),
            attr: h.attr(),
            size_or_timestamp: u64::from(h.data_size()),
        }
    }
}
