// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Third-generation DR engine.
//!
//! Register blocks have the GEN2 shape at a new base, and the pointer wrap
//! bit moves up to bit 24 so rings may be addressed in larger byte
//! offsets. The largest GEN3 part spans two dies, each a sub-device with
//! its own copy of every ring.

use drv_asic_dr_api::{Bus, CompletionHeader, Family, RING_ID_COUNT};

use super::gen2::{decode_timestamped, DRU};
use super::{DrBackend, PtrFormat, RegMap, RegWrite};

pub struct Gen3;

const REG_MAP: RegMap = RegMap {
    bus_base: [0x0400_0000, 0x0401_0000, 0x0402_0000, 0x0403_0000],
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

    dma_ctrl: 0x000c_0000,
    dma_enable: 1 << 0,
    glb_arb: 0x000c_0010,
};

static GLOBAL_ARB: [RegWrite; 2] = [
    (REG_MAP.glb_arb, 0x0408_0801),
    (REG_MAP.glb_arb + 4, 0x0000_001f),
];

static PBUS_ARB: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Pbus as usize] + REG_MAP.bus_arb, 0x0000_0013)];
static CBUS_ARB: [RegWrite; 2] = [
    (REG_MAP.bus_base[Bus::Cbus as usize] + REG_MAP.bus_arb, 0x0000_000f),
    (REG_MAP.bus_base[Bus::Cbus as usize] + REG_MAP.bus_arb + 4, 0x0000_0003),
];

static PBUS_PRE_FLUSH: [RegWrite; 1] =
    [(REG_MAP.bus_base[Bus::Pbus as usize] + 0x30, 0)];
static TBUS_PRE_FLUSH: [RegWrite; 3] = [
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x30, 0),
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x34, 0),
    // Second PFC control, for the upper half of the ports.
    (REG_MAP.bus_base[Bus::Tbus as usize] + 0x38, 0),
];

impl DrBackend for Gen3 {
    fn family(&self) -> Family {
        Family::Gen3
    }

    fn ring_count(&self) -> usize {
        RING_ID_COUNT
    }

    fn max_subdevices(&self) -> usize {
        2
    }

    fn ptr_format(&self) -> PtrFormat {
        PtrFormat { wrap_bit: 24 }
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
