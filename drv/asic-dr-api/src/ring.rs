// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use serde::Deserialize;

use crate::RingSetting;

/// Identity of a descriptor ring.
///
/// Rings that exist on every generation are numbered first. The queue rings
/// at the end only exist from GEN2 on, so a generation's valid ids are always
/// `0..ring_count`.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, FromPrimitive,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RingId {
    // Free memory rings feeding the receive rings.
    FmPkt0 = 0,
    FmPkt1,
    FmPkt2,
    FmPkt3,
    FmPkt4,
    FmPkt5,
    FmPkt6,
    FmPkt7,
    FmLrt,
    FmIdle,
    FmLearn,
    FmDiag,

    TxPipeInstList0,
    TxPipeInstList1,
    TxPipeInstList2,
    TxPipeInstList3,
    TxMacStat,
    TxPipeWriteBlock,
    TxPipeReadBlock,
    TxQueWriteList,
    TxPkt0,
    TxPkt1,
    TxPkt2,
    TxPkt3,
    TxMacWriteBlock,

    RxPkt0,
    RxPkt1,
    RxPkt2,
    RxPkt3,
    RxPkt4,
    RxPkt5,
    RxPkt6,
    RxPkt7,
    RxLrt,
    RxIdle,
    RxLearn,
    RxDiag,

    CmpPipeInstList0,
    CmpPipeInstList1,
    CmpPipeInstList2,
    CmpPipeInstList3,
    CmpMacStat,
    CmpPipeWriteBlock,
    CmpPipeReadBlock,
    CmpQueWriteList,
    CmpTxPkt0,
    CmpTxPkt1,
    CmpTxPkt2,
    CmpTxPkt3,
    CmpMacWriteBlock,

    // GEN2 and later.
    TxQueWriteList1,
    TxQueReadBlock0,
    TxQueReadBlock1,
    CmpQueWriteList1,
    CmpQueReadBlock0,
    CmpQueReadBlock1,
}

/// Number of ring ids across all generations.
pub const RING_ID_COUNT: usize = RingId::CmpQueReadBlock1 as usize + 1;

/// Number of ring ids present on every generation.
pub const COMMON_RING_COUNT: usize = RingId::TxQueWriteList1 as usize;

/// What a ring carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RingKind {
    /// Host supplies free buffers for the device to receive into.
    FreeMemory,
    /// Host issues work to the device.
    Transmit,
    /// Device delivers received data or notifications.
    Receive,
    /// Device reports the outcome of transmitted work.
    Completion,
}

/// Shared hardware buses that DR traffic is arbitrated onto.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Bus {
    /// MAC configuration and statistics.
    Mbus = 0,
    /// Control bus, used by the traffic manager queue rings.
    Cbus = 1,
    /// Pipe bus, used by pipeline programming and notifications.
    Pbus = 2,
    /// Packet-transmit bus, used by CPU packet rings.
    Tbus = 3,
}

impl Bus {
    pub const ALL: [Bus; 4] = [Bus::Mbus, Bus::Cbus, Bus::Pbus, Bus::Tbus];

    pub fn flag(self) -> BusMap {
        BusMap::from_bits_retain(1 << self as u8)
    }
}

bitflags! {
    /// Set of buses hosting at least one ring of interest.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct BusMap: u8 {
        const MBUS = 1 << 0;
        const CBUS = 1 << 1;
        const PBUS = 1 << 2;
        const TBUS = 1 << 3;
    }
}

impl BusMap {
    pub fn contains_bus(self, bus: Bus) -> bool {
        self.contains(bus.flag())
    }

    /// Computes the buses used by every ring given a non-zero depth.
    pub fn from_settings(settings: &[RingSetting]) -> Self {
        settings
            .iter()
            .filter(|s| s.depth != 0)
            .fold(BusMap::empty(), |map, s| map | s.ring.bus().flag())
    }
}

/// How the service loop delivers a consumer ring's descriptors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RingCategory {
    /// Channel-indexed receive packet ring.
    RxPacket(u8),
    Stats,
    Idle,
    Learn,
    Diag,
    Completion,
    /// Host-side producer ring; nothing to service.
    Producer,
}

impl RingId {
    pub fn from_index(i: usize) -> Option<Self> {
        u8::try_from(i).ok().and_then(Self::from_u8)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Iterates over the first `count` ring ids.
    pub fn iter(count: usize) -> impl Iterator<Item = RingId> {
        (0..count).filter_map(RingId::from_index)
    }

    pub fn kind(self) -> RingKind {
        use RingId::*;
        match self {
            FmPkt0 | FmPkt1 | FmPkt2 | FmPkt3 | FmPkt4 | FmPkt5 | FmPkt6
            | FmPkt7 | FmLrt | FmIdle | FmLearn | FmDiag => {
                RingKind::FreeMemory
            }
            TxPipeInstList0 | TxPipeInstList1 | TxPipeInstList2
            | TxPipeInstList3 | TxMacStat | TxPipeWriteBlock
            | TxPipeReadBlock | TxQueWriteList | TxPkt0 | TxPkt1 | TxPkt2
            | TxPkt3 | TxMacWriteBlock | TxQueWriteList1 | TxQueReadBlock0
            | TxQueReadBlock1 => RingKind::Transmit,
            RxPkt0 | RxPkt1 | RxPkt2 | RxPkt3 | RxPkt4 | RxPkt5 | RxPkt6
            | RxPkt7 | RxLrt | RxIdle | RxLearn | RxDiag => RingKind::Receive,
            CmpPipeInstList0 | CmpPipeInstList1 | CmpPipeInstList2
            | CmpPipeInstList3 | CmpMacStat | CmpPipeWriteBlock
            | CmpPipeReadBlock | CmpQueWriteList | CmpTxPkt0 | CmpTxPkt1
            | CmpTxPkt2 | CmpTxPkt3 | CmpMacWriteBlock | CmpQueWriteList1
            | CmpQueReadBlock0 | CmpQueReadBlock1 => RingKind::Completion,
        }
    }

    /// True if the host writes descriptors into this ring.
    pub fn is_host_producer(self) -> bool {
        matches!(self.kind(), RingKind::FreeMemory | RingKind::Transmit)
    }

    pub fn category(self) -> RingCategory {
        use RingId::*;
        match self {
            RxPkt0 | RxPkt1 | RxPkt2 | RxPkt3 | RxPkt4 | RxPkt5 | RxPkt6
            | RxPkt7 => {
                RingCategory::RxPacket(self as u8 - RxPkt0 as u8)
            }
            RxLrt => RingCategory::Stats,
            RxIdle => RingCategory::Idle,
            RxLearn => RingCategory::Learn,
            RxDiag => RingCategory::Diag,
            _ => match self.kind() {
                RingKind::Completion => RingCategory::Completion,
                _ => RingCategory::Producer,
            },
        }
    }

    pub fn bus(self) -> Bus {
        use RingId::*;
        match self {
            FmPkt0 | FmPkt1 | FmPkt2 | FmPkt3 | FmPkt4 | FmPkt5 | FmPkt6
            | FmPkt7 | TxPkt0 | TxPkt1 | TxPkt2 | TxPkt3 | RxPkt0 | RxPkt1
            | RxPkt2 | RxPkt3 | RxPkt4 | RxPkt5 | RxPkt6 | RxPkt7
            | CmpTxPkt0 | CmpTxPkt1 | CmpTxPkt2 | CmpTxPkt3 => Bus::Tbus,
            TxMacStat | TxMacWriteBlock | CmpMacStat | CmpMacWriteBlock => {
                Bus::Mbus
            }
            TxQueWriteList | TxQueWriteList1 | TxQueReadBlock0
            | TxQueReadBlock1 | CmpQueWriteList | CmpQueWriteList1
            | CmpQueReadBlock0 | CmpQueReadBlock1 => Bus::Cbus,
            _ => Bus::Pbus,
        }
    }

    /// Descriptor width in 64-bit words.
    pub fn words_per_descriptor(self) -> usize {
        use RingId::*;
        match self.kind() {
            RingKind::FreeMemory => 1,
            RingKind::Transmit => match self {
                TxPkt0 | TxPkt1 | TxPkt2 | TxPkt3 => 2,
                _ => 4,
            },
            RingKind::Receive | RingKind::Completion => 2,
        }
    }

    /// Position of this ring among the rings on the same bus, which selects
    /// its register block inside that bus's DR register space.
    pub fn bus_slot(self) -> usize {
        let bus = self.bus();
        RingId::iter(self.index())
            .filter(|r| r.bus() == bus)
            .count()
    }
}
