// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the ASIC descriptor ring (DR) engine.
//!
//! This holds the vocabulary shared between the ring engine in
//! `drv-asic-dr` and the device-management layer that drives it: ring and
//! bus identities, errors, descriptor values and their decoded headers, and
//! the callbacks that completions are delivered to.

#![cfg_attr(not(test), no_std)]

mod callback;
mod ring;

pub use callback::*;
pub use ring::*;

use num_derive::FromPrimitive;
use serde::Deserialize;

/// Size of a host cache line, and the alignment every ring is rounded to.
pub const CACHE_LINE_BYTES: usize = 64;

/// Largest number of bytes a single ring may occupy.
pub const MAX_RING_BYTES: usize = 1 << 20;

/// Widest descriptor any ring uses, in 64-bit words.
pub const MAX_DESC_WORDS: usize = 4;

/// Largest number of sub-devices (dies) behind one logical device.
pub const MAX_SUBDEVICES: usize = 2;

/// Errors produced by the descriptor ring engine.
///
/// `RingFull` and `RingEmpty` are ordinary flow control and `NotReady`
/// for a ring outside the caller's slice is routine; callers retry or skip.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum DrError {
    /// Ring id invalid for the generation, wrong descriptor width, missing
    /// mapping, or similar caller mistake. Nothing was changed.
    BadParameter = 1,
    /// Device add has not completed, or the ring isn't owned by this slice.
    NotReady,
    /// The ring requires locking and the lock was held elsewhere.
    LockFailed,
    RingFull,
    RingEmpty,
    /// A register access did not complete.
    HardwareCommFailure,
    /// Hardware or slice configuration is internally inconsistent.
    InvalidConfiguration,
    /// The DMA pool could not provide memory for a ring.
    OutOfDmaMemory,
}

/// Hardware generation of the ASIC.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Family {
    Gen1 = 1,
    Gen2 = 2,
    Gen3 = 3,
}

/// Whether the engine is talking to silicon or to a software model.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Platform {
    #[default]
    Asic,
    Model,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceId(pub u8);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubdeviceId(pub u8);

impl SubdeviceId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// A single descriptor, as copied in and out of ring memory.
///
/// Rings narrower than [`MAX_DESC_WORDS`] only use the leading words; the
/// rest read back as zero.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Descriptor {
    pub words: [u64; MAX_DESC_WORDS],
}

impl Descriptor {
    pub const fn new(words: [u64; MAX_DESC_WORDS]) -> Self {
        Self { words }
    }

    /// Builds a descriptor from the leading words of `words`.
    ///
    /// Returns `None` if `words` is wider than any ring allows.
    pub fn from_slice(words: &[u64]) -> Option<Self> {
        let mut d = Self::default();
        d.words.get_mut(..words.len())?.copy_from_slice(words);
        Some(d)
    }

    /// The first word, which holds the header of RX and completion
    /// descriptors.
    pub fn header(&self) -> u64 {
        self.words[0]
    }
}

/// Header fields of a descriptor read from a completion ring, decoded into a
/// generation-independent form.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompletionHeader {
    pub start: bool,
    pub end: bool,
    pub kind: u8,
    pub status: u8,
    pub attr: u8,
    /// Data size on GEN1, a completion timestamp on later generations.
    pub size_or_timestamp: u64,
}

impl CompletionHeader {
    pub fn is_error(&self) -> bool {
        self.status != 0
    }
}

/// Header fields of a descriptor read from a receive ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RxHeader {
    pub start: bool,
    pub end: bool,
    pub size: u32,
    /// Only meaningful on the learn-notification ring.
    pub pipe: u8,
}

/// Per-ring counters, as reported by `ring_stats`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RingStats {
    pub descriptors: u32,
    pub used: u32,
    pub entries: u32,
}

/// Conditions routed to the fault sink rather than returned to a caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrFault {
    /// A completion reported a non-zero status.
    CompletionError {
        subdev: SubdeviceId,
        ring: RingId,
        status: u8,
        msg_id: u64,
    },
    /// A descriptor was pulled from a ring the generation doesn't define.
    InvalidRing { subdev: SubdeviceId, ring: RingId },
}

/// One ring's worth of slice configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct RingSetting {
    pub ring: RingId,
    /// Requested entry count; rounded up to a cache-line multiple.
    pub depth: u32,
    #[serde(default)]
    pub lock_required: bool,
    #[serde(default)]
    pub pushed_pointer: bool,
}

/// The rings owned by one LLD process slice.
///
/// Any ring not listed has depth zero and is left alone by this slice.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SliceConfig {
    pub rings: heapless::Vec<RingSetting, RING_ID_COUNT>,
}

impl SliceConfig {
    /// Adds or replaces the setting for `setting.ring`.
    pub fn set(&mut self, setting: RingSetting) -> Result<(), DrError> {
        match self.rings.iter_mut().find(|s| s.ring == setting.ring) {
            Some(s) => *s = setting,
            None => self
                .rings
                .push(setting)
                .map_err(|_| DrError::BadParameter)?,
        }
        Ok(())
    }

    /// Shorthand for a lock-free, polled ring of the given depth.
    pub fn with_ring(mut self, ring: RingId, depth: u32) -> Self {
        // Every ring id fits, so this can't run out of room.
        let _ = self.set(RingSetting {
            ring,
            depth,
            lock_required: false,
            pushed_pointer: false,
        });
        self
    }

    pub fn get(&self, ring: RingId) -> Option<&RingSetting> {
        self.rings.iter().find(|s| s.ring == ring)
    }

    pub fn bus_map(&self) -> BusMap {
        BusMap::from_settings(&self.rings)
    }
}

static_assertions::const_assert!(CACHE_LINE_BYTES.is_power_of_two());
static_assertions::const_assert!(MAX_RING_BYTES % CACHE_LINE_BYTES == 0);

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn error_codes_round_trip() {
        assert_eq!(DrError::from_u32(1), Some(DrError::BadParameter));
        assert_eq!(
            DrError::from_u32(DrError::OutOfDmaMemory as u32),
            Some(DrError::OutOfDmaMemory)
        );
        assert_eq!(DrError::from_u32(0), None);
    }

    #[test]
    fn descriptor_from_slice() {
        let d = Descriptor::from_slice(&[1, 2]).unwrap();
        assert_eq!(d.words, [1, 2, 0, 0]);
        assert!(Descriptor::from_slice(&[0; 5]).is_none());
    }

    #[test]
    fn slice_config_from_toml() {
        let cfg: SliceConfig = toml::from_str(
            r#"
            [[rings]]
            ring = "rx_pkt0"
            depth = 100

            [[rings]]
            ring = "tx_pipe_inst_list1"
            depth = 32
            lock_required = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rings.len(), 2);
        assert_eq!(cfg.rings[0].ring, RingId::RxPkt0);
        assert!(!cfg.rings[0].lock_required);
        assert_eq!(cfg.rings[1].ring, RingId::TxPipeInstList1);
        assert!(cfg.rings[1].lock_required);
        assert_eq!(cfg.bus_map(), BusMap::TBUS | BusMap::PBUS);
    }

    #[test]
    fn slice_config_set_replaces() {
        let mut cfg = SliceConfig::default().with_ring(RingId::RxLearn, 16);
        cfg.set(RingSetting {
            ring: RingId::RxLearn,
            depth: 32,
            lock_required: true,
            pushed_pointer: false,
        })
        .unwrap();
        assert_eq!(cfg.rings.len(), 1);
        assert_eq!(cfg.get(RingId::RxLearn).unwrap().depth, 32);
        assert!(cfg.get(RingId::RxDiag).is_none());
    }
}
