// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring configuration and one-time hardware programming.

use core::ptr::NonNull;

use drv_asic_dr_api::{
    Bus, DrError, RingId, RingKind, RingSetting, SliceConfig, SubdeviceId,
    CACHE_LINE_BYTES, RING_ID_COUNT,
};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::config::{align_up, round_depth};
use crate::gen::RegWrite;
use crate::view::{PtrRegs, RingMemory, Word};
use crate::{DmaBuffer, DmaPool, DrRegs, Lld};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Configured(SubdeviceId, RingId, u32),
    Allocated { phys: u64, len: usize },
    Programmed { ring: RingId, phys: u64, depth: u32 },
    TooBig(RingId, usize),
    Misaligned(RingId, u64),
}

ringbuf!(Trace, 64, Trace::None);

/// Hands out cache-line-aligned pieces of DMA buffers, filling each buffer
/// before asking the pool for another.
struct Carver<'p, P: DmaPool> {
    pool: &'p mut P,
    current: Option<DmaBuffer>,
    used: usize,
}

impl<'p, P: DmaPool> Carver<'p, P> {
    fn new(pool: &'p mut P) -> Self {
        Self {
            pool,
            current: None,
            used: 0,
        }
    }

    /// Returns a 64-byte aligned region of `len` bytes.
    fn take(&mut self, len: usize) -> Result<NonNull<u8>, DrError> {
        if let Some(buf) = self.current {
            if let Some(region) = self.fit(buf, len) {
                return Ok(region);
            }
        }
        // The pool may hand back an unaligned buffer, so leave room to
        // align the first ring.
        let want = self.pool.max_buffer_len();
        if len + CACHE_LINE_BYTES > want {
            return Err(DrError::InvalidConfiguration);
        }
        let buf = self.pool.allocate(want).ok_or(DrError::OutOfDmaMemory)?;
        ringbuf_entry!(Trace::Allocated {
            phys: buf.phys,
            len: buf.len
        });
        self.current = Some(buf);
        self.used = 0;
        self.fit(buf, len).ok_or(DrError::OutOfDmaMemory)
    }

    fn fit(&mut self, buf: DmaBuffer, len: usize) -> Option<NonNull<u8>> {
        let base = buf.virt.as_ptr() as usize;
        let start = align_up(base + self.used, CACHE_LINE_BYTES) - base;
        let end = start.checked_add(len)?;
        if end > buf.len {
            return None;
        }
        self.used = end;
        // SAFETY: `start < end <= buf.len`, so this stays inside the buffer.
        NonNull::new(unsafe { buf.virt.as_ptr().add(start) })
    }
}

impl<R: DrRegs> Lld<R> {
    /// Sets the depth of one ring from a requested entry count, returning
    /// the depth actually configured.
    ///
    /// The depth is rounded up so the ring fills a whole number of cache
    /// lines. A depth of zero marks the ring as not owned by this slice.
    pub fn configure_ring(
        &mut self,
        subdev: SubdeviceId,
        ring: RingId,
        depth: u32,
    ) -> Result<u32, DrError> {
        self.check_ring(ring)?;
        let mut cfg = self.backend.default_config(ring);
        cfg.depth = round_depth(depth, cfg.words)?;
        self.subdev_mut(subdev)?.configs[ring.index()] = cfg;
        ringbuf_entry!(Trace::Configured(subdev, ring, cfg.depth));
        Ok(cfg.depth)
    }

    /// DMA memory needed for every configured ring on `subdev`, including
    /// each ring's pushed-pointer line and one line of slack to align the
    /// first ring. Depths are rounded again on the way through, so a ring
    /// configured by hand stays consistent with what will be programmed.
    pub fn desc_area_size(
        &mut self,
        subdev: SubdeviceId,
    ) -> Result<usize, DrError> {
        let count = self.backend.ring_count();
        let sd = self.subdev_mut(subdev)?;
        let mut total = 0;
        for cfg in sd.configs[..count].iter_mut() {
            if cfg.depth == 0 {
                continue;
            }
            cfg.depth = round_depth(cfg.depth, cfg.words)?;
            total += cfg.footprint();
        }
        if total != 0 {
            total += CACHE_LINE_BYTES;
        }
        Ok(total)
    }

    /// Configures and programs every ring `slice` owns on `subdev`, taking
    /// ring memory from `pool`.
    ///
    /// Rings `slice` doesn't mention are configured with no depth and left
    /// alone in hardware, since another slice may be using them.
    pub fn initialize_device<P: DmaPool>(
        &mut self,
        subdev: SubdeviceId,
        slice: &SliceConfig,
        pool: &mut P,
    ) -> Result<(), DrError> {
        self.subdev(subdev)?;
        for s in &slice.rings {
            self.check_ring(s.ring)?;
            if s.pushed_pointer && !self.backend.supports_pushed_pointer() {
                return Err(DrError::BadParameter);
            }
            round_depth(s.depth, self.backend.words_per_descriptor(s.ring))?;
        }

        let buses = slice.bus_map();
        let count = self.backend.ring_count();

        // Carve every ring before touching hardware, so a pool that runs
        // dry or hands back misaligned memory leaves the device as it was.
        let mut regions = [None; RING_ID_COUNT];
        let mut carver = Carver::new(pool);
        for ring in RingId::iter(count) {
            let Some(setting) = slice.get(ring) else {
                continue;
            };
            let mut cfg = self.backend.default_config(ring);
            cfg.depth = round_depth(setting.depth, cfg.words)?;
            if cfg.depth == 0 || !buses.contains_bus(ring.bus()) {
                continue;
            }
            let virt = carver.take(cfg.footprint()).inspect_err(|_| {
                ringbuf_entry!(Trace::TooBig(ring, cfg.footprint()));
            })?;
            let phys = carver
                .pool
                .translate(virt)
                .ok_or(DrError::InvalidConfiguration)?;
            if phys % CACHE_LINE_BYTES as u64 != 0 {
                ringbuf_entry!(Trace::Misaligned(ring, phys));
                return Err(DrError::InvalidConfiguration);
            }
            regions[ring.index()] = Some((virt, phys));
        }

        self.apply(subdev, self.backend.default_global_arbitration())?;

        for ring in RingId::iter(count) {
            let depth = slice.get(ring).map_or(0, |s| s.depth);
            self.configure_ring(subdev, ring, depth)?;
        }

        for ring in RingId::iter(count) {
            let (Some((virt, phys)), Some(setting)) =
                (regions[ring.index()], slice.get(ring))
            else {
                continue;
            };
            self.initialize_ring(subdev, ring, virt, phys, setting)?;
        }

        for bus in Bus::ALL {
            if buses.contains_bus(bus) {
                self.apply(subdev, self.backend.default_bus_arbitration(bus))?;
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        subdev: SubdeviceId,
        writes: &[RegWrite],
    ) -> Result<(), DrError> {
        for &(offset, value) in writes {
            self.regs.write(subdev, offset, value)?;
        }
        Ok(())
    }

    /// Programs one ring's registers and maps its view onto `virt`.
    ///
    /// The ring is disabled while its geometry changes and enabled only as
    /// the final step.
    fn initialize_ring(
        &mut self,
        subdev: SubdeviceId,
        ring: RingId,
        virt: NonNull<u8>,
        phys: u64,
        setting: &RingSetting,
    ) -> Result<(), DrError> {
        debug_assert_eq!(virt.as_ptr() as usize % CACHE_LINE_BYTES, 0);
        debug_assert_eq!(phys % CACHE_LINE_BYTES as u64, 0);
        let cfg = self.subdev(subdev)?.configs[ring.index()];
        let bytes = cfg.ring_bytes();
        let regs = self.backend.ring_regs(ring);
        let map = self.backend.reg_map();

        self.regs.write(subdev, regs.ctrl, 0)?;
        self.regs.write(subdev, regs.size, bytes as u32)?;
        self.regs.write(subdev, regs.base_lo, phys as u32)?;
        self.regs.write(subdev, regs.base_hi, (phys >> 32) as u32)?;
        let limit = phys + bytes as u64 - 1;
        self.regs.write(subdev, regs.limit_lo, limit as u32)?;
        self.regs.write(subdev, regs.limit_hi, (limit >> 32) as u32)?;
        self.regs.write(subdev, regs.head, 0)?;
        self.regs.write(subdev, regs.tail, 0)?;

        let desc = virt.cast::<Word>();
        // SAFETY: `bytes` is a whole number of cache lines, so the pushed
        // pointer line sits right after the descriptors and both fit in the
        // `footprint` the carver handed out.
        let pushed = unsafe { desc.as_ptr().add(bytes / 8) };
        let mem = RingMemory {
            desc,
            pushed: NonNull::new(pushed).ok_or(DrError::BadParameter)?,
        };
        let view = &mut self.subdev_mut(subdev)?.views[ring.index()];
        // SAFETY: the memory came from the pool, which keeps it valid for
        // the life of the device.
        unsafe {
            view.map(
                &cfg,
                mem,
                PtrRegs {
                    head: regs.head,
                    tail: regs.tail,
                },
            )?;
        }
        view.set_lock_required(setting.lock_required);
        view.set_pushed_ptr_mode(setting.pushed_pointer);

        if cfg.kind == RingKind::Receive {
            self.regs.write(subdev, regs.data_timeout, 1)?;
        }
        let mut ctrl = map.ctrl_enable;
        if setting.pushed_pointer {
            ctrl |= map.ctrl_pushed_ptr;
        }
        self.regs.write(subdev, regs.ctrl, ctrl)?;

        ringbuf_entry!(Trace::Programmed {
            ring,
            phys,
            depth: cfg.depth
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::tests::NoRegs;
    use drv_asic_dr_api::{DeviceId, Family, Platform, MAX_RING_BYTES};

    fn lld(family: Family) -> Lld<NoRegs> {
        Lld::new(DeviceId(0), family, Platform::Model, 1, NoRegs).unwrap()
    }

    #[test]
    fn configure_rounds_per_generation() {
        let sd = SubdeviceId(0);
        let mut g1 = lld(Family::Gen1);
        // FM rings are 1 word: 100 * 8 = 800, up to 832.
        assert_eq!(g1.configure_ring(sd, RingId::FmPkt0, 100), Ok(104));
        assert_eq!(g1.configured_depth(sd, RingId::FmPkt0), Ok(104));

        let mut g2 = lld(Family::Gen2);
        // RX rings are 2 words: 100 * 16 = 1600, up to 1664.
        assert_eq!(g2.configure_ring(sd, RingId::RxPkt0, 100), Ok(104));

        let mut g3 = lld(Family::Gen3);
        // Queue write lists are 4 words: 10 * 32 = 320 is aligned.
        assert_eq!(g3.configure_ring(sd, RingId::TxQueWriteList1, 10), Ok(10));
        assert_eq!(g3.configure_ring(sd, RingId::TxQueWriteList1, 9), Ok(10));
    }

    #[test]
    fn configure_rejects_bad_rings_and_sizes() {
        let sd = SubdeviceId(0);
        let mut g1 = lld(Family::Gen1);
        assert_eq!(
            g1.configure_ring(sd, RingId::TxQueReadBlock0, 8),
            Err(DrError::BadParameter)
        );
        let too_deep = (MAX_RING_BYTES / 32) as u32;
        assert_eq!(
            g1.configure_ring(sd, RingId::TxPipeInstList0, too_deep),
            Err(DrError::BadParameter)
        );
        assert_eq!(g1.configured_depth(sd, RingId::TxPipeInstList0), Ok(0));
    }

    #[test]
    fn area_size_counts_pushed_pointer_lines() {
        let sd = SubdeviceId(0);
        let mut g2 = lld(Family::Gen2);
        assert_eq!(g2.desc_area_size(sd), Ok(0));
        g2.configure_ring(sd, RingId::RxPkt0, 100).unwrap(); // 1664 bytes
        g2.configure_ring(sd, RingId::FmPkt0, 8).unwrap(); // 64 bytes
        assert_eq!(
            g2.desc_area_size(sd),
            Ok((1664 + 64) + (64 + 64) + CACHE_LINE_BYTES)
        );
    }
}
