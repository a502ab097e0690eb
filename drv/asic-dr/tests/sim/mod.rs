// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A software stand-in for the ASIC: a register file that understands bus
//! flushes, a heap-backed DMA pool, and helpers that play the device side
//! of the rings.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use drv_asic_dr::gen::{PtrFormat, RingRegs};
use drv_asic_dr::{DmaBuffer, DmaPool, DrBackend, DrRegs, Lld};
use drv_asic_dr_api::{
    Bus, DeviceId, DrError, Family, Platform, RingId, SliceConfig,
    SubdeviceId,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read(u8, u32),
    Write(u8, u32, u32),
}

struct State {
    regs: HashMap<(u8, u32), u32>,
    log: Vec<Access>,
    /// Status reads left before each bus stops reporting a pending flush.
    flush_countdown: [u32; 4],
    flush_latency: u32,
    fail: bool,
}

pub struct SimRegs {
    backend: &'static dyn DrBackend,
    state: Mutex<State>,
    accesses: AtomicUsize,
}

impl SimRegs {
    pub fn new(family: Family) -> Self {
        Self {
            backend: drv_asic_dr::backend_for(family),
            state: Mutex::new(State {
                regs: HashMap::new(),
                log: Vec::new(),
                flush_countdown: [0; 4],
                flush_latency: 0,
                fail: false,
            }),
            accesses: AtomicUsize::new(0),
        }
    }

    /// Number of status reads each bus reports a flush pending for.
    pub fn set_flush_latency(&self, reads: u32) {
        self.state.lock().unwrap().flush_latency = reads;
    }

    /// Makes every later access fail.
    pub fn set_failing(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<Access> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    pub fn writes_to(&self, subdev: u8, offset: u32) -> Vec<u32> {
        self.log()
            .into_iter()
            .filter_map(|a| match a {
                Access::Write(s, o, v) if s == subdev && o == offset => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Reads a register without it counting as an access.
    pub fn peek(&self, subdev: u8, offset: u32) -> u32 {
        let st = self.state.lock().unwrap();
        st.regs.get(&(subdev, offset)).copied().unwrap_or(0)
    }

    /// Sets a register the way the device would, bypassing side effects.
    pub fn poke(&self, subdev: u8, offset: u32, value: u32) {
        self.state.lock().unwrap().regs.insert((subdev, offset), value);
    }

    fn bus_at(&self, offset: u32, reg: u32) -> Option<usize> {
        let map = self.backend.reg_map();
        Bus::ALL
            .iter()
            .position(|&b| offset == map.bus(b) + reg)
    }
}

impl DrRegs for SimRegs {
    fn read(&self, subdev: SubdeviceId, offset: u32) -> Result<u32, DrError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let map = self.backend.reg_map();
        let status_bus = self.bus_at(offset, map.bus_status);
        let mut st = self.state.lock().unwrap();
        if st.fail {
            return Err(DrError::HardwareCommFailure);
        }
        st.log.push(Access::Read(subdev.0, offset));
        let key = (subdev.0, offset);
        let value = st.regs.get(&key).copied().unwrap_or(0);
        if let Some(b) = status_bus {
            if st.flush_countdown[b] > 0 {
                st.flush_countdown[b] -= 1;
                if st.flush_countdown[b] == 0 {
                    *st.regs.entry(key).or_default() &=
                        !map.status_flush_pending;
                }
            }
        }
        Ok(value)
    }

    fn write(
        &self,
        subdev: SubdeviceId,
        offset: u32,
        value: u32,
    ) -> Result<(), DrError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let map = self.backend.reg_map();
        let flush_bus = self.bus_at(offset, map.bus_flush);
        let status_bus = self.bus_at(offset, map.bus_status);
        let mut st = self.state.lock().unwrap();
        if st.fail {
            return Err(DrError::HardwareCommFailure);
        }
        st.log.push(Access::Write(subdev.0, offset, value));

        if status_bus.is_some() {
            // Write-one-to-clear.
            *st.regs.entry((subdev.0, offset)).or_default() &= !value;
            return Ok(());
        }
        st.regs.insert((subdev.0, offset), value);
        if let Some(b) = flush_bus {
            if value & map.flush_bit != 0 && st.flush_latency > 0 {
                st.flush_countdown[b] = st.flush_latency;
                let status = map.bus(Bus::ALL[b]) + map.bus_status;
                *st.regs.entry((subdev.0, status)).or_default() |=
                    map.status_flush_pending;
            }
        }
        Ok(())
    }
}

struct Region {
    virt: usize,
    phys: u64,
    len: usize,
}

/// DMA pool handing out leaked heap buffers at made-up bus addresses.
pub struct SimPool {
    max_len: usize,
    limit: usize,
    skew: u64,
    next_phys: u64,
    regions: Vec<Region>,
}

impl SimPool {
    pub fn new(max_len: usize) -> Self {
        Self::with_limit(max_len, usize::MAX)
    }

    /// A pool that refuses to allocate more than `limit` buffers.
    pub fn with_limit(max_len: usize, limit: usize) -> Self {
        Self {
            max_len,
            limit,
            skew: 0,
            next_phys: 0x8_0000_0000,
            regions: Vec::new(),
        }
    }

    /// A pool whose bus addresses sit `skew` bytes off the host's cache
    /// line alignment.
    pub fn with_phys_skew(max_len: usize, skew: u64) -> Self {
        Self {
            skew,
            ..Self::new(max_len)
        }
    }

    pub fn allocations(&self) -> usize {
        self.regions.len()
    }

    pub fn phys_to_virt(&self, phys: u64) -> *mut u8 {
        let r = self
            .regions
            .iter()
            .find(|r| phys >= r.phys && phys < r.phys + r.len as u64)
            .expect("bus address outside the pool");
        (r.virt + (phys - r.phys) as usize) as *mut u8
    }
}

// SAFETY: buffers are leaked, so they live for the rest of the test, and
// each is handed out once.
unsafe impl DmaPool for SimPool {
    fn max_buffer_len(&self) -> usize {
        self.max_len
    }

    fn allocate(&mut self, len: usize) -> Option<DmaBuffer> {
        if self.regions.len() >= self.limit || len > self.max_len {
            return None;
        }
        let words: &'static mut [u64] =
            Box::leak(vec![0u64; len.div_ceil(8)].into_boxed_slice());
        let virt = words.as_mut_ptr() as usize;
        // Keep bus and host addresses congruent mod the cache line, so an
        // aligned host address translates to an aligned bus address.
        let phys = self.next_phys + (virt % 64) as u64 + self.skew;
        self.next_phys += 0x10_0000;
        self.regions.push(Region { virt, phys, len });
        Some(DmaBuffer {
            virt: NonNull::new(virt as *mut u8)?,
            phys,
            len,
        })
    }

    fn translate(&self, virt: NonNull<u8>) -> Option<u64> {
        let v = virt.as_ptr() as usize;
        self.regions
            .iter()
            .find(|r| v >= r.virt && v < r.virt + r.len)
            .map(|r| r.phys + (v - r.virt) as u64)
    }
}

/// The device's side of every ring on one sub-device.
pub struct Device<'a> {
    pub regs: &'a SimRegs,
    pub pool: &'a SimPool,
    pub subdev: u8,
}

impl Device<'_> {
    fn backend(&self) -> &'static dyn DrBackend {
        self.regs.backend
    }

    fn fmt(&self) -> PtrFormat {
        self.backend().ptr_format()
    }

    fn ring_regs(&self, ring: RingId) -> RingRegs {
        self.backend().ring_regs(ring)
    }

    fn desc_bytes(&self, ring: RingId) -> u32 {
        self.backend().words_per_descriptor(ring) as u32 * 8
    }

    fn base(&self, ring: RingId) -> *mut u8 {
        let r = self.ring_regs(ring);
        let phys = u64::from(self.regs.peek(self.subdev, r.base_lo))
            | u64::from(self.regs.peek(self.subdev, r.base_hi)) << 32;
        self.pool.phys_to_virt(phys)
    }

    fn entries(&self, ring: RingId) -> u32 {
        let size = self.regs.peek(self.subdev, self.ring_regs(ring).size);
        size / self.desc_bytes(ring)
    }

    fn pushed_mode(&self, ring: RingId) -> bool {
        let ctrl = self.regs.peek(self.subdev, self.ring_regs(ring).ctrl);
        ctrl & self.backend().reg_map().ctrl_pushed_ptr != 0
    }

    fn push_pointer(&self, ring: RingId, raw: u32) {
        let size = self.regs.peek(self.subdev, self.ring_regs(ring).size);
        // SAFETY: the pushed-pointer line follows the descriptors.
        unsafe {
            let p = self.base(ring).add(size as usize) as *mut u64;
            p.write_volatile(u64::from(raw).to_le());
        }
    }

    /// Writes a descriptor into a ring the host consumes, as the device
    /// would. Returns false if the ring is full.
    pub fn post(&self, ring: RingId, words: &[u64]) -> bool {
        let r = self.ring_regs(ring);
        let fmt = self.fmt();
        let db = self.desc_bytes(ring);
        assert_eq!(words.len() as u32 * 8, db);
        let entries = self.entries(ring);
        let tail = fmt.from_hw(self.regs.peek(self.subdev, r.tail), db);
        let head = fmt.from_hw(self.regs.peek(self.subdev, r.head), db);
        if fmt.index(head) == fmt.index(tail)
            && fmt.wrap(head) != fmt.wrap(tail)
        {
            return false;
        }
        let slot = fmt.index(tail) as usize * db as usize;
        for (i, w) in words.iter().enumerate() {
            // SAFETY: the slot lies inside the ring programmed by the host.
            unsafe {
                let p = self.base(ring).add(slot + i * 8) as *mut u64;
                p.write_volatile(w.to_le());
            }
        }
        let next = fmt.to_hw(fmt.advance(tail, entries), db);
        self.regs.poke(self.subdev, r.tail, next);
        if self.pushed_mode(ring) {
            self.push_pointer(ring, next);
        }
        true
    }

    /// Consumes the next descriptor the host published into a ring it
    /// produces.
    pub fn take(&self, ring: RingId) -> Option<Vec<u64>> {
        let r = self.ring_regs(ring);
        let fmt = self.fmt();
        let db = self.desc_bytes(ring);
        let entries = self.entries(ring);
        let head = fmt.from_hw(self.regs.peek(self.subdev, r.head), db);
        let tail = fmt.from_hw(self.regs.peek(self.subdev, r.tail), db);
        if head == tail {
            return None;
        }
        let slot = fmt.index(head) as usize * db as usize;
        let words = (0..db as usize / 8)
            .map(|i| {
                // SAFETY: as in `post`.
                unsafe {
                    let p = self.base(ring).add(slot + i * 8) as *const u64;
                    u64::from_le(p.read_volatile())
                }
            })
            .collect();
        let next = fmt.to_hw(fmt.advance(head, entries), db);
        self.regs.poke(self.subdev, r.head, next);
        if self.pushed_mode(ring) {
            self.push_pointer(ring, next);
        }
        Some(words)
    }
}

/// Brings up a device with `slice` on sub-device 0 and marks it ready.
pub fn bring_up(
    family: Family,
    platform: Platform,
    slice: &SliceConfig,
) -> (Lld<SimRegs>, SimPool) {
    let mut pool = SimPool::new(64 * 1024);
    let mut lld =
        Lld::new(DeviceId(1), family, platform, 1, SimRegs::new(family))
            .unwrap();
    lld.initialize_device(SubdeviceId(0), slice, &mut pool)
        .unwrap();
    lld.complete_device_add();
    (lld, pool)
}

pub fn device<'a>(lld: &'a Lld<SimRegs>, pool: &'a SimPool) -> Device<'a> {
    Device {
        regs: lld.regs(),
        pool,
        subdev: 0,
    }
}
