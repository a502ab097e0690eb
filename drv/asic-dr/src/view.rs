// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side view of a descriptor ring.
//!
//! A `RingView` caches the ring's head and tail pointers along with the
//! geometry needed to find a slot in descriptor memory. Each side of a ring
//! owns exactly one pointer: a producer owns the tail and learns the head
//! from the device, a consumer owns the head and learns the tail. The view
//! is brought up to date with [`RingView::update`] and hands its own pointer
//! back to the device with [`RingView::publish`].
//!
//! # Locking
//!
//! By default a ring is assumed to have one producer thread and one consumer
//! thread for its whole life, and nothing is locked. When `lock_required` is
//! set, push and pull serialize on a descriptor lock and update/publish on a
//! separate pointer lock. Both are taken with `try_lock`; a held lock is
//! reported as [`DrError::LockFailed`] rather than waited on.
//!
//! # Byte order
//!
//! The device reads and writes descriptor memory little-endian. Every access
//! goes through `U64<LittleEndian>` so both push and pull swap on big-endian
//! hosts and neither does on little-endian ones.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use drv_asic_dr_api::{Descriptor, DrError, RingCallback, RingId, SubdeviceId};
use zerocopy::{LittleEndian, U64};

use crate::config::RingConfig;
use crate::gen::PtrFormat;
use crate::DrRegs;

pub(crate) type Word = U64<LittleEndian>;

static_assertions::const_assert_eq!(core::mem::size_of::<Word>(), 8);

/// Writes one descriptor into a ring; chosen by descriptor width at map time.
pub(crate) type PushFn = fn(&RingView, &Descriptor) -> Result<(), DrError>;

/// Where a ring lives in DMA memory.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RingMemory {
    pub desc: NonNull<Word>,
    /// The cache line after the descriptors, written by the device in
    /// pushed-pointer mode.
    pub pushed: NonNull<Word>,
}

/// The pointer registers a view synchronizes against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct PtrRegs {
    pub head: u32,
    pub tail: u32,
}

pub(crate) fn is_full(fmt: PtrFormat, head: u32, tail: u32) -> bool {
    fmt.index(head) == fmt.index(tail) && fmt.wrap(head) != fmt.wrap(tail)
}

pub(crate) fn is_empty(head: u32, tail: u32) -> bool {
    head == tail
}

pub(crate) fn used_count(
    fmt: PtrFormat,
    head: u32,
    tail: u32,
    entries: u32,
) -> u32 {
    if is_empty(head, tail) {
        0
    } else if is_full(fmt, head, tail) {
        entries
    } else {
        let (h, t) = (fmt.index(head), fmt.index(tail));
        if t < h {
            t + entries - h
        } else {
            t - h
        }
    }
}

pub(crate) struct RingView {
    pub ring: RingId,
    mem: Option<RingMemory>,
    entries: u32,
    words: usize,
    fmt: PtrFormat,
    head: AtomicU32,
    tail: AtomicU32,
    push: PushFn,
    producer: bool,
    pushed_ptr_mode: AtomicBool,
    lock_required: AtomicBool,
    desc_lock: spin::Mutex<()>,
    ptr_lock: spin::Mutex<()>,
    ptr_regs: Option<PtrRegs>,
    callback: spin::Mutex<Option<RingCallback>>,
    descriptors: AtomicU32,
}

// SAFETY: the raw pointers in `mem` refer to DMA memory that the pool hands
// over for the life of the device. Concurrent access to a slot is ruled out
// by the head/tail protocol (and by `desc_lock` when more than one thread
// works the same side of a ring).
unsafe impl Send for RingView {}
unsafe impl Sync for RingView {}

impl RingView {
    pub fn new(ring: RingId, fmt: PtrFormat) -> Self {
        Self {
            ring,
            mem: None,
            entries: 0,
            words: 0,
            fmt,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            push: push_n::<1>,
            producer: false,
            pushed_ptr_mode: AtomicBool::new(false),
            lock_required: AtomicBool::new(false),
            desc_lock: spin::Mutex::new(()),
            ptr_lock: spin::Mutex::new(()),
            ptr_regs: None,
            callback: spin::Mutex::new(None),
            descriptors: AtomicU32::new(0),
        }
    }

    /// Points the view at freshly programmed ring memory. Both pointers
    /// start at zero, matching the reset values written to hardware.
    ///
    /// # Safety
    ///
    /// `mem.desc` must be valid for `cfg.depth * cfg.words` words and
    /// `mem.pushed` for one word, for as long as the view stays mapped.
    pub unsafe fn map(
        &mut self,
        cfg: &RingConfig,
        mem: RingMemory,
        ptr_regs: PtrRegs,
    ) -> Result<(), DrError> {
        self.push = match cfg.words {
            1 => push_n::<1>,
            2 => push_n::<2>,
            4 => push_n::<4>,
            _ => return Err(DrError::BadParameter),
        };
        self.entries = cfg.depth;
        self.words = cfg.words;
        self.producer = cfg.producer;
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.descriptors.store(0, Ordering::Relaxed);
        self.ptr_regs = Some(ptr_regs);
        // SAFETY: valid per this function's contract.
        unsafe { mem.pushed.as_ptr().write_volatile(Word::new(0)) };
        self.mem = Some(mem);
        Ok(())
    }

    pub fn is_mapped(&self) -> bool {
        self.mem.is_some()
    }

    pub fn is_producer(&self) -> bool {
        self.producer
    }

    pub fn entries(&self) -> u32 {
        self.entries
    }

    pub fn words(&self) -> usize {
        self.words
    }

    pub fn head(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn descriptors(&self) -> u32 {
        self.descriptors.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        is_full(self.fmt, self.head(), self.tail())
    }

    pub fn is_empty(&self) -> bool {
        is_empty(self.head(), self.tail())
    }

    pub fn used_count(&self) -> u32 {
        used_count(self.fmt, self.head(), self.tail(), self.entries)
    }

    pub fn free_count(&self) -> u32 {
        self.entries - self.used_count()
    }

    pub fn set_lock_required(&self, required: bool) {
        self.lock_required.store(required, Ordering::Release);
    }

    pub fn set_pushed_ptr_mode(&self, enabled: bool) {
        self.pushed_ptr_mode.store(enabled, Ordering::Release);
    }

    pub fn pushed_ptr_mode(&self) -> bool {
        self.pushed_ptr_mode.load(Ordering::Acquire)
    }

    pub fn callback(&self) -> Option<RingCallback> {
        *self.callback.lock()
    }

    /// Installs (or with `None`, removes) the ring's callback, returning the
    /// one it replaced.
    pub fn replace_callback(
        &self,
        cb: Option<RingCallback>,
    ) -> Option<RingCallback> {
        core::mem::replace(&mut *self.callback.lock(), cb)
    }

    fn desc_bytes(&self) -> u32 {
        self.words as u32 * 8
    }

    fn lock<'a>(
        &'a self,
        lock: &'a spin::Mutex<()>,
    ) -> Result<Option<spin::MutexGuard<'a, ()>>, DrError> {
        if self.lock_required.load(Ordering::Acquire) {
            lock.try_lock().map(Some).ok_or(DrError::LockFailed)
        } else {
            Ok(None)
        }
    }

    pub fn push(&self, desc: &Descriptor) -> Result<(), DrError> {
        (self.push)(self, desc)
    }

    /// Copies the descriptor at the head out of the ring, then advances the
    /// head. The slot is not handed back to the producer until a later
    /// [`RingView::publish`].
    pub fn pull(&self) -> Result<Descriptor, DrError> {
        let mem = self.mem.ok_or(DrError::BadParameter)?;
        let _guard = self.lock(&self.desc_lock)?;
        let head = self.head.load(Ordering::Relaxed);
        if is_empty(head, self.tail()) {
            return Err(DrError::RingEmpty);
        }

        let slot = self.fmt.index(head) as usize * self.words;
        let mut desc = Descriptor::default();
        for (i, w) in desc.words[..self.words].iter_mut().enumerate() {
            // SAFETY: the head index is below `entries`, so the slot lies
            // inside the descriptor memory given to `map`.
            *w = unsafe { mem.desc.as_ptr().add(slot + i).read_volatile() }
                .get();
        }

        self.head
            .store(self.fmt.advance(head, self.entries), Ordering::Release);
        self.descriptors.fetch_add(1, Ordering::Relaxed);
        Ok(desc)
    }

    /// Refreshes the pointer this side doesn't own, from pushed-pointer
    /// memory if the ring is in that mode and from the hardware register
    /// otherwise.
    pub fn update<R: DrRegs>(
        &self,
        regs: &R,
        subdev: SubdeviceId,
    ) -> Result<(), DrError> {
        let mem = self.mem.ok_or(DrError::BadParameter)?;
        let ptr_regs = self.ptr_regs.ok_or(DrError::BadParameter)?;
        let _guard = self.lock(&self.ptr_lock)?;

        let raw = if self.pushed_ptr_mode() {
            // SAFETY: `pushed` is valid for one word per `map`.
            let w = unsafe { mem.pushed.as_ptr().read_volatile() }.get();
            u32::try_from(w).map_err(|_| DrError::HardwareCommFailure)?
        } else if self.producer {
            regs.read(subdev, ptr_regs.head)?
        } else {
            regs.read(subdev, ptr_regs.tail)?
        };

        let ptr = self.fmt.from_hw(raw, self.desc_bytes());
        // A read that fails on the bus tends to come back as all ones, which
        // decodes to an index past the end.
        if self.fmt.index(ptr) >= self.entries
            || self.fmt.index(raw) % self.desc_bytes() != 0
            || raw & !(self.fmt.wrap_mask() | self.fmt.ptr_mask()) != 0
        {
            return Err(DrError::HardwareCommFailure);
        }

        if self.producer {
            self.head.store(ptr, Ordering::Release);
        } else {
            self.tail.store(ptr, Ordering::Release);
        }
        Ok(())
    }

    /// Writes the pointer this side owns to its hardware register.
    pub fn publish<R: DrRegs>(
        &self,
        regs: &R,
        subdev: SubdeviceId,
    ) -> Result<(), DrError> {
        let ptr_regs = self.ptr_regs.ok_or(DrError::BadParameter)?;
        let _guard = self.lock(&self.ptr_lock)?;

        // Descriptor writes must land before the device sees the pointer.
        core::sync::atomic::fence(Ordering::Release);
        if self.producer {
            let hw = self.fmt.to_hw(self.tail(), self.desc_bytes());
            regs.write(subdev, ptr_regs.tail, hw)
        } else {
            let hw = self.fmt.to_hw(self.head(), self.desc_bytes());
            regs.write(subdev, ptr_regs.head, hw)
        }
    }
}

/// Writes the first `N` words of `desc` at the tail, then advances the tail.
fn push_n<const N: usize>(
    view: &RingView,
    desc: &Descriptor,
) -> Result<(), DrError> {
    let mem = view.mem.ok_or(DrError::BadParameter)?;
    debug_assert_eq!(N, view.words);
    let _guard = view.lock(&view.desc_lock)?;
    let tail = view.tail.load(Ordering::Relaxed);
    if is_full(view.fmt, view.head(), tail) {
        return Err(DrError::RingFull);
    }

    let slot = view.fmt.index(tail) as usize * N;
    for (i, w) in desc.words[..N].iter().enumerate() {
        // SAFETY: the tail index is below `entries` and `N` is the ring's
        // descriptor width, so the slot lies inside the mapped memory.
        unsafe {
            mem.desc.as_ptr().add(slot + i).write_volatile(Word::new(*w));
        }
    }

    view.tail
        .store(view.fmt.advance(tail, view.entries), Ordering::Release);
    view.descriptors.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
