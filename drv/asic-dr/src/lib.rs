// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor ring (DR) engine for the ASIC's DMA interface.
//!
//! Control and packet traffic moves between host memory and the ASIC through
//! fixed-width descriptor rings. The host is the producer on free-memory and
//! transmit rings and the consumer on receive and completion rings; the
//! device is the other side of each. This crate owns the host side:
//!
//! - sizing rings and carving them out of DMA memory (`initialize_device`),
//! - pushing and pulling descriptors,
//! - keeping the cached head/tail pointers in step with hardware,
//! - draining consumer rings into callbacks (`service_ring`),
//! - and the bus flush sequence run around reconfiguration.
//!
//! One [`Lld`] exists per device. Setup takes `&mut self`; everything on the
//! data path takes `&self` so producer and consumer threads can share the
//! device.

#![cfg_attr(not(test), no_std)]

use core::ptr::NonNull;

use drv_asic_dr_api::{
    BusMap, Descriptor, DeviceId, DrError, DrFault, Family, Platform,
    RingCallback, RingId, RingStats, SubdeviceId, MAX_SUBDEVICES,
    RING_ID_COUNT,
};
use ringbuf::{ringbuf, ringbuf_entry};

pub mod config;
mod flush;
pub mod gen;
mod init;
mod service;
mod view;

pub use config::RingConfig;
pub use flush::FLUSH_RETRIES;
pub use gen::{backend_for, DrBackend};

use view::RingView;

/// Register access for one device.
///
/// Implementations return [`DrError::HardwareCommFailure`] when an access
/// does not complete.
pub trait DrRegs {
    fn read(&self, subdev: SubdeviceId, offset: u32) -> Result<u32, DrError>;

    fn write(
        &self,
        subdev: SubdeviceId,
        offset: u32,
        value: u32,
    ) -> Result<(), DrError>;

    /// Read-modify-write of a single register.
    fn modify<F>(
        &self,
        subdev: SubdeviceId,
        offset: u32,
        f: F,
    ) -> Result<(), DrError>
    where
        F: FnOnce(&mut u32),
    {
        let mut v = self.read(subdev, offset)?;
        f(&mut v);
        self.write(subdev, offset, v)
    }
}

/// A region of DMA-capable memory.
#[derive(Copy, Clone, Debug)]
pub struct DmaBuffer {
    pub virt: NonNull<u8>,
    pub phys: u64,
    pub len: usize,
}

/// Source of DMA memory for ring descriptors.
///
/// # Safety
///
/// Buffers returned by `allocate` must be valid for reads and writes of
/// `len` bytes, must not be handed out twice, and must stay valid for as
/// long as any [`Lld`] that was initialized from them. `translate` must
/// return the bus address the device uses for any address inside such a
/// buffer.
///
/// Rings are placed on 64-byte boundaries of the virtual address, and the
/// device needs the same alignment on the bus, so a buffer's bus address
/// must be congruent to its virtual address modulo 64. A pool that breaks
/// this makes [`Lld::initialize_device`] fail with `InvalidConfiguration`
/// before any register is written.
pub unsafe trait DmaPool {
    /// Largest buffer `allocate` will return.
    fn max_buffer_len(&self) -> usize;

    fn allocate(&mut self, len: usize) -> Option<DmaBuffer>;

    fn translate(&self, virt: NonNull<u8>) -> Option<u64>;
}

/// Sink for faults the service loop encounters while draining a ring.
pub type FaultSink = fn(DeviceId, &DrFault);

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Ready,
    Disabled(SubdeviceId, RingId),
    PushedPointer(SubdeviceId, RingId, bool),
    CallbackReplaced(SubdeviceId, RingId),
    Fault(DrFault),
}

ringbuf!(Trace, 32, Trace::None);

/// Rings of one sub-device, indexed by ring id.
struct Subdevice {
    configs: [RingConfig; RING_ID_COUNT],
    views: [RingView; RING_ID_COUNT],
}

/// The descriptor ring engine for one device.
pub struct Lld<R: DrRegs> {
    dev: DeviceId,
    regs: R,
    backend: &'static dyn DrBackend,
    platform: Platform,
    num_subdevices: usize,
    ready: bool,
    fault_sink: Option<FaultSink>,
    subdevs: [Subdevice; MAX_SUBDEVICES],
}

impl<R: DrRegs> Lld<R> {
    /// Creates the engine for a newly added device. Every ring starts with
    /// its generation's default configuration and no depth.
    pub fn new(
        dev: DeviceId,
        family: Family,
        platform: Platform,
        num_subdevices: usize,
        regs: R,
    ) -> Result<Self, DrError> {
        let backend = backend_for(family);
        if num_subdevices == 0 || num_subdevices > backend.max_subdevices() {
            return Err(DrError::BadParameter);
        }
        let fmt = backend.ptr_format();
        // Every index below RING_ID_COUNT names a ring.
        let ring = |i| RingId::from_index(i).unwrap_or(RingId::FmPkt0);
        let subdevs = core::array::from_fn(|_| Subdevice {
            configs: core::array::from_fn(|i| backend.default_config(ring(i))),
            views: core::array::from_fn(|i| RingView::new(ring(i), fmt)),
        });
        Ok(Self {
            dev,
            regs,
            backend,
            platform,
            num_subdevices,
            ready: false,
            fault_sink: None,
            subdevs,
        })
    }

    pub fn device(&self) -> DeviceId {
        self.dev
    }

    pub fn family(&self) -> Family {
        self.backend.family()
    }

    pub fn backend(&self) -> &'static dyn DrBackend {
        self.backend
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Marks device add as finished; the service loop refuses to run before
    /// this.
    pub fn complete_device_add(&mut self) {
        self.ready = true;
        ringbuf_entry!(Trace::Ready);
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_fault_sink(&mut self, sink: Option<FaultSink>) {
        self.fault_sink = sink;
    }

    pub(crate) fn report(&self, fault: DrFault) {
        ringbuf_entry!(Trace::Fault(fault));
        if let Some(sink) = self.fault_sink {
            sink(self.dev, &fault);
        }
    }

    fn subdev(&self, subdev: SubdeviceId) -> Result<&Subdevice, DrError> {
        if subdev.index() >= self.num_subdevices {
            return Err(DrError::BadParameter);
        }
        Ok(&self.subdevs[subdev.index()])
    }

    fn subdev_mut(
        &mut self,
        subdev: SubdeviceId,
    ) -> Result<&mut Subdevice, DrError> {
        if subdev.index() >= self.num_subdevices {
            return Err(DrError::BadParameter);
        }
        Ok(&mut self.subdevs[subdev.index()])
    }

    fn check_ring(&self, ring: RingId) -> Result<(), DrError> {
        if self.backend.is_valid(ring) {
            Ok(())
        } else {
            Err(DrError::BadParameter)
        }
    }

    pub(crate) fn config(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<&RingConfig, DrError> {
        self.check_ring(ring)?;
        Ok(&self.subdev(subdev)?.configs[ring.index()])
    }

    /// Looks up a ring this slice owns and has mapped.
    ///
    /// Rings with no depth belong to some other slice and give `NotReady`.
    pub(crate) fn view(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<&RingView, DrError> {
        if self.config(subdev, ring)?.depth == 0 {
            return Err(DrError::NotReady);
        }
        let view = &self.subdev(subdev)?.views[ring.index()];
        if !view.is_mapped() {
            return Err(DrError::BadParameter);
        }
        Ok(view)
    }

    /// Rings with a non-zero configured depth, by bus.
    pub fn bus_map(&self, subdev: SubdeviceId) -> Result<BusMap, DrError> {
        let sd = self.subdev(subdev)?;
        Ok(RingId::iter(self.backend.ring_count())
            .filter(|r| sd.configs[r.index()].depth != 0)
            .fold(BusMap::empty(), |map, r| map | r.bus().flag()))
    }

    /// Copies `words` into the next free slot of a producer ring.
    ///
    /// `words` must be exactly as wide as the ring's descriptors. The device
    /// doesn't see the new descriptor until [`Lld::publish_view`].
    pub fn push(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        words: &[u64],
    ) -> Result<(), DrError> {
        let view = self.view(subdev, ring)?;
        if !view.is_producer() || words.len() != view.words() {
            return Err(DrError::BadParameter);
        }
        let desc =
            Descriptor::from_slice(words).ok_or(DrError::BadParameter)?;
        view.push(&desc)
    }

    /// Takes the next descriptor off a consumer ring.
    pub fn pull(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<Descriptor, DrError> {
        let view = self.view(subdev, ring)?;
        if view.is_producer() {
            return Err(DrError::BadParameter);
        }
        view.pull()
    }

    pub fn update_view(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<(), DrError> {
        self.view(subdev, ring)?.update(&self.regs, subdev)
    }

    pub fn publish_view(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<(), DrError> {
        self.view(subdev, ring)?.publish(&self.regs, subdev)
    }

    /// Hands the current view to hardware, arming a ring after init.
    pub fn start_ring(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<(), DrError> {
        self.publish_view(subdev, ring)
    }

    /// Installs the callback for a consumer ring. Returns true if it
    /// replaced one that was already registered.
    pub fn register_callback(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        cb: RingCallback,
    ) -> Result<bool, DrError> {
        self.check_ring(ring)?;
        if !cb.accepts(ring) {
            return Err(DrError::BadParameter);
        }
        let view = &self.subdev(subdev)?.views[ring.index()];
        let replaced = view.replace_callback(Some(cb)).is_some();
        if replaced {
            ringbuf_entry!(Trace::CallbackReplaced(subdev, ring));
        }
        Ok(replaced)
    }

    /// Removes a ring's callback, returning true if there was one.
    pub fn unregister_callback(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<bool, DrError> {
        self.check_ring(ring)?;
        let view = &self.subdev(subdev)?.views[ring.index()];
        Ok(view.replace_callback(None).is_some())
    }

    /// Clears a ring's enable bit, leaving its geometry programmed.
    pub fn disable_ring(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<(), DrError> {
        self.check_ring(ring)?;
        self.subdev(subdev)?;
        let enable = self.backend.reg_map().ctrl_enable;
        let ctrl = self.backend.ring_regs(ring).ctrl;
        self.regs.modify(subdev, ctrl, |v| *v &= !enable)?;
        ringbuf_entry!(Trace::Disabled(subdev, ring));
        Ok(())
    }

    /// Switches a ring between reading the device's pointer from its
    /// register and from pushed-pointer memory.
    pub fn set_pushed_pointer_mode(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        enabled: bool,
    ) -> Result<(), DrError> {
        let view = self.view(subdev, ring)?;
        if enabled && !self.backend.supports_pushed_pointer() {
            return Err(DrError::BadParameter);
        }
        let bit = self.backend.reg_map().ctrl_pushed_ptr;
        let ctrl = self.backend.ring_regs(ring).ctrl;
        self.regs.modify(subdev, ctrl, |v| {
            if enabled {
                *v |= bit;
            } else {
                *v &= !bit;
            }
        })?;
        view.set_pushed_ptr_mode(enabled);
        ringbuf_entry!(Trace::PushedPointer(subdev, ring, enabled));
        Ok(())
    }

    pub fn set_lock_required(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        required: bool,
    ) -> Result<(), DrError> {
        self.view(subdev, ring)?.set_lock_required(required);
        Ok(())
    }

    pub fn set_data_timeout(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        timeout: u32,
    ) -> Result<(), DrError> {
        self.check_ring(ring)?;
        self.subdev(subdev)?;
        let reg = self.backend.ring_regs(ring).data_timeout;
        self.regs.write(subdev, reg, timeout)
    }

    pub fn set_ring_timeout(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        timeout: u32,
    ) -> Result<(), DrError> {
        self.check_ring(ring)?;
        self.subdev(subdev)?;
        let reg = self.backend.ring_regs(ring).ring_timeout;
        self.regs.write(subdev, reg, timeout)
    }

    /// Descriptors pending in a ring, as of the last view update.
    pub fn used_count(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<u32, DrError> {
        Ok(self.view(subdev, ring)?.used_count())
    }

    pub fn free_count(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<u32, DrError> {
        Ok(self.view(subdev, ring)?.free_count())
    }

    pub fn configured_depth(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<u32, DrError> {
        Ok(self.config(subdev, ring)?.depth)
    }

    pub fn ring_stats(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
    ) -> Result<RingStats, DrError> {
        let view = self.view(subdev, ring)?;
        Ok(RingStats {
            descriptors: view.descriptors(),
            used: view.used_count(),
            entries: view.entries(),
        })
    }
}
