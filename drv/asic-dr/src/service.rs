// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Draining consumer rings into their callbacks.

use drv_asic_dr_api::{
    Completion, Descriptor, DrError, DrFault, LearnNotification,
    Notification, RingCallback, RingCategory, RingId, RxPacket, SubdeviceId,
};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::{DrRegs, Lld};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Serviced(SubdeviceId, RingId, u32),
    PullFailed(SubdeviceId, RingId, DrError),
}

ringbuf!(Trace, 32, Trace::None);

impl<R: DrRegs> Lld<R> {
    /// Pulls up to `max_work` descriptors from a consumer ring and hands each
    /// to the ring's callback, returning how many were handled.
    ///
    /// Only descriptors already pending when the call starts are taken, so
    /// one busy ring can't hold the caller forever. The learn ring is the
    /// exception and is drained up to `max_work`: its interrupt is only
    /// re-armed once it is empty. The device's pointer is read once per
    /// call, so even the learn ring stops at what had been posted by then.
    ///
    /// A ring this slice doesn't own gives `NotReady` without touching
    /// hardware. Producer rings and rings with no callback do no work.
    pub fn service_ring(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        max_work: u32,
    ) -> Result<u32, DrError> {
        if !self.ready {
            return Err(DrError::NotReady);
        }
        let view = self.view(subdev, ring)?;
        if view.is_producer() {
            return Ok(0);
        }
        let Some(cb) = view.callback() else {
            return Ok(0);
        };

        view.update(&self.regs, subdev)?;
        let budget = if ring == RingId::RxLearn {
            max_work
        } else {
            max_work.min(view.used_count())
        };

        let mut done = 0;
        while done < budget {
            let desc = match view.pull() {
                Ok(desc) => desc,
                Err(DrError::RingEmpty) => break,
                Err(e) => {
                    ringbuf_entry!(Trace::PullFailed(subdev, ring, e));
                    return Err(e);
                }
            };
            self.dispatch(subdev, ring, cb, &desc);
            done += 1;
        }

        if done != 0 {
            view.publish(&self.regs, subdev)?;
            ringbuf_entry!(Trace::Serviced(subdev, view.ring, done));
        }
        Ok(done)
    }

    /// Decodes `desc` by ring category and calls `cb`.
    fn dispatch(
        &self,
        subdev: SubdeviceId,
        ring: RingId,
        cb: RingCallback,
        desc: &Descriptor,
    ) {
        if !self.backend.is_valid(ring) {
            self.report(DrFault::InvalidRing { subdev, ring });
            return;
        }
        let dev = self.dev;
        let addr = desc.words[1];
        match cb {
            RingCallback::RxPacket(f) => {
                let hdr = self.backend.decode_rx(desc.header());
                let channel = match ring.category() {
                    RingCategory::RxPacket(c) => c,
                    _ => 0,
                };
                f(
                    dev,
                    subdev,
                    &RxPacket {
                        size: hdr.size,
                        addr,
                        start: hdr.start,
                        end: hdr.end,
                        channel,
                    },
                );
            }
            RingCallback::Stats(f)
            | RingCallback::Idle(f)
            | RingCallback::Diag(f) => {
                let hdr = self.backend.decode_rx(desc.header());
                f(
                    dev,
                    subdev,
                    &Notification {
                        size: hdr.size,
                        addr,
                    },
                );
            }
            RingCallback::Learn(f) => {
                let hdr = self.backend.decode_rx(desc.header());
                f(
                    dev,
                    subdev,
                    &LearnNotification {
                        size: hdr.size,
                        addr,
                        start: hdr.start,
                        end: hdr.end,
                        pipe: hdr.pipe,
                    },
                );
            }
            RingCallback::Completion(f) => {
                let hdr = self.backend.decode_completion(desc.header());
                if hdr.is_error() {
                    self.report(DrFault::CompletionError {
                        subdev,
                        ring,
                        status: hdr.status,
                        msg_id: addr,
                    });
                }
                f(
                    dev,
                    subdev,
                    &Completion {
                        ring,
                        size_or_timestamp: hdr.size_or_timestamp,
                        attr: hdr.attr,
                        status: hdr.status,
                        kind: hdr.kind,
                        msg_id: addr,
                        start: hdr.start,
                        end: hdr.end,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::tests::NoRegs;
    use core::sync::atomic::{AtomicU32, Ordering};
    use drv_asic_dr_api::{DeviceId, Family, Platform};

    static CALLS: AtomicU32 = AtomicU32::new(0);
    static FAULTS: AtomicU32 = AtomicU32::new(0);

    fn on_completion(_: DeviceId, _: SubdeviceId, _: &Completion) {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fault(_: DeviceId, f: &DrFault) {
        assert_eq!(
            *f,
            DrFault::InvalidRing {
                subdev: SubdeviceId(0),
                ring: RingId::CmpQueReadBlock0,
            }
        );
        FAULTS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn ring_unknown_to_generation_goes_to_fault_sink() {
        let mut lld =
            Lld::new(DeviceId(0), Family::Gen1, Platform::Asic, 1, NoRegs)
                .unwrap();
        lld.set_fault_sink(Some(on_fault));
        lld.dispatch(
            SubdeviceId(0),
            RingId::CmpQueReadBlock0,
            RingCallback::Completion(on_completion),
            &Descriptor::default(),
        );
        assert_eq!(FAULTS.load(Ordering::Relaxed), 1);
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn service_before_device_add_is_not_ready() {
        let lld =
            Lld::new(DeviceId(0), Family::Gen2, Platform::Asic, 1, NoRegs)
                .unwrap();
        assert_eq!(
            lld.service_ring(SubdeviceId(0), RingId::RxPkt0, 8),
            Err(DrError::NotReady)
        );
    }
}
