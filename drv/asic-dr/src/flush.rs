// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus flush sequence.
//!
//! Before DR state is reconfigured, in-flight DMA on every bus has to drain.
//! All rings are disabled, global DMA is enabled so the drain can make
//! progress, and each bus is pulsed to flush. Each bus then reports
//! completion by dropping its flush-pending status bit.

use drv_asic_dr_api::{Bus, DrError, Platform, RingId, SubdeviceId};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::{DrRegs, Lld};

/// Status polls allowed before a flush is declared stuck.
pub const FLUSH_RETRIES: u32 = 1000;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Start(SubdeviceId),
    Pending(Bus),
    Done { retries: u32 },
    Timeout,
    Skipped,
}

ringbuf!(Trace, 16, Trace::None);

impl<R: DrRegs> Lld<R> {
    /// Runs the flush sequence on `subdev` with the default retry budget.
    ///
    /// Returns `NotReady` if a bus was still flushing when the budget ran
    /// out; link-down status is cleared either way.
    pub fn run_flush_sequence(
        &self,
        subdev: SubdeviceId,
    ) -> Result<(), DrError> {
        self.run_flush_sequence_with_budget(subdev, FLUSH_RETRIES)
    }

    pub fn run_flush_sequence_with_budget(
        &self,
        subdev: SubdeviceId,
        retries: u32,
    ) -> Result<(), DrError> {
        self.subdev(subdev)?;
        let map = self.backend.reg_map();
        ringbuf_entry!(Trace::Start(subdev));

        // Every ring, whether or not this slice owns it.
        for ring in RingId::iter(self.backend.ring_count()) {
            let ctrl = self.backend.ring_regs(ring).ctrl;
            self.regs
                .modify(subdev, ctrl, |v| *v &= !map.ctrl_enable)?;
        }

        self.regs
            .modify(subdev, map.dma_ctrl, |v| *v |= map.dma_enable)?;

        for bus in Bus::ALL {
            for &(offset, value) in self.backend.pre_flush(bus) {
                self.regs.write(subdev, offset, value)?;
            }
            let flush = map.bus(bus) + map.bus_flush;
            self.regs.modify(subdev, flush, |v| *v |= map.flush_bit)?;
            self.regs.modify(subdev, flush, |v| *v &= !map.flush_bit)?;
        }

        let flushed = if self.platform == Platform::Model {
            ringbuf_entry!(Trace::Skipped);
            true
        } else {
            self.wait_for_flush(subdev, retries)?
        };

        for bus in Bus::ALL {
            let status = map.bus(bus) + map.bus_status;
            self.regs.write(subdev, status, map.status_link_down)?;
        }

        if flushed {
            Ok(())
        } else {
            ringbuf_entry!(Trace::Timeout);
            Err(DrError::NotReady)
        }
    }

    /// Polls every bus until none reports a flush pending, or `retries`
    /// rounds have gone by.
    fn wait_for_flush(
        &self,
        subdev: SubdeviceId,
        retries: u32,
    ) -> Result<bool, DrError> {
        let map = self.backend.reg_map();
        for attempt in 0..retries {
            let mut pending = false;
            for bus in Bus::ALL {
                let status =
                    self.regs.read(subdev, map.bus(bus) + map.bus_status)?;
                if status & map.status_flush_pending != 0 {
                    ringbuf_entry!(Trace::Pending(bus));
                    pending = true;
                }
            }
            if !pending {
                ringbuf_entry!(Trace::Done { retries: attempt });
                return Ok(true);
            }
        }
        Ok(false)
    }
}
