// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Completion callbacks.
//!
//! Each consumer ring delivers its descriptors to exactly one kind of
//! callback, chosen by the ring's [`RingCategory`]. Callbacks are plain
//! function pointers so they can be registered without an allocator.

use crate::{DeviceId, RingCategory, RingId, SubdeviceId};

/// A packet (or packet fragment) landed in a receive packet ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RxPacket {
    pub size: u32,
    pub addr: u64,
    pub start: bool,
    pub end: bool,
    /// Which of the eight receive packet rings this came from.
    pub channel: u8,
}

/// A stats, idle-timeout, or diagnostic notification buffer was filled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub size: u32,
    pub addr: u64,
}

/// A learn-filter notification buffer was filled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LearnNotification {
    pub size: u32,
    pub addr: u64,
    pub start: bool,
    pub end: bool,
    pub pipe: u8,
}

/// Outcome of a descriptor previously pushed into a transmit ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Completion {
    pub ring: RingId,
    /// Data size on GEN1, a completion timestamp on later generations.
    pub size_or_timestamp: u64,
    pub attr: u8,
    pub status: u8,
    pub kind: u8,
    pub msg_id: u64,
    pub start: bool,
    pub end: bool,
}

pub type RxPacketFn = fn(DeviceId, SubdeviceId, &RxPacket);
pub type NotificationFn = fn(DeviceId, SubdeviceId, &Notification);
pub type LearnFn = fn(DeviceId, SubdeviceId, &LearnNotification);
pub type CompletionFn = fn(DeviceId, SubdeviceId, &Completion);

/// A callback registered against one ring.
#[derive(Copy, Clone)]
pub enum RingCallback {
    RxPacket(RxPacketFn),
    Stats(NotificationFn),
    Idle(NotificationFn),
    Learn(LearnFn),
    Diag(NotificationFn),
    Completion(CompletionFn),
}

impl RingCallback {
    /// Checks whether this callback can be delivered to from `ring`.
    pub fn accepts(&self, ring: RingId) -> bool {
        matches!(
            (self, ring.category()),
            (RingCallback::RxPacket(_), RingCategory::RxPacket(_))
                | (RingCallback::Stats(_), RingCategory::Stats)
                | (RingCallback::Idle(_), RingCategory::Idle)
                | (RingCallback::Learn(_), RingCategory::Learn)
                | (RingCallback::Diag(_), RingCategory::Diag)
                | (RingCallback::Completion(_), RingCategory::Completion)
        )
    }
}
