// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing driver events
//!
//! This is a static, fixed-size ring buffer of recent events, meant to be
//! left in production code and inspected from a debugger or a core file. A
//! driver declares one (or more) per module and records `Copy + PartialEq`
//! payloads into it instead of emitting text.
//!
//! Entries may be recorded from any thread. Each buffer sits behind a spin
//! lock that is held only for the duration of a single insertion, so the
//! ring engine can trace from both its producer and consumer paths.
//!
//! ## Creating a ring buffer
//!
//! ```ignore
//! ringbuf!(Trace, 16, Trace::None);
//! ```
//!
//! Entries are then recorded with [`ringbuf_entry!`]:
//!
//! ```ignore
//! ringbuf_entry!(Trace::RingEnabled(ring));
//! ```
//!
//! A name can be given to keep more than one buffer in a module:
//!
//! ```ignore
//! ringbuf!(FLUSH_RINGBUF, FlushTrace, 8, FlushTrace::None);
//! ringbuf_entry!(FLUSH_RINGBUF, FlushTrace::Start);
//! ```
//!
//! When an entry is identical to the one before it (same line, same
//! payload), the earlier entry's `count` is bumped instead of consuming a
//! slot, so a hot loop can't wipe out the history that led up to it.

#![cfg_attr(not(test), no_std)]

/// Re-exported so that code generated by the macros can always find it.
pub use spin;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The actual type of `NAME` will be `spin::Mutex<Ringbuf<T, N>>`.
///
/// If the name is omitted it defaults to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::spin::Mutex<$crate::Ringbuf<$t, $n>> =
            $crate::spin::Mutex::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`; without a name, it uses `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before taking the lock, so that a payload
        // which itself traces can't deadlock against us.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(&mut *buf.lock(), line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// A single [`Ringbuf`] entry.
///
/// `generation` counts how many times the slot has been overwritten, and
/// `count` how many consecutive identical events this entry stands for.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of parametrized type and size. Normally declared with
/// [`ringbuf!`] rather than built by hand.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // Treat "never written" as an out-of-range index so that the first
        // entry lands in slot 0 and never merges with the initializer.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = match last.wrapping_add(1) {
            n if n >= N => 0,
            n => n,
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Iterates over recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        self.buffer[start.min(N)..]
            .iter()
            .chain(self.buffer[..start.min(N)].iter())
            .filter(|e| e.count != 0)
    }

    /// Returns the most recently recorded payload, if any.
    pub fn latest(&self) -> Option<T> {
        self.last.and_then(|i| self.buffer.get(i)).map(|e| e.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Event {
        None,
        A(u8),
        B,
    }

    fn fresh<const N: usize>() -> Ringbuf<Event, N> {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: Event::None,
            }; N],
        }
    }

    #[test]
    fn repeated_entries_collapse() {
        let mut rb = fresh::<4>();
        rb.entry(10, Event::B);
        rb.entry(10, Event::B);
        rb.entry(10, Event::B);
        let v: Vec<_> = rb.iter().collect();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].count, 3);
        assert_eq!(rb.latest(), Some(Event::B));
    }

    #[test]
    fn same_payload_different_line_is_distinct() {
        let mut rb = fresh::<4>();
        rb.entry(10, Event::B);
        rb.entry(11, Event::B);
        assert_eq!(rb.iter().count(), 2);
    }

    #[test]
    fn wraps_oldest_first() {
        let mut rb = fresh::<3>();
        for i in 0..5 {
            rb.entry(1, Event::A(i));
        }
        let payloads: Vec<_> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, [Event::A(2), Event::A(3), Event::A(4)]);
        assert_eq!(rb.buffer[0].generation, 2);
    }

    ringbuf!(TEST_RINGBUF, Event, 8, Event::None);

    #[test]
    fn macros_record_into_static() {
        ringbuf_entry!(TEST_RINGBUF, Event::A(7));
        assert!(TEST_RINGBUF
            .lock()
            .iter()
            .any(|e| e.payload == Event::A(7)));
    }
}
