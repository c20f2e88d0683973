//! MIDI Event Queue
//!
//! A bounded single-producer single-consumer ring of timestamped events.
//! Short messages (status plus up to two data bytes) are packed into a
//! 32-bit word; SysEx payloads are copied into a contiguous scratch buffer
//! that is only ever reclaimed wholesale by `reset()`.
//!
//! The ring head and tail are single-word atomics with acquire/release
//! ordering, so exactly one producer thread may push while the renderer
//! pops. Any other cross-thread use must be serialised by the caller.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

/// Default number of event slots.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default SysEx scratch size in bytes.
pub const DEFAULT_SYSEX_CAPACITY: usize = 32 * 1024;

/// Pack a short message from its bytes, status in the low byte.
#[inline]
pub fn short_message(status: u8, data1: u8, data2: u8) -> u32 {
    status as u32 | (data1 as u32) << 8 | (data2 as u32) << 16
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    timestamp: u32,
    /// Packed short message; unused for SysEx slots.
    short: u32,
    sysex_offset: u32,
    /// Zero marks a short-message slot.
    sysex_len: u32,
}

/// A popped event. SysEx data borrows the queue's scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent<'a> {
    Short { msg: u32, timestamp: u32 },
    Sysex { data: &'a [u8], timestamp: u32 },
}

impl MidiEvent<'_> {
    pub fn timestamp(&self) -> u32 {
        match self {
            MidiEvent::Short { timestamp, .. } | MidiEvent::Sysex { timestamp, .. } => *timestamp,
        }
    }
}

/// Push failure: the ring or the scratch buffer is out of space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFull {
    Events,
    SysexScratch,
}

impl core::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QueueFull::Events => write!(f, "MIDI event ring is full"),
            QueueFull::SysexScratch => write!(f, "SysEx scratch buffer is full"),
        }
    }
}

impl std::error::Error for QueueFull {}

/// The event ring plus SysEx scratch.
pub struct MidiQueue {
    slots: Box<[UnsafeCell<Slot>]>,
    scratch: Box<[UnsafeCell<u8>]>,
    /// Requested event capacity; the slot allocation carries headroom.
    capacity: u32,
    /// Next slot the consumer will read.
    head: AtomicU32,
    /// Next slot the producer will write.
    tail: AtomicU32,
    scratch_used: AtomicU32,
}

// Safety: slots in head..tail are owned by the consumer, the rest by the
// producer; published scratch bytes are never rewritten until reset, which
// takes &mut self.
unsafe impl Sync for MidiQueue {}
unsafe impl Send for MidiQueue {}

impl MidiQueue {
    pub fn new(event_capacity: usize, sysex_capacity: usize) -> Self {
        let capacity = event_capacity.max(1) as u32;
        // One spare slot distinguishes full from empty; power-of-two slot
        // counts keep the index math valid across u32 wraparound.
        let slots = (0..(capacity as usize + 1).next_power_of_two())
            .map(|_| UnsafeCell::new(Slot::default()))
            .collect();
        let scratch = (0..sysex_capacity)
            .map(|_| UnsafeCell::new(0u8))
            .collect();
        MidiQueue {
            slots,
            scratch,
            capacity,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            scratch_used: AtomicU32::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY, DEFAULT_SYSEX_CAPACITY)
    }

    /// Events the queue accepts before overflowing.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    fn wrap(&self, index: u32) -> usize {
        index as usize % self.slots.len()
    }

    fn free_slots(&self) -> u32 {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        self.capacity - tail.wrapping_sub(head)
    }

    /// Push a packed short message. Producer side.
    pub fn push_short(&self, msg: u32, timestamp: u32) -> Result<(), QueueFull> {
        if self.free_slots() == 0 {
            return Err(QueueFull::Events);
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = Slot {
            timestamp,
            short: msg,
            sysex_offset: 0,
            sysex_len: 0,
        };
        // Safety: this slot is outside head..tail, so the consumer will not
        // read it until the release store below.
        unsafe { *self.slots[self.wrap(tail)].get() = slot };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Copy a SysEx payload into the scratch and push its slot. Producer
    /// side. Fails without partial effect when either space is exhausted.
    pub fn push_sysex(&self, data: &[u8], timestamp: u32) -> Result<(), QueueFull> {
        if data.is_empty() {
            return Ok(());
        }
        if self.free_slots() == 0 {
            return Err(QueueFull::Events);
        }
        let used = self.scratch_used.load(Ordering::Relaxed);
        if used as usize + data.len() > self.scratch.len() {
            return Err(QueueFull::SysexScratch);
        }
        for (i, &byte) in data.iter().enumerate() {
            // Safety: bytes at used.. are unpublished; only the producer
            // writes them.
            unsafe { *self.scratch[used as usize + i].get() = byte };
        }
        self.scratch_used
            .store(used + data.len() as u32, Ordering::Relaxed);

        let tail = self.tail.load(Ordering::Relaxed);
        let slot = Slot {
            timestamp,
            short: 0,
            sysex_offset: used,
            sysex_len: data.len() as u32,
        };
        // Safety: as in push_short; the release store publishes the scratch
        // bytes together with the slot.
        unsafe { *self.slots[self.wrap(tail)].get() = slot };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Timestamp of the next event without popping. Consumer side.
    pub fn peek_timestamp(&self) -> Option<u32> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        // Safety: slots below tail are published and stable until popped.
        let slot = unsafe { *self.slots[self.wrap(head)].get() };
        Some(slot.timestamp)
    }

    /// The next event without consuming it. Consumer side.
    pub fn peek(&self) -> Option<MidiEvent<'_>> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        // Safety: see peek_timestamp.
        let slot = unsafe { *self.slots[self.wrap(head)].get() };
        Some(self.decode(slot))
    }

    /// Pop the next event. Consumer side.
    pub fn pop(&self) -> Option<MidiEvent<'_>> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        // Safety: see peek_timestamp.
        let slot = unsafe { *self.slots[self.wrap(head)].get() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(self.decode(slot))
    }

    fn decode(&self, slot: Slot) -> MidiEvent<'_> {
        if slot.sysex_len == 0 {
            MidiEvent::Short {
                msg: slot.short,
                timestamp: slot.timestamp,
            }
        } else {
            let start = slot.sysex_offset as usize;
            let end = start + slot.sysex_len as usize;
            // Safety: published scratch bytes are immutable until reset.
            let data = unsafe {
                core::slice::from_raw_parts(self.scratch[start].get(), end - start)
            };
            MidiEvent::Sysex {
                data,
                timestamp: slot.timestamp,
            }
        }
    }

    /// Events currently queued.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all queued events and reclaim the SysEx scratch. Requires
    /// exclusive access; this is the only way scratch space is freed.
    pub fn reset(&mut self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.scratch_used.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_packing() {
        let msg = short_message(0x91, 60, 100);
        assert_eq!(msg & 0xff, 0x91);
        assert_eq!((msg >> 8) & 0xff, 60);
        assert_eq!((msg >> 16) & 0xff, 100);
    }

    #[test]
    fn test_push_pop_order() {
        let queue = MidiQueue::new(8, 64);
        queue.push_short(1, 10).unwrap();
        queue.push_short(2, 20).unwrap();
        queue.push_sysex(&[0xf0, 0x41, 0xf7], 30).unwrap();

        assert_eq!(queue.peek_timestamp(), Some(10));
        assert_eq!(
            queue.pop(),
            Some(MidiEvent::Short {
                msg: 1,
                timestamp: 10
            })
        );
        assert_eq!(
            queue.pop(),
            Some(MidiEvent::Short {
                msg: 2,
                timestamp: 20
            })
        );
        match queue.pop() {
            Some(MidiEvent::Sysex { data, timestamp }) => {
                assert_eq!(data, &[0xf0, 0x41, 0xf7]);
                assert_eq!(timestamp, 30);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_event_ring_overflow() {
        let queue = MidiQueue::new(4, 64);
        assert_eq!(queue.capacity(), 4);
        // The requested capacity is exactly what fits.
        for i in 0..4 {
            queue.push_short(i, 0).unwrap();
        }
        assert_eq!(queue.push_short(4, 0), Err(QueueFull::Events));

        // Popping frees a slot.
        queue.pop().unwrap();
        queue.push_short(4, 0).unwrap();
    }

    #[test]
    fn test_default_capacity_overflows_at_1025() {
        let queue = MidiQueue::with_defaults();
        for i in 0..1024u32 {
            queue.push_short(i, 0).unwrap();
        }
        assert_eq!(queue.push_short(1024, 0), Err(QueueFull::Events));

        // Every accepted message drains in order.
        for i in 0..1024u32 {
            match queue.pop() {
                Some(MidiEvent::Short { msg, .. }) => assert_eq!(msg, i),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_sysex_scratch_overflow_has_no_partial_effect() {
        let queue = MidiQueue::new(8, 8);
        queue.push_sysex(&[1, 2, 3, 4, 5], 0).unwrap();
        assert_eq!(
            queue.push_sysex(&[6, 7, 8, 9], 0),
            Err(QueueFull::SysexScratch)
        );
        assert_eq!(queue.len(), 1);
        // A smaller payload still fits.
        queue.push_sysex(&[6, 7, 8], 0).unwrap();
    }

    #[test]
    fn test_scratch_not_reclaimed_by_pop() {
        let queue = MidiQueue::new(8, 4);
        queue.push_sysex(&[1, 2, 3, 4], 0).unwrap();
        queue.pop().unwrap();
        // Scratch is only freed by reset.
        assert_eq!(queue.push_sysex(&[5], 0), Err(QueueFull::SysexScratch));
    }

    #[test]
    fn test_reset_reclaims_everything() {
        let mut queue = MidiQueue::new(4, 4);
        queue.push_sysex(&[1, 2, 3, 4], 0).unwrap();
        queue.push_short(9, 1).unwrap();
        queue.reset();
        assert!(queue.is_empty());
        queue.push_sysex(&[5, 6, 7, 8], 2).unwrap();
    }

    #[test]
    fn test_wraparound() {
        let queue = MidiQueue::new(4, 16);
        for round in 0..10u32 {
            queue.push_short(round, round).unwrap();
            match queue.pop() {
                Some(MidiEvent::Short { msg, timestamp }) => {
                    assert_eq!(msg, round);
                    assert_eq!(timestamp, round);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_cross_thread_producer() {
        use std::sync::Arc;

        let queue = Arc::new(MidiQueue::new(256, 1024));
        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            for i in 0..100u32 {
                while producer.push_short(i, i).is_err() {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = 0u32;
        while received < 100 {
            if let Some(MidiEvent::Short { msg, .. }) = queue.pop() {
                assert_eq!(msg, received);
                received += 1;
            }
        }
        handle.join().unwrap();
    }
}
