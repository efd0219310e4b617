use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::frame::PcmFrame;
use ferrodub_foundation::AudioError;

const DEFAULT_CAPACITY: usize = 10;

/// Bounded FIFO of PCM frames shared between one producer and one consumer
/// task. All operations are O(1) under a single mutex; overruns and
/// underruns are counted, never fatal.
pub struct FrameRing {
    inner: Mutex<RingInner>,
}

struct RingInner {
    slots: Vec<Option<PcmFrame>>,
    capacity: usize,
    head: usize, // next write position
    tail: usize, // next read position
    size: usize,
    overruns: u64,
    underruns: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub overruns: u64,
    pub underruns: u64,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        Self {
            inner: Mutex::new(RingInner {
                slots: (0..capacity).map(|_| None).collect(),
                capacity,
                head: 0,
                tail: 0,
                size: 0,
                overruns: 0,
                underruns: 0,
            }),
        }
    }

    pub fn write(&self, frame: PcmFrame) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if inner.size == inner.capacity {
            inner.overruns += 1;
            return Err(AudioError::Overflow {
                capacity: inner.capacity,
            });
        }
        let head = inner.head;
        inner.slots[head] = Some(frame);
        inner.head = (head + 1) % inner.capacity;
        inner.size += 1;
        Ok(())
    }

    pub fn try_write(&self, frame: PcmFrame) -> bool {
        self.write(frame).is_ok()
    }

    pub fn read(&self) -> Result<PcmFrame, AudioError> {
        let mut inner = self.inner.lock();
        if inner.size == 0 {
            inner.underruns += 1;
            return Err(AudioError::Underflow);
        }
        let tail = inner.tail;
        let frame = inner.slots[tail].take().expect("occupied slot");
        inner.tail = (tail + 1) % inner.capacity;
        inner.size -= 1;
        Ok(frame)
    }

    pub fn try_read(&self) -> Option<PcmFrame> {
        self.read().ok()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn fill_level(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.capacity == 0 {
            return 0.0;
        }
        inner.size as f64 / inner.capacity as f64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().size == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.size == inner.capacity
    }

    /// Drops all buffered frames. Counters survive; only `reset_stats`
    /// clears them.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.head = 0;
        inner.tail = 0;
        inner.size = 0;
    }

    pub fn stats(&self) -> RingStats {
        let inner = self.inner.lock();
        RingStats {
            overruns: inner.overruns,
            underruns: inner.underruns,
        }
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.overruns = 0;
        inner.underruns = 0;
    }

    /// Changes capacity while keeping buffered audio. When shrinking below
    /// the buffered count the oldest (stalest) frames are dropped first.
    /// Counters survive the resize.
    pub fn resize(&self, new_capacity: usize) {
        let new_capacity = if new_capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            new_capacity
        };

        let mut inner = self.inner.lock();
        let mut retained: VecDeque<PcmFrame> = VecDeque::with_capacity(inner.size);
        let (mut tail, size, capacity) = (inner.tail, inner.size, inner.capacity);
        for _ in 0..size {
            retained.push_back(inner.slots[tail].take().expect("occupied slot"));
            tail = (tail + 1) % capacity;
        }
        while retained.len() > new_capacity {
            retained.pop_front();
        }

        let mut slots: Vec<Option<PcmFrame>> = (0..new_capacity).map(|_| None).collect();
        let kept = retained.len();
        for (slot, frame) in slots.iter_mut().zip(retained) {
            *slot = Some(frame);
        }

        inner.slots = slots;
        inner.capacity = new_capacity;
        inner.tail = 0;
        inner.head = kept % new_capacity;
        inner.size = kept;
    }
}
