//! Fixed-capacity frame store for capture leftovers
//!
//! Built on the `rtrb` ringbuffer. The producer and consumer halves are kept
//! together and only ever touched under the mainloop lock, so the SPSC
//! queue here is used for its independent read/write cursors and its fixed
//! allocation rather than for cross-thread handoff.
//!
//! Writes are frame-granular and **truncating**: frames that don't fit are
//! dropped, newest first. Reads never return more frames than are stored.

use rtrb::{Consumer, Producer};

/// Ring buffer of interleaved audio frames
pub struct RingBuffer {
    producer: Producer<u8>,
    consumer: Consumer<u8>,
    frame_size: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Allocate room for `capacity` frames of `frame_size` bytes
    pub fn new(frame_size: usize, capacity: usize) -> Self {
        let frame_size = frame_size.max(1);
        let (producer, consumer) = rtrb::RingBuffer::new(frame_size * capacity);
        Self {
            producer,
            consumer,
            frame_size,
            capacity,
        }
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frame size in bytes
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of stored frames
    pub fn len(&self) -> usize {
        self.consumer.slots() / self.frame_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space in frames
    pub fn free(&self) -> usize {
        self.producer.slots() / self.frame_size
    }

    /// Append whole frames from `data`, returning how many were stored
    ///
    /// A trailing partial frame is ignored. Frames beyond the free space are
    /// dropped.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let offered = data.len() / self.frame_size;
        let frames = offered.min(self.free());
        if frames < offered {
            log::trace!(
                "Ring buffer full: dropping {} of {} frames",
                offered - frames,
                offered
            );
        }
        if frames == 0 {
            return 0;
        }

        let bytes = frames * self.frame_size;
        match self.producer.write_chunk(bytes) {
            Ok(mut chunk) => {
                let (first, second) = chunk.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&data[..split]);
                second.copy_from_slice(&data[split..bytes]);
                chunk.commit_all();
                frames
            }
            Err(_) => 0,
        }
    }

    /// Move up to `frames` frames into the front of `out`, oldest first
    ///
    /// Returns the number of frames read. `out` must hold at least
    /// `frames * frame_size` bytes.
    pub fn read(&mut self, out: &mut [u8], frames: usize) -> usize {
        let frames = frames
            .min(self.len())
            .min(out.len() / self.frame_size);
        if frames == 0 {
            return 0;
        }

        let bytes = frames * self.frame_size;
        match self.consumer.read_chunk(bytes) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                out[..first.len()].copy_from_slice(first);
                out[first.len()..bytes].copy_from_slice(second);
                chunk.commit_all();
                frames
            }
            Err(_) => 0,
        }
    }

    /// Discard every stored frame
    pub fn clear(&mut self) {
        let stored = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(stored) {
            chunk.commit_all();
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("frame_size", &self.frame_size)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
