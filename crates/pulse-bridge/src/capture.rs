//! Capture pull bridge
//!
//! The server delivers captured audio in fragments of whatever size it
//! likes; the host pulls fixed frame counts. A pull drains the ring buffer
//! first, then consumes server fragments. Whatever is left of the last
//! fragment is saved to the ring for the next pull, because a dropped
//! fragment is gone for good.
//!
//! ```text
//!  pull(N) ─► ring (oldest first) ─► fragment 1 ─► fragment 2 ─► ...
//!                                          leftover of the last fragment
//!                                          └──────► ring (truncated to fit)
//! ```
//!
//! Leftovers that don't fit in the ring are dropped. The ring never grows or
//! overwrites.

use crate::channel_map::ChannelMap;
use crate::connection;
use crate::error::{BackendError, BackendResult};
use crate::mainloop::LoopGuard;
use crate::negotiate;
use crate::ring::RingBuffer;
use crate::server::{AudioServer, OperationState, StreamId, StreamReader};
use crate::session::Watch;
use crate::types::{Direction, SampleFormatSpec, StreamFlags};

/// Frames a pull could return right now: ring fill plus queued server bytes
///
/// Call with the mainloop lock held so both counts come from one instant.
pub fn available_frames<R: StreamReader + ?Sized>(reader: &R, stream: StreamId, ring: &RingBuffer) -> usize {
    ring.len() + reader.readable_size(stream) / ring.frame_size()
}

/// Copy exactly `frames` frames into the front of `out`, oldest first
///
/// Fails without touching `out`, the ring or the server queue when fewer
/// frames are available or `out` is too short.
pub fn capture_samples<R: StreamReader + ?Sized>(
    reader: &mut R,
    stream: StreamId,
    ring: &mut RingBuffer,
    out: &mut [u8],
    frames: usize,
) -> BackendResult<()> {
    let frame_size = ring.frame_size();

    let available = available_frames(reader, stream, ring);
    if available < frames {
        return Err(BackendError::InsufficientData {
            requested: frames,
            available,
        });
    }

    let needed = frames * frame_size;
    if out.len() < needed {
        return Err(BackendError::BufferTooSmall {
            needed,
            provided: out.len(),
        });
    }

    let mut offset = ring.read(&mut out[..needed], frames) * frame_size;

    while offset < needed {
        let fragment = match reader.peek(stream) {
            Ok(Some(fragment)) => fragment,
            Ok(None) => {
                return Err(BackendError::Stream(format!(
                    "capture queue ran dry with {} bytes outstanding",
                    needed - offset
                )))
            }
            Err(code) => {
                return Err(BackendError::Stream(format!(
                    "capture peek failed (code {})",
                    code
                )))
            }
        };

        let take = fragment.len().min(needed - offset);
        out[offset..offset + take].copy_from_slice(&fragment[..take]);
        offset += take;

        let leftover = &fragment[take..];
        let leftover_frames = leftover.len() / frame_size;
        if leftover_frames > 0 {
            let keep = leftover_frames.min(ring.capacity());
            let stored = ring.write(&leftover[..keep * frame_size]);
            log::trace!(
                "Saved {} of {} leftover capture frames",
                stored,
                leftover_frames
            );
        }

        reader.drop_fragment(stream).map_err(|code| {
            BackendError::Stream(format!("capture drop failed (code {})", code))
        })?;
    }

    Ok(())
}

/// Create the record stream and the leftover ring
///
/// The ring holds one host buffer (`update_size * num_updates` frames). The
/// stream starts corked; [`set_corked`] starts it.
pub fn open_capture_stream<S: AudioServer>(guard: &mut LoopGuard<'_, S>) -> BackendResult<()> {
    let params = guard.device.params;
    let frame_size = params.frame_size();
    let samples = params.buffer_frames();

    let spec = SampleFormatSpec::from_host(params.format, params.frequency);
    spec.validate()?;
    let map = ChannelMap::wave_ex(spec.channels).ok_or_else(|| {
        BackendError::Format(format!("no channel map for {} channels", spec.channels))
    })?;

    let attr = negotiate::capture_attributes(samples, frame_size, params.frequency);
    let flags = StreamFlags {
        start_corked: true,
        adjust_latency: true,
        ..StreamFlags::default()
    };

    guard.device.frame_size = frame_size;
    guard.device.attr = attr;
    guard.device.ring = Some(RingBuffer::new(frame_size, samples as usize));

    let stream = match connection::connect_stream(
        guard,
        "Capture Stream",
        Direction::Capture,
        &spec,
        &map,
        Some(&attr),
        flags,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            guard.device.ring = None;
            return Err(e);
        }
    };

    guard.device.stream = Some(stream);
    guard.device.spec = Some(spec);
    guard.device.watch.stream = Some((stream, Watch::Persistent));
    if let Some(granted) = guard.server.stream_buffer_attr(stream) {
        guard.device.attr = granted;
    }

    log::info!(
        "Capture ready on '{}': {} @ {} Hz, ring {} frames, fragsize {} bytes",
        guard.device.name,
        params.format,
        params.frequency,
        samples,
        attr.fragsize
    );
    Ok(())
}

/// Cork (`true`) or uncork the capture stream and wait for the server
pub fn set_corked<S: AudioServer>(guard: &mut LoopGuard<'_, S>, pause: bool) -> BackendResult<()> {
    let stream = guard.device.stream.ok_or(BackendError::NotOpen)?;
    let op = guard.server.cork(stream, pause).map_err(|code| {
        BackendError::Stream(format!("cork failed: {}", guard.server.strerror(code)))
    })?;

    match connection::wait_operation(guard, op) {
        OperationState::Done => {
            log::debug!("Capture {}", if pause { "corked" } else { "started" });
            Ok(())
        }
        state => Err(BackendError::Stream(format!("cork did not complete ({:?})", state))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerErrno;
    use std::collections::VecDeque;

    /// Reader over a fixed queue of fragments
    struct Fragments {
        queue: VecDeque<Vec<u8>>,
        peeks: usize,
    }

    impl Fragments {
        fn new(sizes: &[usize], frame_size: usize) -> Self {
            let mut next = 0u8;
            let queue = sizes
                .iter()
                .map(|&frames| {
                    let mut fragment = Vec::with_capacity(frames * frame_size);
                    for _ in 0..frames {
                        fragment.extend(std::iter::repeat(next).take(frame_size));
                        next = next.wrapping_add(1);
                    }
                    fragment
                })
                .collect();
            Self { queue, peeks: 0 }
        }
    }

    impl StreamReader for Fragments {
        fn readable_size(&self, _stream: StreamId) -> usize {
            self.queue.iter().map(Vec::len).sum()
        }

        fn peek(&mut self, _stream: StreamId) -> Result<Option<&[u8]>, ServerErrno> {
            self.peeks += 1;
            Ok(self.queue.front().map(Vec::as_slice))
        }

        fn drop_fragment(&mut self, _stream: StreamId) -> Result<(), ServerErrno> {
            self.queue.pop_front();
            Ok(())
        }
    }

    /// Frame index encoded by `Fragments::new`
    fn frame_ids(data: &[u8], frame_size: usize) -> Vec<u8> {
        data.chunks_exact(frame_size).map(|f| f[0]).collect()
    }

    const STREAM: StreamId = StreamId(7);

    #[test]
    fn test_fragment_leftover_goes_to_ring() {
        let mut reader = Fragments::new(&[100, 150, 80], 4);
        let mut ring = RingBuffer::new(4, 400);

        assert_eq!(available_frames(&reader, STREAM, &ring), 330);

        let mut out = vec![0u8; 250 * 4];
        capture_samples(&mut reader, STREAM, &mut ring, &mut out, 250).unwrap();

        let expected: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        assert_eq!(frame_ids(&out, 4), expected);
        assert_eq!(available_frames(&reader, STREAM, &ring), 80);

        let mut rest = vec![0u8; 80 * 4];
        capture_samples(&mut reader, STREAM, &mut ring, &mut rest, 80).unwrap();
        let expected: Vec<u8> = (250..330u32).map(|i| i as u8).collect();
        assert_eq!(frame_ids(&rest, 4), expected);
        assert_eq!(available_frames(&reader, STREAM, &ring), 0);
    }

    #[test]
    fn test_mid_fragment_split_saves_remainder() {
        let mut reader = Fragments::new(&[100, 150], 4);
        let mut ring = RingBuffer::new(4, 400);

        let mut out = vec![0u8; 120 * 4];
        capture_samples(&mut reader, STREAM, &mut ring, &mut out, 120).unwrap();

        assert_eq!(ring.len(), 130);
        assert_eq!(reader.readable_size(STREAM), 0);

        let mut rest = vec![0u8; 130 * 4];
        capture_samples(&mut reader, STREAM, &mut ring, &mut rest, 130).unwrap();
        let expected: Vec<u8> = (120..250u32).map(|i| i as u8).collect();
        assert_eq!(frame_ids(&rest, 4), expected);
    }

    #[test]
    fn test_insufficient_data_leaves_state_untouched() {
        let mut reader = Fragments::new(&[10, 20], 2);
        let mut ring = RingBuffer::new(2, 64);
        ring.write(&[0xEE; 8]);

        let before = available_frames(&reader, STREAM, &ring);
        assert_eq!(before, 34);

        let mut out = vec![0x55u8; 35 * 2];
        let err = capture_samples(&mut reader, STREAM, &mut ring, &mut out, 35).unwrap_err();

        assert_eq!(
            err,
            BackendError::InsufficientData {
                requested: 35,
                available: 34
            }
        );
        assert_eq!(available_frames(&reader, STREAM, &ring), before);
        assert_eq!(reader.peeks, 0);
        assert!(out.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_short_output_buffer_rejected() {
        let mut reader = Fragments::new(&[10], 4);
        let mut ring = RingBuffer::new(4, 16);
        let mut out = vec![0u8; 8];

        let err = capture_samples(&mut reader, STREAM, &mut ring, &mut out, 4).unwrap_err();
        assert_eq!(err, BackendError::BufferTooSmall { needed: 16, provided: 8 });
        assert_eq!(reader.readable_size(STREAM), 40);
    }

    #[test]
    fn test_ring_frames_come_first() {
        let mut reader = Fragments::new(&[4], 1);
        let mut ring = RingBuffer::new(1, 8);
        ring.write(&[200, 201]);

        let mut out = [0u8; 5];
        capture_samples(&mut reader, STREAM, &mut ring, &mut out, 5).unwrap();
        assert_eq!(out, [200, 201, 0, 1, 2]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_overflowing_leftover_is_truncated() {
        // One 100-frame fragment, ring of 16: pulling 10 leaves 90, keeps 16
        let mut reader = Fragments::new(&[100], 2);
        let mut ring = RingBuffer::new(2, 16);

        let mut out = vec![0u8; 10 * 2];
        capture_samples(&mut reader, STREAM, &mut ring, &mut out, 10).unwrap();

        assert_eq!(ring.len(), 16);
        assert_eq!(available_frames(&reader, STREAM, &ring), 16);

        // The kept frames are the oldest leftovers, intact
        let mut rest = vec![0u8; 16 * 2];
        capture_samples(&mut reader, STREAM, &mut ring, &mut rest, 16).unwrap();
        let expected: Vec<u8> = (10..26).collect();
        assert_eq!(frame_ids(&rest, 2), expected);
        for frame in rest.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_available_is_idempotent() {
        let reader = Fragments::new(&[33, 7], 4);
        let mut ring = RingBuffer::new(4, 64);
        ring.write(&[1; 12]);

        let first = available_frames(&reader, STREAM, &ring);
        let second = available_frames(&reader, STREAM, &ring);
        assert_eq!(first, 43);
        assert_eq!(first, second);
    }

    #[test]
    fn test_round_trip_reproduces_bytes() {
        let sizes = [3, 17, 1, 40, 9];
        let mut reader = Fragments::new(&sizes, 4);
        let original: Vec<u8> = reader.queue.iter().flatten().copied().collect();
        let mut ring = RingBuffer::new(4, 64);

        let mut collected = Vec::new();
        for pull in [5, 11, 30, 24] {
            let mut out = vec![0u8; pull * 4];
            capture_samples(&mut reader, STREAM, &mut ring, &mut out, pull).unwrap();
            collected.extend_from_slice(&out);
        }

        assert_eq!(collected, original);
    }

    #[test]
    fn test_zero_frames_is_noop() {
        let mut reader = Fragments::new(&[], 4);
        let mut ring = RingBuffer::new(4, 4);
        let mut out: [u8; 0] = [];
        capture_samples(&mut reader, STREAM, &mut ring, &mut out, 0).unwrap();
        assert_eq!(reader.peeks, 0);
    }
}
