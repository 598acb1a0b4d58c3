//! Playback write bridge
//!
//! Runs on the mainloop thread whenever the server asks for more data. The
//! server names an exact byte count; the bridge pulls that much audio from the
//! host mixer and hands it over, preferring a server-owned (zero-copy) buffer
//! and falling back to a scratch buffer when none is offered. Nothing is kept
//! between calls.

use crate::host::Mixer;
use crate::server::{StreamId, StreamWriter};

/// Mix whole frames into `buf`; a trailing partial frame is zeroed
fn fill(mixer: &mut dyn Mixer, buf: &mut [u8], frame_size: usize) {
    let frames = buf.len() / frame_size.max(1);
    if frames > 0 {
        mixer.mix(buf, frames);
    }
    buf[frames * frame_size..].fill(0);
}

/// Bytes of a granted zero-copy buffer to use
///
/// Whole frames only, so every chunk starts on a frame boundary. A partial
/// frame is allowed only for the tail of a request shorter than one frame.
fn chunk_len(granted: usize, remaining: usize, frame_size: usize) -> usize {
    let chunk = granted.min(remaining);
    if remaining < frame_size {
        chunk
    } else {
        chunk - chunk % frame_size
    }
}

/// Write exactly `requested` bytes of mixer output to `stream`
///
/// Loops until the request is satisfied; each pass writes one chunk, which
/// is shorter than the remainder when the server grants a smaller zero-copy
/// buffer. A grant smaller than one frame falls back to a scratch buffer.
/// Stops early (logging) if the server rejects a chunk.
pub fn on_write_ready<W: StreamWriter + ?Sized>(
    writer: &mut W,
    stream: StreamId,
    mixer: &mut dyn Mixer,
    frame_size: usize,
    requested: usize,
) {
    let frame_size = frame_size.max(1);
    let mut remaining = requested;

    while remaining > 0 {
        let zero_copy = match writer.begin_write(stream, remaining) {
            Some(buf) => match chunk_len(buf.len(), remaining, frame_size) {
                0 => None,
                chunk => {
                    fill(mixer, &mut buf[..chunk], frame_size);
                    Some(chunk)
                }
            },
            None => None,
        };

        let result = match zero_copy {
            Some(chunk) => writer.commit_write(stream, chunk).map(|()| chunk),
            None => {
                let mut scratch = vec![0u8; remaining];
                fill(mixer, &mut scratch, frame_size);
                writer.write(stream, &scratch).map(|()| remaining)
            }
        };

        match result {
            Ok(chunk) => {
                log::trace!("Wrote {} bytes to {:?}", chunk, stream);
                remaining -= chunk;
            }
            Err(code) => {
                log::error!(
                    "Playback write failed with {} of {} bytes outstanding (code {})",
                    remaining,
                    requested,
                    code
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerErrno;

    /// Writer that records committed chunks
    struct Recorder {
        zero_copy_limit: Option<usize>,
        buffer: Vec<u8>,
        chunks: Vec<usize>,
        data: Vec<u8>,
        reject: bool,
    }

    impl Recorder {
        fn new(zero_copy_limit: Option<usize>) -> Self {
            Self {
                zero_copy_limit,
                buffer: Vec::new(),
                chunks: Vec::new(),
                data: Vec::new(),
                reject: false,
            }
        }
    }

    impl StreamWriter for Recorder {
        fn begin_write(&mut self, _stream: StreamId, len: usize) -> Option<&mut [u8]> {
            let limit = self.zero_copy_limit?;
            self.buffer = vec![0xAA; len.min(limit)];
            Some(self.buffer.as_mut_slice())
        }

        fn commit_write(&mut self, _stream: StreamId, len: usize) -> Result<(), ServerErrno> {
            if self.reject {
                return Err(-1);
            }
            self.chunks.push(len);
            self.data.extend_from_slice(&self.buffer[..len]);
            Ok(())
        }

        fn write(&mut self, _stream: StreamId, data: &[u8]) -> Result<(), ServerErrno> {
            if self.reject {
                return Err(-1);
            }
            self.chunks.push(data.len());
            self.data.extend_from_slice(data);
            Ok(())
        }
    }

    /// Mixer that counts frames and writes a running frame counter
    struct Counter {
        calls: Vec<usize>,
        next: u8,
    }

    impl Mixer for Counter {
        fn mix(&mut self, out: &mut [u8], frames: usize) {
            self.calls.push(frames);
            for frame in out.chunks_exact_mut(4).take(frames) {
                frame.fill(self.next);
                self.next = self.next.wrapping_add(1);
            }
        }
    }

    #[test]
    fn test_single_chunk_for_full_grant() {
        let mut writer = Recorder::new(Some(usize::MAX));
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 4096);

        assert_eq!(mixer.calls, vec![1024]);
        assert_eq!(writer.chunks, vec![4096]);
        assert_eq!(writer.data.len(), 4096);
    }

    #[test]
    fn test_short_zero_copy_buffers_loop() {
        let mut writer = Recorder::new(Some(1000));
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 4096);

        assert_eq!(writer.chunks, vec![1000, 1000, 1000, 1000, 96]);
        assert_eq!(mixer.calls, vec![250, 250, 250, 250, 24]);
        assert_eq!(writer.data.len(), 4096);
        // Frames stay in order across chunks
        for (i, frame) in writer.data.chunks_exact(4).enumerate() {
            assert_eq!(frame, [i as u8; 4]);
        }
    }

    #[test]
    fn test_odd_grant_keeps_frame_alignment() {
        let mut writer = Recorder::new(Some(1002));
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 4096);

        assert_eq!(writer.chunks, vec![1000, 1000, 1000, 1000, 96]);
        assert_eq!(mixer.calls.iter().sum::<usize>(), 1024);
        for (i, frame) in writer.data.chunks_exact(4).enumerate() {
            assert_eq!(frame, [i as u8; 4]);
        }
    }

    #[test]
    fn test_grant_below_one_frame_uses_scratch() {
        let mut writer = Recorder::new(Some(3));
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 16);

        assert_eq!(writer.chunks, vec![16]);
        assert_eq!(writer.data, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn test_chunk_len() {
        assert_eq!(chunk_len(1002, 4096, 4), 1000);
        assert_eq!(chunk_len(8192, 4096, 4), 4096);
        assert_eq!(chunk_len(3, 16, 4), 0);
        // Tail shorter than a frame
        assert_eq!(chunk_len(100, 2, 4), 2);
    }

    #[test]
    fn test_scratch_fallback_without_zero_copy() {
        let mut writer = Recorder::new(None);
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 512);

        assert_eq!(writer.chunks, vec![512]);
        assert_eq!(mixer.calls, vec![128]);
    }

    #[test]
    fn test_partial_frame_is_zeroed() {
        let mut writer = Recorder::new(Some(usize::MAX));
        let mut mixer = Counter { calls: Vec::new(), next: 5 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 10);

        assert_eq!(mixer.calls, vec![2]);
        assert_eq!(writer.data, vec![5, 5, 5, 5, 6, 6, 6, 6, 0, 0]);
    }

    #[test]
    fn test_rejected_write_stops() {
        let mut writer = Recorder::new(Some(100));
        writer.reject = true;
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 4096);

        assert!(writer.chunks.is_empty());
        assert_eq!(mixer.calls.len(), 1);
    }

    #[test]
    fn test_zero_request_is_noop() {
        let mut writer = Recorder::new(Some(100));
        let mut mixer = Counter { calls: Vec::new(), next: 0 };

        on_write_ready(&mut writer, StreamId(1), &mut mixer, 4, 0);

        assert!(writer.chunks.is_empty());
        assert!(mixer.calls.is_empty());
    }
}
