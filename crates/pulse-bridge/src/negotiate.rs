//! Buffer attribute negotiation
//!
//! Turns host scheduling parameters into the byte-based attributes the server
//! understands, and turns whatever the server grants back into host
//! scheduling. The server may resize the buffer at any time (e.g. after the
//! stream moves to another sink), so [`apply_server_attributes`] also runs
//! from the attribute-change notification.
//!
//! ```text
//!  host: update_size U, num_updates C, frame_size S, rate R
//!            │
//!            ▼  tlength = U·C·S, maxlength = tlength
//!  request ──────────────► server grants rate R', attributes A
//!            │
//!            ▼  R' ≠ R: tlength = ⌊tlength/S · R'/R⌋ · S, push, wait
//!  host ◄─── update_size = 20 ms of frames, num_updates = ⌊tlength/S/U⌋ ≥ 1
//! ```

use crate::channel_map::{layout_for_map, ChannelMap};
use crate::config::BackendConfig;
use crate::connection;
use crate::error::{BackendError, BackendResult};
use crate::mainloop::LoopGuard;
use crate::server::{AudioServer, OperationState, StreamId};
use crate::session::{DeviceState, Session, Watch};
use crate::types::{
    BufferAttributes, Direction, HostFormat, SampleEncoding, SampleFormatSpec, StreamFlags,
};

/// Host update quantum derived from granted attributes
pub const UPDATE_QUANTUM_MS: u32 = 20;

/// Capture fragment target
pub const CAPTURE_FRAGMENT_MS: u32 = 10;

/// Host scheduling derived from server attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduling {
    pub update_size: u32,
    pub num_updates: u32,
}

fn to_u32(bytes: u64) -> u32 {
    // AUTO is reserved for "server choice"
    u32::try_from(bytes).unwrap_or(BufferAttributes::AUTO - 1)
}

/// Playback request: the whole host buffer as target length
pub fn playback_attributes(update_size: u32, num_updates: u32, frame_size: usize) -> BufferAttributes {
    let tlength = to_u32(update_size as u64 * num_updates as u64 * frame_size as u64);
    BufferAttributes {
        maxlength: tlength,
        tlength,
        ..BufferAttributes::server_choice()
    }
}

/// Rescale the target length after the server picked another rate
///
/// Truncates to whole frames: `⌊tlength/S · granted/requested⌋ · S`.
/// `maxlength` follows `tlength`.
pub fn rescale_for_rate(
    attr: &BufferAttributes,
    frame_size: usize,
    requested: u32,
    granted: u32,
) -> BufferAttributes {
    if requested == 0 || requested == granted || frame_size == 0 {
        return *attr;
    }
    let frame_size = frame_size as u64;
    let frames = attr.tlength as u64 / frame_size * granted as u64 / requested as u64;
    let tlength = to_u32(frames * frame_size);
    BufferAttributes {
        maxlength: tlength,
        tlength,
        ..*attr
    }
}

/// Host scheduling for the attributes the server actually granted
pub fn scheduling_for(attr: &BufferAttributes, frame_size: usize, rate: u32) -> Scheduling {
    let update_size = (UPDATE_QUANTUM_MS as u64 * rate as u64 / 1000).max(1);
    let frames = attr.tlength as u64 / frame_size.max(1) as u64;
    Scheduling {
        update_size: to_u32(update_size),
        num_updates: to_u32((frames / update_size).max(1)),
    }
}

/// Capture request for a ring of `samples` frames
///
/// `fragsize` asks for 10 ms fragments, never more than `maxlength` and
/// never less than one frame.
pub fn capture_attributes(samples: u32, frame_size: usize, rate: u32) -> BufferAttributes {
    let frame_size = frame_size.max(1) as u64;
    let maxlength = samples as u64 * frame_size;
    let fragment_frames = (CAPTURE_FRAGMENT_MS as u64 * rate as u64 / 1000).max(1);
    let fragsize = (fragment_frames * frame_size).min(maxlength).max(frame_size);
    BufferAttributes {
        maxlength: to_u32(maxlength),
        fragsize: to_u32(fragsize),
        ..BufferAttributes::server_choice()
    }
}

/// Pull the stream's current attributes and recompute host scheduling
///
/// Runs on host threads during reset and on the mainloop thread for
/// attribute-change notifications.
pub fn apply_server_attributes<S: AudioServer>(server: &S, device: &mut DeviceState, stream: StreamId) {
    if let Some(attr) = server.stream_buffer_attr(stream) {
        device.attr = attr;
    }
    let sched = scheduling_for(&device.attr, device.frame_size, device.params.frequency);
    device.params.update_size = sched.update_size;
    device.params.num_updates = sched.num_updates;
    log::debug!(
        "'{}' buffer: tlength {} bytes, {} x {} frames",
        device.name,
        device.attr.tlength,
        sched.num_updates,
        sched.update_size
    );
}

/// Pick the host format from the sink's channel map
///
/// Keeps the current format when the query fails or nothing matches.
fn query_sink_format<S: AudioServer>(guard: &mut LoopGuard<'_, S>, allow_superset: bool) {
    guard.device.endpoints.clear();
    let endpoint = guard.device.endpoint.clone();
    let op = match guard.server.query_endpoints(Direction::Playback, endpoint.as_deref()) {
        Ok(op) => op,
        Err(code) => {
            log::warn!("Sink query failed: {}", guard.server.strerror(code));
            return;
        }
    };
    if connection::wait_operation(guard, op) != OperationState::Done {
        log::warn!("Sink query did not complete");
    }

    let endpoints = std::mem::take(&mut guard.device.endpoints);
    let Some(sink) = endpoints.first() else {
        log::warn!("No sink info for {:?}", endpoint);
        return;
    };

    let superset = allow_superset && guard.server.capabilities().channel_superset;
    match layout_for_map(&sink.channel_map, superset) {
        Some(layout) => {
            guard.device.params.format = HostFormat::new(layout, SampleEncoding::F32);
        }
        None => log::warn!("Failed to find format for channel map: {}", sink.channel_map),
    }
}

/// The stream is still operational and the device not flagged disconnected
fn check_alive<S: AudioServer>(session: &Session<S>, stream: StreamId) -> BackendResult<()> {
    let state = session.server.stream_state(stream);
    if state.is_operational() && !session.device.monitor.is_disconnected() {
        return Ok(());
    }
    let message = format!("playback stream lost during setup ({:?})", state);
    log::error!("{}", message);
    Err(BackendError::Stream(message))
}

/// Create the playback stream and settle its format, rate and buffering
///
/// Leaves the stream installed with persistent watchers, the buffer prefilled
/// once with `tlength` bytes and the write handler enabled. A stream that
/// fails while the rate is reconciled is detached and reported as
/// [`BackendError::Stream`]. Host parameters
/// (`frequency`, `update_size`, `num_updates`, and `format` when unpinned)
/// are rewritten to what the server granted.
pub fn negotiate_playback<S: AudioServer>(
    guard: &mut LoopGuard<'_, S>,
    config: &BackendConfig,
) -> BackendResult<()> {
    if !config.pinned_format {
        query_sink_format(guard, config.allow_channel_superset);
    }

    let flags = StreamFlags {
        fix_rate: !config.pinned_frequency,
        ..StreamFlags::default()
    };

    let params = guard.device.params;
    let frame_size = params.frame_size();
    let requested = playback_attributes(params.update_size, params.num_updates, frame_size);

    let spec = SampleFormatSpec::from_host(params.format, params.frequency);
    spec.validate()?;
    let map = ChannelMap::wave_ex(spec.channels).ok_or_else(|| {
        BackendError::Format(format!("no channel map for {} channels", spec.channels))
    })?;

    guard.device.frame_size = frame_size;
    guard.device.attr = requested;

    let stream = connection::connect_stream(
        guard,
        "Playback Stream",
        Direction::Playback,
        &spec,
        &map,
        Some(&requested),
        flags,
    )?;
    guard.device.stream = Some(stream);
    guard.device.watch.stream = Some((stream, Watch::Persistent));

    let granted = guard.server.stream_sample_spec(stream).unwrap_or(spec);
    guard.device.spec = Some(granted);

    if granted.rate != params.frequency {
        let attr = rescale_for_rate(&guard.device.attr, frame_size, params.frequency, granted.rate);
        log::info!(
            "Server picked {} Hz (asked for {}), tlength {} -> {} bytes",
            granted.rate,
            params.frequency,
            guard.device.attr.tlength,
            attr.tlength
        );
        guard.device.attr = attr;

        match guard.server.set_buffer_attr(stream, &attr) {
            Ok(op) => {
                if connection::wait_operation(guard, op) != OperationState::Done {
                    log::warn!("Buffer attribute update was not acknowledged");
                }
            }
            Err(code) => {
                log::warn!("Failed to update buffer attributes: {}", guard.server.strerror(code))
            }
        }
        guard.device.params.frequency = granted.rate;
    }

    if let Err(e) = check_alive(&**guard, stream) {
        connection::detach_stream(&mut **guard);
        guard.device.params = params;
        guard.device.spec = None;
        return Err(e);
    }

    let session = &mut **guard;
    apply_server_attributes(&session.server, &mut session.device, stream);

    let caps = session.server.capabilities();
    session.device.watch.buffer_attr = caps.buffer_attr_notify;
    session.device.watch.moved = true;

    let prefill = session.device.attr.tlength as usize;
    session.on_write_ready(stream, prefill);
    session.device.watch.write = true;

    log::info!(
        "Playback ready on '{}': {} @ {} Hz",
        session.device.name,
        session.device.params.format,
        session.device.params.frequency
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_request() {
        let attr = playback_attributes(1024, 4, 4);
        assert_eq!(attr.tlength, 16384);
        assert_eq!(attr.maxlength, attr.tlength);
        assert_eq!(attr.prebuf, BufferAttributes::AUTO);
        assert_eq!(attr.minreq, BufferAttributes::AUTO);
        assert_eq!(attr.fragsize, BufferAttributes::AUTO);
    }

    #[test]
    fn test_rescale_truncates_to_frames() {
        // 1000 frames of 4 bytes at 44100 -> 48000: floor(1000 * 48000 / 44100) = 1088
        let attr = playback_attributes(1000, 1, 4);
        let scaled = rescale_for_rate(&attr, 4, 44100, 48000);
        assert_eq!(scaled.tlength, 1088 * 4);
        assert_eq!(scaled.maxlength, scaled.tlength);
        assert_eq!(scaled.tlength % 4, 0);
    }

    #[test]
    fn test_rescale_same_rate_is_identity() {
        let attr = playback_attributes(512, 3, 6);
        assert_eq!(rescale_for_rate(&attr, 6, 48000, 48000), attr);
    }

    #[test]
    fn test_rescale_down() {
        let attr = playback_attributes(2048, 1, 4);
        let scaled = rescale_for_rate(&attr, 4, 48000, 44100);
        assert_eq!(scaled.tlength, (2048 * 44100 / 48000) * 4);
    }

    #[test]
    fn test_scheduling_uses_20ms_quantum() {
        let attr = playback_attributes(2048, 1, 4);
        let sched = scheduling_for(&attr, 4, 44100);
        assert_eq!(sched.update_size, 882);
        assert_eq!(sched.num_updates, 2);
    }

    #[test]
    fn test_scheduling_minimum_one_update() {
        let attr = playback_attributes(64, 1, 4);
        let sched = scheduling_for(&attr, 4, 48000);
        assert_eq!(sched.update_size, 960);
        assert_eq!(sched.num_updates, 1);
    }

    #[test]
    fn test_capture_attributes() {
        let attr = capture_attributes(4096, 4, 48000);
        assert_eq!(attr.maxlength, 16384);
        assert_eq!(attr.tlength, BufferAttributes::AUTO);
        assert_eq!(attr.prebuf, BufferAttributes::AUTO);
        assert_eq!(attr.minreq, BufferAttributes::AUTO);
        assert_eq!(attr.fragsize, 480 * 4);
    }

    #[test]
    fn test_capture_fragsize_bounded_by_maxlength() {
        let attr = capture_attributes(16, 4, 48000);
        assert_eq!(attr.fragsize, attr.maxlength);

        let attr = capture_attributes(1, 4, 8);
        assert_eq!(attr.fragsize, 4);
    }
}
