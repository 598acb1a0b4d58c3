//! Connection handshake and blocking waits
//!
//! Every function here runs on a host thread holding the mainloop lock and
//! blocks by releasing it in [`LoopGuard::wait`]. Each wake re-checks the
//! real state, because wakes may be spurious or caused by an unrelated
//! transition. There are no timeouts: a wait ends only when the server
//! reaches the awaited state or a terminal one.

use crate::channel_map::ChannelMap;
use crate::error::{BackendError, BackendResult};
use crate::mainloop::LoopGuard;
use crate::server::{AudioServer, OperationId, OperationState, ServerErrno, StreamId};
use crate::session::{Session, Subscriptions, Watch};
use crate::types::{
    BufferAttributes, ContextFlags, ContextState, Direction, SampleFormatSpec, StreamFlags,
};

/// Connect the context and block until it is `Ready`
///
/// Fails with [`BackendError::Connection`] carrying the server's error code
/// when the context leaves the good states. The transient state watcher is
/// removed before returning, whatever the outcome.
pub fn connect<S: AudioServer>(guard: &mut LoopGuard<'_, S>, flags: ContextFlags) -> BackendResult<()> {
    guard.device.watch.context = Some(Watch::Transient);

    let result = match guard.server.connect(flags) {
        Ok(()) => loop {
            let state = guard.server.context_state();
            if state == ContextState::Ready {
                break Ok(());
            }
            if !state.is_good() {
                break Err(guard.server.errno());
            }
            guard.wait();
        },
        Err(code) => Err(code),
    };

    guard.device.watch.context = None;

    result.map_err(|code| {
        let message = guard.server.strerror(code);
        log::error!("Context did not connect: {}", message);
        guard.server.disconnect();
        BackendError::Connection { code, message }
    })
}

/// Tear down the stream (if any), then the context
///
/// The stream always goes first so no stream callback can fire against a
/// half-released context.
pub fn disconnect<S: AudioServer>(session: &mut Session<S>) {
    if let Some(stream) = session.device.stream.take() {
        session.device.watch = Subscriptions {
            context: session.device.watch.context,
            ..Subscriptions::default()
        };
        session.server.disconnect_stream(stream);
    }
    session.device.watch.context = None;
    session.server.disconnect();
    log::debug!("Disconnected '{}'", session.device.name);
}

/// Create a stream, connect it, and block until it is operational
///
/// On failure the stream is released before the error is returned.
pub fn connect_stream<S: AudioServer>(
    guard: &mut LoopGuard<'_, S>,
    name: &str,
    direction: Direction,
    spec: &SampleFormatSpec,
    map: &ChannelMap,
    attr: Option<&BufferAttributes>,
    flags: StreamFlags,
) -> BackendResult<StreamId> {
    let stream = guard
        .server
        .create_stream(name, spec, map)
        .map_err(|code| stream_error(guard, "Stream creation failed", code))?;

    guard.device.watch.stream = Some((stream, Watch::Transient));

    let endpoint = guard.device.endpoint.clone();
    if let Err(code) = guard
        .server
        .connect_stream(stream, direction, endpoint.as_deref(), attr, flags)
    {
        release_stream(guard, stream);
        return Err(stream_error(guard, "Stream did not connect", code));
    }

    loop {
        let state = guard.server.stream_state(stream);
        if state.is_operational() {
            break;
        }
        if !state.is_good() {
            let code = guard.server.errno();
            release_stream(guard, stream);
            return Err(stream_error(guard, "Stream did not get ready", code));
        }
        guard.wait();
    }

    guard.device.watch.stream = None;
    log::debug!("{} connected ({:?})", name, stream);
    Ok(stream)
}

/// Disconnect and release a stream that never became the active one
pub fn release_stream<S: AudioServer>(guard: &mut LoopGuard<'_, S>, stream: StreamId) {
    if matches!(guard.device.watch.stream, Some((watched, _)) if watched == stream) {
        guard.device.watch.stream = None;
    }
    guard.server.disconnect_stream(stream);
}

/// Drop the active stream and every stream handler
///
/// Clears the capture ring so a later stream never sees stale frames.
pub fn detach_stream<S: AudioServer>(session: &mut Session<S>) {
    let Some(stream) = session.device.stream.take() else {
        return;
    };
    let watch = &mut session.device.watch;
    watch.write = false;
    watch.buffer_attr = false;
    watch.moved = false;
    watch.stream = None;
    session.server.disconnect_stream(stream);
    if let Some(ring) = session.device.ring.as_mut() {
        ring.clear();
    }
}

/// Block until a server operation is no longer running
pub fn wait_operation<S: AudioServer>(guard: &mut LoopGuard<'_, S>, op: OperationId) -> OperationState {
    loop {
        let state = guard.server.operation_state(op);
        if state != OperationState::Running {
            return state;
        }
        guard.wait();
    }
}

fn stream_error<S: AudioServer>(guard: &LoopGuard<'_, S>, what: &str, code: ServerErrno) -> BackendError {
    let message = format!("{}: {}", what, guard.server.strerror(code));
    log::error!("{}", message);
    BackendError::Stream(message)
}
