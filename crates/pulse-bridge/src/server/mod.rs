//! Audio-server client seam
//!
//! The bridge drives the server's client library through these traits. The
//! library owns its context and stream objects; the bridge refers to streams
//! and pending operations by handle. Every method except those on
//! [`ServerIo`] is called with the mainloop lock held, either by a host thread
//! or by the mainloop thread while it dispatches [`ServerEvent`]s.
//!
//! [`sim`] provides an in-process implementation used by the tests and the
//! loopback demo.

pub mod sim;

use std::time::Duration;

use crate::channel_map::ChannelMap;
use crate::error::BackendResult;
use crate::types::{
    BufferAttributes, ContextFlags, ContextState, Direction, SampleFormatSpec, StreamFlags,
    StreamState,
};

/// Error code reported by the server
pub type ServerErrno = i32;

/// Handle to a server-side stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

/// Handle to an asynchronous server operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Done,
    Cancelled,
}

/// Optional features of the client library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// `begin_write` can hand out server-owned buffers
    pub zero_copy_write: bool,
    /// The server reports buffer attribute changes
    pub buffer_attr_notify: bool,
    /// Channel maps can be tested for supersets
    pub channel_superset: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            zero_copy_write: true,
            buffer_attr_notify: true,
            channel_superset: true,
        }
    }
}

/// Sink or source description returned by an endpoint query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Server-side endpoint name
    pub name: String,
    /// Human-readable description
    pub description: String,
    pub channel_map: ChannelMap,
}

/// Notification produced by the client library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ContextStateChanged,
    StreamStateChanged(StreamId),
    /// The server accepts exactly `bytes` more playback bytes
    WriteReady { stream: StreamId, bytes: usize },
    BufferAttrChanged(StreamId),
    /// The stream was moved to another sink/source
    Moved(StreamId),
    OperationFinished { op: OperationId, success: bool },
    /// One result of an endpoint query
    Endpoint { op: OperationId, info: EndpointInfo },
}

/// Playback data path
pub trait StreamWriter {
    /// Borrow a server-owned buffer of at most `len` bytes
    ///
    /// The buffer may be shorter than requested. `None` means no zero-copy
    /// buffer is available and the caller must use [`StreamWriter::write`].
    fn begin_write(&mut self, stream: StreamId, len: usize) -> Option<&mut [u8]>;

    /// Hand the first `len` bytes of the borrowed buffer to the server
    fn commit_write(&mut self, stream: StreamId, len: usize) -> Result<(), ServerErrno>;

    /// Copy `data` to the server
    fn write(&mut self, stream: StreamId, data: &[u8]) -> Result<(), ServerErrno>;
}

/// Capture data path
pub trait StreamReader {
    /// Captured bytes queued on the server and not yet dropped
    fn readable_size(&self, stream: StreamId) -> usize;

    /// The next fragment, or `None` when the queue is empty
    fn peek(&mut self, stream: StreamId) -> Result<Option<&[u8]>, ServerErrno>;

    /// Discard the fragment returned by the last `peek`
    fn drop_fragment(&mut self, stream: StreamId) -> Result<(), ServerErrno>;
}

/// The server's client library: one context plus the streams created on it
pub trait AudioServer: StreamWriter + StreamReader + Send + 'static {
    type Io: ServerIo;

    /// Lock-free handle the mainloop thread idles on
    fn io(&self) -> Self::Io;

    fn capabilities(&self) -> ServerCapabilities;

    /// Start connecting; completion is reported through state changes
    fn connect(&mut self, flags: ContextFlags) -> Result<(), ServerErrno>;
    fn disconnect(&mut self);
    fn context_state(&self) -> ContextState;
    /// Last error reported by the context
    fn errno(&self) -> ServerErrno;
    fn strerror(&self, code: ServerErrno) -> String {
        format!("server error {}", code)
    }

    /// Next pending notification; drained by the mainloop thread
    fn next_event(&mut self) -> Option<ServerEvent>;

    fn create_stream(
        &mut self,
        name: &str,
        spec: &SampleFormatSpec,
        map: &ChannelMap,
    ) -> Result<StreamId, ServerErrno>;

    /// Start connecting a stream to a sink (playback) or source (capture)
    ///
    /// `device` of `None` selects the server default.
    fn connect_stream(
        &mut self,
        stream: StreamId,
        direction: Direction,
        device: Option<&str>,
        attr: Option<&BufferAttributes>,
        flags: StreamFlags,
    ) -> Result<(), ServerErrno>;

    /// Disconnect and release a stream; the handle is invalid afterwards
    fn disconnect_stream(&mut self, stream: StreamId);

    fn stream_state(&self, stream: StreamId) -> StreamState;
    fn stream_sample_spec(&self, stream: StreamId) -> Option<SampleFormatSpec>;
    fn stream_buffer_attr(&self, stream: StreamId) -> Option<BufferAttributes>;
    fn stream_device_name(&self, stream: StreamId) -> Option<String>;
    fn stream_is_suspended(&self, stream: StreamId) -> bool;

    fn set_buffer_attr(
        &mut self,
        stream: StreamId,
        attr: &BufferAttributes,
    ) -> Result<OperationId, ServerErrno>;

    /// Pause (`true`) or resume (`false`) a stream
    fn cork(&mut self, stream: StreamId, pause: bool) -> Result<OperationId, ServerErrno>;

    fn operation_state(&self, op: OperationId) -> OperationState;

    /// Query sinks (playback) or sources (capture)
    ///
    /// `name` of `None` lists every endpoint; results arrive as
    /// [`ServerEvent::Endpoint`] before the operation finishes.
    fn query_endpoints(
        &mut self,
        direction: Direction,
        name: Option<&str>,
    ) -> Result<OperationId, ServerErrno>;
}

/// Idle wait for the mainloop thread
pub trait ServerIo: Clone + Send + 'static {
    /// Block until the server has something to dispatch or `timeout` passes
    fn wait(&self, timeout: Duration);

    /// Interrupt a pending `wait`
    fn wake(&self);
}

/// Creates a fresh server client per opened device
pub trait ServerConnector {
    type Server: AudioServer;

    fn create(&self, client_name: &str) -> BackendResult<Self::Server>;
}
