//! In-process simulated audio server
//!
//! Behaves like a local server with one sink list and one source list:
//! contexts walk `Connecting → Authorizing → SettingName → Ready`, streams
//! walk `Created → Connecting → Ready`, and operations complete asynchronously.
//! Progress happens only in [`AudioServer::next_event`], i.e. on the mainloop thread,
//! so every transition observes the same lock discipline as a real client
//! library.
//!
//! ```text
//!   SimControl ──crossbeam──► SimServer (one per opened device)
//!   (test/demo driver)         │ applies commands in next_event()
//!         ▲                    ▼
//!         └──── Hub ◄──── played bytes, write calls, last attributes
//! ```
//!
//! Playback data written by any stream is collected in the hub; capture data
//! is injected with [`SimControl::push_capture`]. [`SimControl::sync`] blocks
//! until every live server has applied all earlier commands and dispatched
//! the resulting events.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::{
    AudioServer, EndpointInfo, OperationId, OperationState, ServerCapabilities, ServerConnector,
    ServerErrno, ServerEvent, ServerIo, StreamId, StreamReader, StreamWriter,
};
use crate::channel_map::ChannelMap;
use crate::error::BackendResult;
use crate::types::{
    BufferAttributes, ContextFlags, ContextState, Direction, SampleFormatSpec, StreamFlags,
    StreamState,
};

pub const ERR_ACCESS: ServerErrno = 1;
pub const ERR_INVALID: ServerErrno = 3;
pub const ERR_NO_ENTITY: ServerErrno = 5;
pub const ERR_CONNECTION_REFUSED: ServerErrno = 6;
pub const ERR_CONNECTION_TERMINATED: ServerErrno = 7;
pub const ERR_BAD_STATE: ServerErrno = 15;

/// How long [`SimControl::sync`] waits for each server
const SYNC_TIMEOUT: Duration = Duration::from_secs(2);

fn error_string(code: ServerErrno) -> String {
    match code {
        0 => "OK".to_string(),
        ERR_ACCESS => "Access denied".to_string(),
        ERR_INVALID => "Invalid argument".to_string(),
        ERR_NO_ENTITY => "No such entity".to_string(),
        ERR_CONNECTION_REFUSED => "Connection refused".to_string(),
        ERR_CONNECTION_TERMINATED => "Connection terminated".to_string(),
        ERR_BAD_STATE => "Bad state".to_string(),
        other => format!("Unknown error code {}", other),
    }
}

/// Server behaviour knobs
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Fail every context connection with this code
    pub refuse_errno: Option<ServerErrno>,
    /// When false, connections made without autospawn are refused
    pub server_running: bool,
    /// Rate granted to playback streams that allow the server to pick one
    pub sink_rate: Option<u32>,
    /// Largest zero-copy buffer handed out by `begin_write`
    pub zero_copy_limit: Option<usize>,
    /// Sinks; the first one is the default
    pub sinks: Vec<EndpointInfo>,
    /// Sources; the first one is the default
    pub sources: Vec<EndpointInfo>,
    /// Endpoint names whose streams come up suspended
    pub suspended: Vec<String>,
    pub capabilities: ServerCapabilities,
    /// `set_buffer_attr` fails the stream instead of applying
    pub fail_buffer_attr: bool,
    /// Endpoint queries drop the context before answering
    pub fail_queries: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        let stereo = ChannelMap::wave_ex(2).unwrap_or_default();
        Self {
            refuse_errno: None,
            server_running: true,
            sink_rate: None,
            zero_copy_limit: None,
            sinks: vec![EndpointInfo {
                name: "sim.output".to_string(),
                description: "Simulated Output".to_string(),
                channel_map: stereo.clone(),
            }],
            sources: vec![EndpointInfo {
                name: "sim.input".to_string(),
                description: "Simulated Input".to_string(),
                channel_map: stereo,
            }],
            suspended: Vec::new(),
            capabilities: ServerCapabilities::default(),
            fail_buffer_attr: false,
            fail_queries: false,
        }
    }
}

impl SimOptions {
    pub fn with_refused(mut self, code: ServerErrno) -> Self {
        self.refuse_errno = Some(code);
        self
    }

    /// No server process is running
    pub fn with_server_stopped(mut self) -> Self {
        self.server_running = false;
        self
    }

    pub fn with_sink_rate(mut self, rate: u32) -> Self {
        self.sink_rate = Some(rate);
        self
    }

    pub fn with_zero_copy_limit(mut self, bytes: usize) -> Self {
        self.zero_copy_limit = Some(bytes);
        self
    }

    pub fn with_sinks(mut self, sinks: Vec<EndpointInfo>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_sources(mut self, sources: Vec<EndpointInfo>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_suspended(mut self, endpoint: impl Into<String>) -> Self {
        self.suspended.push(endpoint.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_buffer_attr_failure(mut self) -> Self {
        self.fail_buffer_attr = true;
        self
    }

    pub fn with_query_failure(mut self) -> Self {
        self.fail_queries = true;
        self
    }
}

/// Driver command, applied on the receiving server's mainloop thread
#[derive(Debug)]
enum Command {
    PushCapture(Vec<u8>),
    RequestWrite(usize),
    FailStream(Direction),
    FailContext,
    ResizeBuffer(Direction, u32),
    MoveStream(Direction, String),
    Sync(Sender<()>),
}

struct Link {
    id: u32,
    commands: Sender<Command>,
    kick: Sender<()>,
}

/// State shared by the connector, its servers and the control handle
#[derive(Default)]
struct Hub {
    links: Mutex<Vec<Link>>,
    next_server: AtomicU32,
    played: Mutex<Vec<u8>>,
    write_calls: AtomicUsize,
    last_buffer_attr: Mutex<Option<BufferAttributes>>,
    clients: Mutex<Vec<String>>,
}

impl Hub {
    fn broadcast(&self, make: impl Fn() -> Command) {
        let links = self.links.lock();
        for link in links.iter() {
            if link.commands.send(make()).is_ok() {
                let _ = link.kick.send(());
            }
        }
    }
}

/// Creates simulated servers that share one [`SimControl`]
#[derive(Clone)]
pub struct SimConnector {
    options: SimOptions,
    hub: Arc<Hub>,
}

impl SimConnector {
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            hub: Arc::new(Hub::default()),
        }
    }

    /// Driver handle for every server this connector creates
    pub fn control(&self) -> SimControl {
        SimControl {
            hub: self.hub.clone(),
        }
    }

    pub fn options(&self) -> &SimOptions {
        &self.options
    }
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

impl ServerConnector for SimConnector {
    type Server = SimServer;

    fn create(&self, client_name: &str) -> BackendResult<SimServer> {
        let id = self.hub.next_server.fetch_add(1, Ordering::Relaxed);
        let (command_tx, command_rx) = channel::unbounded();
        let (kick_tx, kick_rx) = channel::unbounded();

        self.hub.links.lock().push(Link {
            id,
            commands: command_tx,
            kick: kick_tx.clone(),
        });
        self.hub.clients.lock().push(client_name.to_string());
        log::debug!("Simulated server {} created for '{}'", id, client_name);

        Ok(SimServer {
            id,
            options: self.options.clone(),
            hub: self.hub.clone(),
            commands: command_rx,
            io: SimIo {
                kick_rx,
                kick_tx: kick_tx.clone(),
            },
            kick: kick_tx,
            context: ContextState::Unconnected,
            errno: 0,
            streams: HashMap::new(),
            next_stream: 1,
            operations: HashMap::new(),
            next_operation: 1,
            steps: VecDeque::new(),
            events: VecDeque::new(),
            syncs: Vec::new(),
        })
    }
}

/// Mainloop idle handle for a [`SimServer`]
#[derive(Clone)]
pub struct SimIo {
    kick_rx: Receiver<()>,
    kick_tx: Sender<()>,
}

impl ServerIo for SimIo {
    fn wait(&self, timeout: Duration) {
        if self.kick_rx.recv_timeout(timeout).is_ok() {
            while self.kick_rx.try_recv().is_ok() {}
        }
    }

    fn wake(&self) {
        let _ = self.kick_tx.send(());
    }
}

/// Pending asynchronous progress
#[derive(Debug)]
enum Step {
    Context(ContextState),
    ContextFail(ServerErrno),
    Stream(StreamId, StreamState),
    StreamFail(StreamId, ServerErrno),
    SetAttr(OperationId, StreamId, BufferAttributes),
    Cork(OperationId, StreamId, bool),
    Endpoints(OperationId, Vec<EndpointInfo>),
}

struct SimStream {
    name: String,
    spec: SampleFormatSpec,
    direction: Option<Direction>,
    state: StreamState,
    device: Option<String>,
    attr: BufferAttributes,
    corked: bool,
    suspended: bool,
    fragments: VecDeque<Vec<u8>>,
    write_buf: Vec<u8>,
}

/// One simulated client connection
pub struct SimServer {
    id: u32,
    options: SimOptions,
    hub: Arc<Hub>,
    commands: Receiver<Command>,
    io: SimIo,
    kick: Sender<()>,
    context: ContextState,
    errno: ServerErrno,
    streams: HashMap<StreamId, SimStream>,
    next_stream: u32,
    operations: HashMap<OperationId, (Option<StreamId>, OperationState)>,
    next_operation: u32,
    steps: VecDeque<Step>,
    events: VecDeque<ServerEvent>,
    syncs: Vec<Sender<()>>,
}

impl SimServer {
    fn schedule(&mut self, step: Step) {
        self.steps.push_back(step);
        let _ = self.kick.send(());
    }

    fn new_operation(&mut self, stream: Option<StreamId>) -> OperationId {
        let op = OperationId(self.next_operation);
        self.next_operation += 1;
        self.operations.insert(op, (stream, OperationState::Running));
        op
    }

    fn finish_operation(&mut self, op: OperationId, success: bool) {
        if let Some((_, state)) = self.operations.get_mut(&op) {
            if *state == OperationState::Running {
                *state = OperationState::Done;
                self.events.push_back(ServerEvent::OperationFinished { op, success });
            }
        }
    }

    fn cancel_operations(&mut self, stream: Option<StreamId>) {
        for (owner, state) in self.operations.values_mut() {
            if *state == OperationState::Running && (stream.is_none() || *owner == stream) {
                *state = OperationState::Cancelled;
            }
        }
    }

    fn endpoints(&self, direction: Direction) -> &[EndpointInfo] {
        match direction {
            Direction::Playback => &self.options.sinks,
            Direction::Capture => &self.options.sources,
        }
    }

    fn streams_of(&self, direction: Direction) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, s)| s.direction == Some(direction))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    fn fail_stream(&mut self, stream: StreamId, code: ServerErrno) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.state = StreamState::Failed;
            self.errno = code;
            self.events.push_back(ServerEvent::StreamStateChanged(stream));
            self.cancel_operations(Some(stream));
        }
    }

    fn fail_context(&mut self, code: ServerErrno) {
        self.context = ContextState::Failed;
        self.errno = code;
        self.events.push_back(ServerEvent::ContextStateChanged);
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        for id in ids {
            self.fail_stream(id, code);
        }
        self.cancel_operations(None);
        self.errno = code;
    }

    /// Server-side defaults for attributes left to the server
    fn grant_attributes(direction: Direction, requested: Option<&BufferAttributes>, spec: &SampleFormatSpec) -> BufferAttributes {
        let frame_size = spec.frame_size().max(1) as u32;
        let mut attr = requested.copied().unwrap_or_else(BufferAttributes::server_choice);
        if direction == Direction::Playback {
            if attr.tlength == BufferAttributes::AUTO {
                attr.tlength = (spec.rate / 10).max(1) * frame_size;
            }
            if attr.maxlength == BufferAttributes::AUTO || attr.maxlength < attr.tlength {
                attr.maxlength = attr.tlength.saturating_mul(4);
            }
            if attr.prebuf == BufferAttributes::AUTO {
                attr.prebuf = attr.tlength;
            }
            if attr.minreq == BufferAttributes::AUTO {
                attr.minreq = (attr.tlength / 4 / frame_size).max(1) * frame_size;
            }
        } else {
            if attr.fragsize == BufferAttributes::AUTO {
                attr.fragsize = (spec.rate / 40).max(1) * frame_size;
            }
            if attr.maxlength == BufferAttributes::AUTO {
                attr.maxlength = 4 * 1024 * 1024;
            }
        }
        attr
    }

    fn apply_step(&mut self, step: Step) {
        match step {
            Step::Context(state) => {
                if self.context.is_good() {
                    self.context = state;
                    self.events.push_back(ServerEvent::ContextStateChanged);
                }
            }
            Step::ContextFail(code) => {
                if self.context.is_good() {
                    self.fail_context(code);
                }
            }
            Step::Stream(stream, state) => {
                if let Some(s) = self.streams.get_mut(&stream) {
                    if s.state.is_good() {
                        s.state = state;
                        self.events.push_back(ServerEvent::StreamStateChanged(stream));
                    }
                }
            }
            Step::StreamFail(stream, code) => self.fail_stream(stream, code),
            Step::SetAttr(op, stream, attr) => {
                if let Some(s) = self.streams.get_mut(&stream) {
                    let direction = s.direction.unwrap_or(Direction::Playback);
                    s.attr = Self::grant_attributes(direction, Some(&attr), &s.spec);
                    *self.hub.last_buffer_attr.lock() = Some(s.attr);
                    self.finish_operation(op, true);
                }
            }
            Step::Cork(op, stream, pause) => {
                if let Some(s) = self.streams.get_mut(&stream) {
                    s.corked = pause;
                    self.finish_operation(op, true);
                }
            }
            Step::Endpoints(op, infos) => {
                for info in infos {
                    self.events.push_back(ServerEvent::Endpoint { op, info });
                }
                self.finish_operation(op, true);
            }
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::PushCapture(data) => {
                for id in self.streams_of(Direction::Capture) {
                    if let Some(s) = self.streams.get_mut(&id) {
                        if s.state == StreamState::Ready && !s.corked {
                            s.fragments.push_back(data.clone());
                        }
                    }
                }
            }
            Command::RequestWrite(bytes) => {
                for id in self.streams_of(Direction::Playback) {
                    if self.stream_state(id) == StreamState::Ready {
                        self.events.push_back(ServerEvent::WriteReady { stream: id, bytes });
                    }
                }
            }
            Command::FailStream(direction) => {
                for id in self.streams_of(direction) {
                    self.fail_stream(id, ERR_CONNECTION_TERMINATED);
                }
            }
            Command::FailContext => {
                if self.context != ContextState::Unconnected {
                    self.fail_context(ERR_CONNECTION_TERMINATED);
                }
            }
            Command::ResizeBuffer(direction, tlength) => {
                for id in self.streams_of(direction) {
                    if let Some(s) = self.streams.get_mut(&id) {
                        s.attr.tlength = tlength;
                        s.attr.maxlength = s.attr.maxlength.max(tlength);
                        self.events.push_back(ServerEvent::BufferAttrChanged(id));
                    }
                }
            }
            Command::MoveStream(direction, device) => {
                for id in self.streams_of(direction) {
                    if let Some(s) = self.streams.get_mut(&id) {
                        s.device = Some(device.clone());
                        self.events.push_back(ServerEvent::Moved(id));
                    }
                }
            }
            Command::Sync(ack) => self.syncs.push(ack),
        }
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.hub.links.lock().retain(|link| link.id != self.id);
    }
}

impl StreamWriter for SimServer {
    fn begin_write(&mut self, stream: StreamId, len: usize) -> Option<&mut [u8]> {
        if !self.options.capabilities.zero_copy_write {
            return None;
        }
        let len = self.options.zero_copy_limit.map_or(len, |limit| len.min(limit));
        let s = self.streams.get_mut(&stream)?;
        s.write_buf.clear();
        s.write_buf.resize(len, 0);
        Some(s.write_buf.as_mut_slice())
    }

    fn commit_write(&mut self, stream: StreamId, len: usize) -> Result<(), ServerErrno> {
        let s = self.streams.get_mut(&stream).ok_or(ERR_BAD_STATE)?;
        if len > s.write_buf.len() {
            return Err(ERR_INVALID);
        }
        self.hub.played.lock().extend_from_slice(&s.write_buf[..len]);
        self.hub.write_calls.fetch_add(1, Ordering::Relaxed);
        s.write_buf.clear();
        Ok(())
    }

    fn write(&mut self, stream: StreamId, data: &[u8]) -> Result<(), ServerErrno> {
        if !self.streams.contains_key(&stream) {
            return Err(ERR_BAD_STATE);
        }
        self.hub.played.lock().extend_from_slice(data);
        self.hub.write_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl StreamReader for SimServer {
    fn readable_size(&self, stream: StreamId) -> usize {
        self.streams
            .get(&stream)
            .map_or(0, |s| s.fragments.iter().map(Vec::len).sum())
    }

    fn peek(&mut self, stream: StreamId) -> Result<Option<&[u8]>, ServerErrno> {
        let s = self.streams.get(&stream).ok_or(ERR_BAD_STATE)?;
        Ok(s.fragments.front().map(Vec::as_slice))
    }

    fn drop_fragment(&mut self, stream: StreamId) -> Result<(), ServerErrno> {
        let s = self.streams.get_mut(&stream).ok_or(ERR_BAD_STATE)?;
        s.fragments.pop_front().map(|_| ()).ok_or(ERR_BAD_STATE)
    }
}

impl AudioServer for SimServer {
    type Io = SimIo;

    fn io(&self) -> SimIo {
        self.io.clone()
    }

    fn capabilities(&self) -> ServerCapabilities {
        self.options.capabilities
    }

    fn connect(&mut self, flags: ContextFlags) -> Result<(), ServerErrno> {
        if self.context != ContextState::Unconnected {
            return Err(ERR_BAD_STATE);
        }
        self.context = ContextState::Connecting;
        self.events.push_back(ServerEvent::ContextStateChanged);

        if let Some(code) = self.options.refuse_errno {
            self.schedule(Step::ContextFail(code));
        } else if !self.options.server_running && flags.no_autospawn {
            self.schedule(Step::ContextFail(ERR_CONNECTION_REFUSED));
        } else {
            self.schedule(Step::Context(ContextState::Authorizing));
            self.schedule(Step::Context(ContextState::SettingName));
            self.schedule(Step::Context(ContextState::Ready));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.cancel_operations(None);
        self.streams.clear();
        self.steps.clear();
        if self.context != ContextState::Unconnected {
            self.context = ContextState::Terminated;
        }
    }

    fn context_state(&self) -> ContextState {
        self.context
    }

    fn errno(&self) -> ServerErrno {
        self.errno
    }

    fn strerror(&self, code: ServerErrno) -> String {
        error_string(code)
    }

    fn next_event(&mut self) -> Option<ServerEvent> {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command);
        }
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            match self.steps.pop_front() {
                Some(step) => self.apply_step(step),
                None => break,
            }
        }
        for ack in self.syncs.drain(..) {
            let _ = ack.send(());
        }
        None
    }

    fn create_stream(
        &mut self,
        name: &str,
        spec: &SampleFormatSpec,
        _map: &ChannelMap,
    ) -> Result<StreamId, ServerErrno> {
        if self.context != ContextState::Ready {
            self.errno = ERR_BAD_STATE;
            return Err(ERR_BAD_STATE);
        }
        if !spec.is_valid() {
            self.errno = ERR_INVALID;
            return Err(ERR_INVALID);
        }
        let id = StreamId(self.next_stream);
        self.next_stream += 1;
        self.streams.insert(
            id,
            SimStream {
                name: name.to_string(),
                spec: *spec,
                direction: None,
                state: StreamState::Created,
                device: None,
                attr: BufferAttributes::server_choice(),
                corked: false,
                suspended: false,
                fragments: VecDeque::new(),
                write_buf: Vec::new(),
            },
        );
        Ok(id)
    }

    fn connect_stream(
        &mut self,
        stream: StreamId,
        direction: Direction,
        device: Option<&str>,
        attr: Option<&BufferAttributes>,
        flags: StreamFlags,
    ) -> Result<(), ServerErrno> {
        let endpoint = match device {
            Some(name) => self.endpoints(direction).iter().find(|e| e.name == name),
            None => self.endpoints(direction).first(),
        }
        .map(|e| e.name.clone());
        let suspended = endpoint
            .as_ref()
            .is_some_and(|name| self.options.suspended.contains(name));
        let sink_rate = self.options.sink_rate;

        let s = self.streams.get_mut(&stream).ok_or(ERR_BAD_STATE)?;
        if s.state != StreamState::Created {
            return Err(ERR_BAD_STATE);
        }
        if direction == Direction::Playback && flags.fix_rate {
            if let Some(rate) = sink_rate {
                s.spec.rate = rate;
            }
        }
        s.direction = Some(direction);
        s.state = StreamState::Connecting;
        s.corked = flags.start_corked;
        s.suspended = suspended;
        s.attr = Self::grant_attributes(direction, attr, &s.spec);
        log::trace!("Simulated {:?} stream '{}' -> {:?}", direction, s.name, endpoint);
        s.device = endpoint.clone();
        self.events.push_back(ServerEvent::StreamStateChanged(stream));

        match endpoint {
            Some(_) => self.schedule(Step::Stream(stream, StreamState::Ready)),
            None => self.schedule(Step::StreamFail(stream, ERR_NO_ENTITY)),
        }
        Ok(())
    }

    /// Releasing a stream succeeds and clears the last error, as a real
    /// client library call does
    fn disconnect_stream(&mut self, stream: StreamId) {
        if self.streams.remove(&stream).is_some() {
            self.cancel_operations(Some(stream));
            self.errno = 0;
        }
    }

    fn stream_state(&self, stream: StreamId) -> StreamState {
        self.streams
            .get(&stream)
            .map_or(StreamState::Terminated, |s| s.state)
    }

    fn stream_sample_spec(&self, stream: StreamId) -> Option<SampleFormatSpec> {
        self.streams.get(&stream).map(|s| s.spec)
    }

    fn stream_buffer_attr(&self, stream: StreamId) -> Option<BufferAttributes> {
        self.streams.get(&stream).map(|s| s.attr)
    }

    fn stream_device_name(&self, stream: StreamId) -> Option<String> {
        self.streams.get(&stream).and_then(|s| s.device.clone())
    }

    fn stream_is_suspended(&self, stream: StreamId) -> bool {
        self.streams.get(&stream).is_some_and(|s| s.suspended)
    }

    fn set_buffer_attr(
        &mut self,
        stream: StreamId,
        attr: &BufferAttributes,
    ) -> Result<OperationId, ServerErrno> {
        if !self.stream_state(stream).is_operational() {
            return Err(ERR_BAD_STATE);
        }
        let op = self.new_operation(Some(stream));
        if self.options.fail_buffer_attr {
            self.schedule(Step::StreamFail(stream, ERR_CONNECTION_TERMINATED));
        } else {
            self.schedule(Step::SetAttr(op, stream, *attr));
        }
        Ok(op)
    }

    fn cork(&mut self, stream: StreamId, pause: bool) -> Result<OperationId, ServerErrno> {
        if !self.stream_state(stream).is_operational() {
            return Err(ERR_BAD_STATE);
        }
        let op = self.new_operation(Some(stream));
        self.schedule(Step::Cork(op, stream, pause));
        Ok(op)
    }

    fn operation_state(&self, op: OperationId) -> OperationState {
        self.operations
            .get(&op)
            .map_or(OperationState::Cancelled, |(_, state)| *state)
    }

    fn query_endpoints(
        &mut self,
        direction: Direction,
        name: Option<&str>,
    ) -> Result<OperationId, ServerErrno> {
        if self.context != ContextState::Ready {
            return Err(ERR_BAD_STATE);
        }
        let infos: Vec<EndpointInfo> = self
            .endpoints(direction)
            .iter()
            .filter(|e| name.map_or(true, |n| e.name == n))
            .cloned()
            .collect();
        let op = self.new_operation(None);
        if self.options.fail_queries {
            self.schedule(Step::ContextFail(ERR_CONNECTION_TERMINATED));
        } else {
            self.schedule(Step::Endpoints(op, infos));
        }
        Ok(op)
    }
}

/// Driver side of the simulated server
#[derive(Clone)]
pub struct SimControl {
    hub: Arc<Hub>,
}

impl SimControl {
    /// Deliver one capture fragment to every running (uncorked) record stream
    pub fn push_capture(&self, data: &[u8]) {
        let data = data.to_vec();
        self.hub.broadcast(|| Command::PushCapture(data.clone()));
    }

    /// Ask every playback stream for `bytes` more bytes
    pub fn request_write(&self, bytes: usize) {
        self.hub.broadcast(|| Command::RequestWrite(bytes));
    }

    /// Move every stream of `direction` to `Failed`
    ///
    /// Each call produces a state notification, even for streams that have
    /// already failed.
    pub fn fail_stream(&self, direction: Direction) {
        self.hub.broadcast(|| Command::FailStream(direction));
    }

    /// Drop every connected context
    pub fn fail_context(&self) {
        self.hub.broadcast(|| Command::FailContext);
    }

    /// Server-initiated resize of the target length
    pub fn resize_buffer(&self, direction: Direction, tlength: u32) {
        self.hub.broadcast(|| Command::ResizeBuffer(direction, tlength));
    }

    /// Move every stream of `direction` to another endpoint
    pub fn move_stream(&self, direction: Direction, endpoint: &str) {
        let endpoint = endpoint.to_string();
        self.hub
            .broadcast(|| Command::MoveStream(direction, endpoint.clone()));
    }

    /// Block until every live server has applied earlier commands and
    /// dispatched the resulting events; false on timeout
    pub fn sync(&self) -> bool {
        let mut pending = Vec::new();
        {
            let links = self.hub.links.lock();
            for link in links.iter() {
                let (tx, rx) = channel::bounded(1);
                if link.commands.send(Command::Sync(tx)).is_ok() {
                    let _ = link.kick.send(());
                    pending.push(rx);
                }
            }
        }
        pending
            .iter()
            .all(|rx| rx.recv_timeout(SYNC_TIMEOUT).is_ok())
    }

    /// Every playback byte received so far
    pub fn played_bytes(&self) -> Vec<u8> {
        self.hub.played.lock().clone()
    }

    /// Take and clear the received playback bytes
    pub fn take_played(&self) -> Vec<u8> {
        std::mem::take(&mut *self.hub.played.lock())
    }

    /// Number of write/commit calls received
    pub fn write_calls(&self) -> usize {
        self.hub.write_calls.load(Ordering::Relaxed)
    }

    /// Attributes applied by the last `set_buffer_attr`
    pub fn last_buffer_attr(&self) -> Option<BufferAttributes> {
        *self.hub.last_buffer_attr.lock()
    }

    /// Servers created and not yet dropped
    pub fn live_servers(&self) -> usize {
        self.hub.links.lock().len()
    }

    /// Client names announced, in creation order
    pub fn client_names(&self) -> Vec<String> {
        self.hub.clients.lock().clone()
    }
}
