//! Server-handle state guarded by the mainloop lock
//!
//! A [`Session`] pairs the server client with the bridge's per-device state.
//! It lives inside the mainloop mutex: host threads reach it through a
//! [`LoopGuard`](crate::mainloop::LoopGuard), and the mainloop thread reaches
//! it while dispatching server notifications. Exactly one of them touches it
//! at a time.

use crate::capture;
use crate::host::{DeviceParams, DisconnectMonitor, Mixer};
use crate::negotiate;
use crate::playback;
use crate::ring::RingBuffer;
use crate::server::{AudioServer, EndpointInfo, ServerEvent, StreamId};
use crate::types::{BufferAttributes, ContextState, SampleFormatSpec, StreamState};

/// How a state-change notification is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    /// Setup in progress: wake waiters on `Ready` or on leaving the good set
    Transient,
    /// Setup done: a `Failed` state invalidates the device; always wake
    Persistent,
}

/// Registered notification handlers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscriptions {
    pub context: Option<Watch>,
    pub stream: Option<(StreamId, Watch)>,
    /// PlaybackBridge runs on write-ready notifications
    pub write: bool,
    /// Scheduling follows server-side buffer resizes
    pub buffer_attr: bool,
    /// Endpoint name follows stream moves
    pub moved: bool,
}

/// Bridge-side state of one opened device
pub struct DeviceState {
    /// Display name, used for logs and the disconnect notification
    pub name: String,
    /// Server-side endpoint (`None` = server default)
    pub endpoint: Option<String>,
    pub params: DeviceParams,
    pub frame_size: usize,
    pub spec: Option<SampleFormatSpec>,
    pub attr: BufferAttributes,
    /// The active stream, if any
    pub stream: Option<StreamId>,
    /// Capture leftovers
    pub ring: Option<RingBuffer>,
    pub mixer: Option<Box<dyn Mixer>>,
    pub monitor: DisconnectMonitor,
    pub watch: Subscriptions,
    /// Results of the last endpoint query
    pub endpoints: Vec<EndpointInfo>,
}

impl DeviceState {
    pub fn new(name: impl Into<String>, params: DeviceParams, monitor: DisconnectMonitor) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            frame_size: params.frame_size(),
            params,
            spec: None,
            attr: BufferAttributes::server_choice(),
            stream: None,
            ring: None,
            mixer: None,
            monitor,
            watch: Subscriptions::default(),
            endpoints: Vec::new(),
        }
    }
}

/// Server client plus device state, guarded as one unit
pub struct Session<S> {
    pub server: S,
    pub device: DeviceState,
}

impl<S: AudioServer> Session<S> {
    pub fn new(server: S, device: DeviceState) -> Self {
        Self { server, device }
    }

    /// Handle one server notification on the mainloop thread
    ///
    /// Returns true when blocked host threads should be woken.
    pub fn dispatch(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::ContextStateChanged => self.on_context_state(),
            ServerEvent::StreamStateChanged(stream) => self.on_stream_state(stream),
            ServerEvent::WriteReady { stream, bytes } => {
                if self.device.watch.write && self.device.stream == Some(stream) {
                    self.on_write_ready(stream, bytes);
                }
                false
            }
            ServerEvent::BufferAttrChanged(stream) => {
                if self.device.watch.buffer_attr && self.device.stream == Some(stream) {
                    negotiate::apply_server_attributes(&self.server, &mut self.device, stream);
                }
                false
            }
            ServerEvent::Moved(stream) => {
                if self.device.watch.moved && self.device.stream == Some(stream) {
                    let endpoint = self.server.stream_device_name(stream);
                    log::info!(
                        "Stream for '{}' moved to {:?}",
                        self.device.name,
                        endpoint
                    );
                    self.device.endpoint = endpoint;
                }
                false
            }
            ServerEvent::OperationFinished { op, success } => {
                if !success {
                    log::debug!("Server operation {:?} reported failure", op);
                }
                true
            }
            ServerEvent::Endpoint { info, .. } => {
                self.device.endpoints.push(info);
                false
            }
        }
    }

    fn on_context_state(&mut self) -> bool {
        let state = self.server.context_state();
        match self.device.watch.context {
            Some(Watch::Transient) => state == ContextState::Ready || !state.is_good(),
            Some(Watch::Persistent) => {
                if state == ContextState::Failed {
                    log::error!("Received context failure for '{}'", self.device.name);
                    self.device.monitor.trip(&self.device.name);
                }
                true
            }
            None => false,
        }
    }

    fn on_stream_state(&mut self, stream: StreamId) -> bool {
        let state = self.server.stream_state(stream);
        match self.device.watch.stream {
            Some((watched, Watch::Transient)) if watched == stream => {
                state.is_operational() || !state.is_good()
            }
            Some((watched, Watch::Persistent)) if watched == stream => {
                if state == StreamState::Failed {
                    log::error!("Received stream failure for '{}'", self.device.name);
                    self.device.monitor.trip(&self.device.name);
                }
                true
            }
            _ => false,
        }
    }

    /// Fill `bytes` of playback data from the mixer (silence without one)
    pub(crate) fn on_write_ready(&mut self, stream: StreamId, bytes: usize) {
        let frame_size = self.device.frame_size;
        match self.device.mixer.as_deref_mut() {
            Some(mixer) => {
                playback::on_write_ready(&mut self.server, stream, mixer, frame_size, bytes)
            }
            None => {
                let mut silence = crate::host::Silence::new(frame_size);
                playback::on_write_ready(&mut self.server, stream, &mut silence, frame_size, bytes)
            }
        }
    }

    /// Frames available to capture: ring fill plus server-queued bytes
    pub fn available_frames(&self) -> usize {
        match (self.device.stream, self.device.ring.as_ref()) {
            (Some(stream), Some(ring)) => {
                capture::available_frames(&self.server, stream, ring)
            }
            _ => 0,
        }
    }
}
