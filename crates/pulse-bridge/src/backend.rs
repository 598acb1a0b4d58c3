//! Host-facing device backend
//!
//! [`PulseBackend`] is one host device (playback or capture) on top of the
//! audio server. Every call takes the mainloop lock for its whole duration
//! and returns only when the server has reached the awaited state, so the
//! host sees a plain blocking API.
//!
//! ```text
//!  open ─► probe list ─► connect context ─► probe stream (endpoint, suspend)
//!  reset_playback ─► sink format ─► stream ─► rate/attr reconcile ─► prefill
//!  open_capture ─► connect context ─► corked record stream + ring
//!  start/stop_capture ─► cork and wait
//!  close ─► stream, then context, then mainloop thread
//! ```
//!
//! Failures after setup arrive asynchronously: the device is flagged
//! disconnected (once) and the host callback fires. Later calls report
//! [`BackendError::Disconnected`].

use crate::capture;
use crate::channel_map::ChannelMap;
use crate::config::BackendConfig;
use crate::connection;
use crate::devices::{self, DeviceList, DeviceNameEntry};
use crate::error::{BackendError, BackendResult};
use crate::host::{DeviceParams, DisconnectCallback, DisconnectMonitor, Mixer};
use crate::mainloop::{LoopGuard, ThreadedMainloop};
use crate::negotiate;
use crate::server::{AudioServer, ServerConnector};
use crate::session::{DeviceState, Session, Watch};
use crate::types::{ContextFlags, Direction, SampleEncoding, SampleFormatSpec, StreamFlags};

/// Format of the stream used to probe a sink during open
const PROBE_SPEC: SampleFormatSpec = SampleFormatSpec {
    rate: 44100,
    channels: 2,
    encoding: SampleEncoding::S16,
};

struct OpenDevice<S: AudioServer> {
    mainloop: ThreadedMainloop<S>,
    monitor: DisconnectMonitor,
    direction: Direction,
}

/// One host audio device backed by the server
pub struct PulseBackend<C: ServerConnector> {
    connector: C,
    config: BackendConfig,
    params: DeviceParams,
    mixer: Option<Box<dyn Mixer>>,
    on_disconnect: Option<DisconnectCallback>,
    playback_devices: Option<DeviceList>,
    capture_devices: Option<DeviceList>,
    device: Option<OpenDevice<C::Server>>,
}

impl<C: ServerConnector> PulseBackend<C> {
    pub fn new(connector: C, config: BackendConfig) -> Self {
        Self {
            connector,
            config,
            params: DeviceParams::default(),
            mixer: None,
            on_disconnect: None,
            playback_devices: None,
            capture_devices: None,
            device: None,
        }
    }

    /// Host parameters to request on open
    pub fn with_params(mut self, params: DeviceParams) -> Self {
        self.params = params;
        self
    }

    /// Mixer that feeds playback
    pub fn with_mixer(mut self, mixer: impl Mixer + 'static) -> Self {
        self.mixer = Some(Box::new(mixer));
        self
    }

    /// Host notification for asynchronous device loss
    pub fn on_disconnect(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(std::sync::Arc::new(callback));
        self
    }

    /// Replace the mixer, including on an open device
    pub fn set_mixer(&mut self, mixer: Box<dyn Mixer>) {
        match &self.device {
            Some(device) => device.mainloop.lock().device.mixer = Some(mixer),
            None => self.mixer = Some(mixer),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Current host parameters (rewritten by open and reset)
    pub fn params(&self) -> DeviceParams {
        match &self.device {
            Some(device) => device.mainloop.lock().device.params,
            None => self.params,
        }
    }

    /// Server endpoint of the open device (`None` = server default)
    pub fn endpoint(&self) -> Option<String> {
        self.device
            .as_ref()
            .and_then(|device| device.mainloop.lock().device.endpoint.clone())
    }

    pub fn is_disconnected(&self) -> bool {
        self.device
            .as_ref()
            .is_some_and(|device| device.monitor.is_disconnected())
    }

    /// Last probed device list for `direction`
    pub fn devices(&self, direction: Direction) -> Option<&DeviceList> {
        match direction {
            Direction::Playback => self.playback_devices.as_ref(),
            Direction::Capture => self.capture_devices.as_ref(),
        }
    }

    fn context_flags(&self) -> ContextFlags {
        ContextFlags {
            no_autospawn: !self.config.spawn_server,
        }
    }

    /// Create a server client, start its mainloop and connect the context
    fn connect_session(
        &self,
        name: &str,
        endpoint: Option<String>,
        monitor: DisconnectMonitor,
    ) -> BackendResult<ThreadedMainloop<C::Server>> {
        let server = self.connector.create(&self.config.resolved_client_name())?;
        let mut device = DeviceState::new(name, self.params, monitor);
        device.endpoint = endpoint;

        let mainloop = ThreadedMainloop::start(Session::new(server, device))?;
        {
            let mut guard = mainloop.lock();
            connection::connect(&mut guard, self.context_flags())?;
            guard.device.watch.context = Some(Watch::Persistent);
        }
        log::info!("Connected to audio server for '{}'", name);
        Ok(mainloop)
    }

    /// Rebuild the device list for `direction`
    pub fn probe(&mut self, direction: Direction) -> BackendResult<&DeviceList> {
        let mainloop = self.connect_session("probe", None, DisconnectMonitor::default())?;
        let list = {
            let mut guard = mainloop.lock();
            let list = devices::probe_devices(&mut guard, direction);
            connection::disconnect(&mut guard);
            list
        }?;
        drop(mainloop);

        let slot = match direction {
            Direction::Playback => &mut self.playback_devices,
            Direction::Capture => &mut self.capture_devices,
        };
        Ok(slot.insert(list))
    }

    fn resolve(&mut self, direction: Direction, name: Option<&str>) -> BackendResult<DeviceNameEntry> {
        if self.devices(direction).is_none() {
            if let Err(e) = self.probe(direction) {
                if name.is_some() {
                    return Err(e);
                }
                log::warn!("Device probe failed, using the default device: {}", e);
                return Ok(DeviceList::new(direction).default_entry().clone());
            }
        }
        match self.devices(direction) {
            Some(list) => list.find(name).cloned(),
            None => Err(BackendError::NotOpen),
        }
    }

    /// Open a playback device by display name (`None` = default)
    pub fn open(&mut self, name: Option<&str>) -> BackendResult<()> {
        self.close();
        let entry = self.resolve(Direction::Playback, name)?;
        let monitor = DisconnectMonitor::new(self.on_disconnect.clone());
        let mainloop = self.connect_session(&entry.display_name, entry.endpoint, monitor.clone())?;

        {
            let mut guard = mainloop.lock();
            if let Err(e) = probe_sink(&mut guard) {
                connection::disconnect(&mut guard);
                return Err(e);
            }
            if self.config.buffer_length > 0 {
                guard.device.params.update_size = self.config.buffer_length;
                guard.device.params.num_updates = 1;
            }
            guard.device.mixer = self.mixer.take();
        }

        self.device = Some(OpenDevice {
            mainloop,
            monitor,
            direction: Direction::Playback,
        });
        Ok(())
    }

    /// Disconnect everything and stop the mainloop thread
    pub fn close(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        {
            let mut guard = device.mainloop.lock();
            if self.mixer.is_none() {
                self.mixer = guard.device.mixer.take();
            }
            connection::disconnect(&mut guard);
        }
        device.mainloop.stop();
        log::info!("Closed {:?} device", device.direction);
    }

    fn open_device(&self, direction: Direction) -> BackendResult<&OpenDevice<C::Server>> {
        let device = self.device.as_ref().ok_or(BackendError::NotOpen)?;
        if device.direction != direction {
            return Err(BackendError::NotOpen);
        }
        if device.monitor.is_disconnected() {
            return Err(BackendError::Disconnected);
        }
        Ok(device)
    }

    /// (Re)create the playback stream and negotiate format, rate and buffering
    ///
    /// May change the host's rate, format and scheduling; read them back with
    /// [`PulseBackend::params`].
    pub fn reset_playback(&mut self) -> BackendResult<()> {
        let device = self.open_device(Direction::Playback)?;
        let mut guard = device.mainloop.lock();
        connection::detach_stream(&mut guard);
        negotiate::negotiate_playback(&mut guard, &self.config)
    }

    /// Disable the write handler and release the playback stream
    ///
    /// Does nothing unless a playback device is open.
    pub fn stop_playback(&mut self) {
        if let Some(device) = &self.device {
            if device.direction != Direction::Playback {
                return;
            }
            let mut guard = device.mainloop.lock();
            connection::detach_stream(&mut guard);
            log::debug!("Playback stopped on '{}'", guard.device.name);
        }
    }

    /// Open a capture device by display name (`None` = default)
    ///
    /// The stream starts paused; see [`PulseBackend::start_capture`].
    pub fn open_capture(&mut self, name: Option<&str>) -> BackendResult<()> {
        self.close();
        let entry = self.resolve(Direction::Capture, name)?;
        let monitor = DisconnectMonitor::new(self.on_disconnect.clone());
        let mainloop = self.connect_session(&entry.display_name, entry.endpoint, monitor.clone())?;

        {
            let mut guard = mainloop.lock();
            if let Err(e) = capture::open_capture_stream(&mut guard) {
                connection::disconnect(&mut guard);
                return Err(e);
            }
        }

        self.device = Some(OpenDevice {
            mainloop,
            monitor,
            direction: Direction::Capture,
        });
        Ok(())
    }

    pub fn close_capture(&mut self) {
        self.close();
    }

    pub fn start_capture(&mut self) -> BackendResult<()> {
        let device = self.open_device(Direction::Capture)?;
        let mut guard = device.mainloop.lock();
        capture::set_corked(&mut guard, false)
    }

    pub fn stop_capture(&mut self) -> BackendResult<()> {
        let device = self.open_device(Direction::Capture)?;
        let mut guard = device.mainloop.lock();
        capture::set_corked(&mut guard, true)
    }

    /// Fill the front of `out` with exactly `frames` captured frames
    pub fn capture_samples(&self, out: &mut [u8], frames: usize) -> BackendResult<()> {
        let device = self.open_device(Direction::Capture)?;
        let mut guard = device.mainloop.lock();
        let session = &mut *guard;
        let stream = session.device.stream.ok_or(BackendError::NotOpen)?;
        let ring = session.device.ring.as_mut().ok_or(BackendError::NotOpen)?;
        capture::capture_samples(&mut session.server, stream, ring, out, frames)
    }

    /// Frames a capture call could return right now
    pub fn available_samples(&self) -> usize {
        match &self.device {
            Some(device) if device.direction == Direction::Capture => {
                device.mainloop.lock().available_frames()
            }
            _ => 0,
        }
    }
}

impl<C: ServerConnector> Drop for PulseBackend<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect a short-lived stream to learn the sink's real name
///
/// Fails when the sink is suspended.
fn probe_sink<S: AudioServer>(guard: &mut LoopGuard<'_, S>) -> BackendResult<()> {
    let map = ChannelMap::wave_ex(PROBE_SPEC.channels)
        .ok_or_else(|| BackendError::Format("no stereo channel map".to_string()))?;
    let stream = connection::connect_stream(
        guard,
        "Playback Stream",
        Direction::Playback,
        &PROBE_SPEC,
        &map,
        None,
        StreamFlags::default(),
    )?;

    let suspended = guard.server.stream_is_suspended(stream);
    let endpoint = guard.server.stream_device_name(stream);
    connection::release_stream(guard, stream);

    if suspended {
        log::error!("Sink {:?} is suspended", endpoint);
        return Err(BackendError::Stream(format!(
            "sink {} is suspended",
            endpoint.as_deref().unwrap_or("default")
        )));
    }
    guard.device.endpoint = endpoint;
    Ok(())
}
