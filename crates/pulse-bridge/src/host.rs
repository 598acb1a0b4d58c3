//! Host-side collaborators
//!
//! What the bridge needs from the audio middleware above it: the device's
//! scheduling parameters, a synchronous mixer to pull playback frames from,
//! and a side channel for asynchronous disconnect notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::HostFormat;

/// Default host sample rate
pub const DEFAULT_FREQUENCY: u32 = 44100;

/// Default host update (period) size in frames
pub const DEFAULT_UPDATE_SIZE: u32 = 1024;

/// Default number of host updates per buffer
pub const DEFAULT_NUM_UPDATES: u32 = 4;

/// Host device parameters
///
/// Reset may rewrite `frequency`, `update_size` and `num_updates` (and
/// `format`, when unpinned) to what the server actually granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParams {
    pub frequency: u32,
    pub format: HostFormat,
    /// Frames per mixer update
    pub update_size: u32,
    /// Updates per buffer
    pub num_updates: u32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            format: HostFormat::default(),
            update_size: DEFAULT_UPDATE_SIZE,
            num_updates: DEFAULT_NUM_UPDATES,
        }
    }
}

impl DeviceParams {
    pub fn frame_size(&self) -> usize {
        self.format.frame_size()
    }

    /// Total buffered frames the host asks for
    pub fn buffer_frames(&self) -> u32 {
        self.update_size.saturating_mul(self.num_updates)
    }
}

/// Synchronous source of playback audio
///
/// Runs on the server's callback thread: `mix` must fill exactly `frames`
/// frames into the front of `out` and must never block.
pub trait Mixer: Send {
    fn mix(&mut self, out: &mut [u8], frames: usize);
}

impl<F> Mixer for F
where
    F: FnMut(&mut [u8], usize) + Send,
{
    fn mix(&mut self, out: &mut [u8], frames: usize) {
        self(out, frames)
    }
}

/// Mixer that produces silence
#[derive(Debug, Default, Clone, Copy)]
pub struct Silence {
    frame_size: usize,
}

impl Silence {
    pub fn new(frame_size: usize) -> Self {
        Self { frame_size }
    }
}

impl Mixer for Silence {
    fn mix(&mut self, out: &mut [u8], frames: usize) {
        let bytes = (frames * self.frame_size).min(out.len());
        out[..bytes].fill(0);
    }
}

/// Host notification for an invalidated device (receives the display name)
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Device-level "disconnected" flag
///
/// Tripping is idempotent: the flag is set and the host callback fires on the
/// first trip only, no matter how many failure notifications arrive.
#[derive(Clone, Default)]
pub struct DisconnectMonitor {
    flag: Arc<AtomicBool>,
    callback: Option<DisconnectCallback>,
}

impl DisconnectMonitor {
    pub fn new(callback: Option<DisconnectCallback>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Mark the device disconnected; returns true on the first trip
    pub fn trip(&self, device_name: &str) -> bool {
        if self.flag.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::warn!("Audio device '{}' disconnected", device_name);
        if let Some(callback) = &self.callback {
            callback(device_name);
        }
        true
    }
}

impl std::fmt::Debug for DisconnectMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisconnectMonitor")
            .field("disconnected", &self.is_disconnected())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_trip_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let monitor = DisconnectMonitor::new(Some(Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(monitor.trip("dev"));
        assert!(!monitor.trip("dev"));
        assert!(monitor.is_disconnected());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_flag() {
        let monitor = DisconnectMonitor::new(None);
        let other = monitor.clone();
        other.trip("dev");
        assert!(monitor.is_disconnected());
    }

    #[test]
    fn test_closure_mixer() {
        let mut mixer = |out: &mut [u8], frames: usize| out[..frames].fill(7);
        let mut buf = [0u8; 4];
        Mixer::mix(&mut mixer, &mut buf, 2);
        assert_eq!(buf, [7, 7, 0, 0]);
    }

    #[test]
    fn test_silence_fills_requested_frames_only() {
        let mut buf = [9u8; 8];
        Silence::new(2).mix(&mut buf, 3);
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 9, 9]);
    }
}
