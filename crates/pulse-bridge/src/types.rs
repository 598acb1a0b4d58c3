//! Common types for the bridge
//!
//! Sample formats on both sides of the bridge (host and server), buffer
//! attributes exchanged with the server, and the context/stream state
//! machines reported by the server's client library.

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Highest sample rate the server accepts
pub const RATE_MAX: u32 = 48000 * 8;

/// Highest channel count the server accepts
pub const CHANNELS_MAX: u8 = 32;

/// Sample encoding shared by host and server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit, native endian
    S16,
    /// 32-bit float, native endian
    F32,
}

impl SampleEncoding {
    /// Bytes per single-channel sample
    pub fn bytes(&self) -> usize {
        match self {
            SampleEncoding::U8 => 1,
            SampleEncoding::S16 => 2,
            SampleEncoding::F32 => 4,
        }
    }

    /// Map a host sample width to the server encoding
    pub fn from_bytes(bytes: usize) -> BackendResult<Self> {
        match bytes {
            1 => Ok(SampleEncoding::U8),
            2 => Ok(SampleEncoding::S16),
            4 => Ok(SampleEncoding::F32),
            other => Err(BackendError::Format(format!(
                "unsupported sample width: {} bytes",
                other
            ))),
        }
    }
}

/// Host-side speaker layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Quad,
    Surround51,
    Surround61,
    Surround71,
}

impl ChannelLayout {
    pub fn channels(&self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Quad => 4,
            ChannelLayout::Surround51 => 6,
            ChannelLayout::Surround61 => 7,
            ChannelLayout::Surround71 => 8,
        }
    }
}

/// Host output format: a speaker layout plus a sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostFormat {
    pub layout: ChannelLayout,
    pub encoding: SampleEncoding,
}

impl HostFormat {
    pub const fn new(layout: ChannelLayout, encoding: SampleEncoding) -> Self {
        Self { layout, encoding }
    }

    pub fn channels(&self) -> u8 {
        self.layout.channels()
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.layout.channels() as usize * self.encoding.bytes()
    }
}

impl Default for HostFormat {
    fn default() -> Self {
        Self::new(ChannelLayout::Stereo, SampleEncoding::S16)
    }
}

impl std::fmt::Display for HostFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}", self.layout, self.encoding)
    }
}

/// Sample specification submitted to the server at stream creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormatSpec {
    pub rate: u32,
    pub channels: u8,
    pub encoding: SampleEncoding,
}

impl SampleFormatSpec {
    /// Derive the server spec from the host format and rate
    pub fn from_host(format: HostFormat, rate: u32) -> Self {
        Self {
            rate,
            channels: format.channels(),
            encoding: format.encoding,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.encoding.bytes()
    }

    /// Same checks the server's format validator applies
    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.rate <= RATE_MAX && self.channels > 0 && self.channels <= CHANNELS_MAX
    }

    pub fn validate(&self) -> BackendResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(BackendError::Format(format!(
                "invalid sample spec: {} Hz, {} channels, {:?}",
                self.rate, self.channels, self.encoding
            )))
        }
    }
}

/// Buffer attributes in bytes
///
/// [`BufferAttributes::AUTO`] (all bits set, `-1` on the wire) lets the server
/// choose a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttributes {
    pub maxlength: u32,
    pub tlength: u32,
    pub prebuf: u32,
    pub minreq: u32,
    pub fragsize: u32,
}

impl BufferAttributes {
    pub const AUTO: u32 = u32::MAX;

    /// Every field left to the server
    pub const fn server_choice() -> Self {
        Self {
            maxlength: Self::AUTO,
            tlength: Self::AUTO,
            prebuf: Self::AUTO,
            minreq: Self::AUTO,
            fragsize: Self::AUTO,
        }
    }
}

impl Default for BufferAttributes {
    fn default() -> Self {
        Self::server_choice()
    }
}

/// Connection (context) state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

impl ContextState {
    /// States from which `Ready` can still be reached
    pub fn is_good(&self) -> bool {
        matches!(
            self,
            ContextState::Connecting
                | ContextState::Authorizing
                | ContextState::SettingName
                | ContextState::Ready
        )
    }
}

/// Stream state
///
/// `Created → Connecting → Ready ⇄ Suspended`, and any of the connected states
/// may fall to `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Connecting,
    Ready,
    Suspended,
    Failed,
    Terminated,
}

impl StreamState {
    pub fn is_good(&self) -> bool {
        matches!(
            self,
            StreamState::Created
                | StreamState::Connecting
                | StreamState::Ready
                | StreamState::Suspended
        )
    }

    /// States in which audio may flow
    pub fn is_operational(&self) -> bool {
        matches!(self, StreamState::Ready | StreamState::Suspended)
    }
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Playback,
    Capture,
}

/// Flags for context connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFlags {
    /// Never start a server process if none is running
    pub no_autospawn: bool,
}

/// Flags for stream connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFlags {
    /// Let the server pick a convenient sample rate
    pub fix_rate: bool,
    /// Connect paused
    pub start_corked: bool,
    /// Let the server adjust latency to the requested fragment size
    pub adjust_latency: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        let format = HostFormat::new(ChannelLayout::Surround51, SampleEncoding::F32);
        assert_eq!(format.frame_size(), 24);
        assert_eq!(HostFormat::default().frame_size(), 4);
    }

    #[test]
    fn test_encoding_from_bytes() {
        assert_eq!(SampleEncoding::from_bytes(2).unwrap(), SampleEncoding::S16);
        assert!(matches!(
            SampleEncoding::from_bytes(3),
            Err(BackendError::Format(_))
        ));
    }

    #[test]
    fn test_spec_validation() {
        let spec = SampleFormatSpec::from_host(HostFormat::default(), 44100);
        assert!(spec.validate().is_ok());

        let bad = SampleFormatSpec { rate: 0, ..spec };
        assert!(matches!(bad.validate(), Err(BackendError::Format(_))));

        let too_fast = SampleFormatSpec { rate: RATE_MAX + 1, ..spec };
        assert!(!too_fast.is_valid());
    }

    #[test]
    fn test_good_states() {
        assert!(ContextState::Authorizing.is_good());
        assert!(!ContextState::Failed.is_good());
        assert!(!ContextState::Unconnected.is_good());

        assert!(StreamState::Suspended.is_good());
        assert!(StreamState::Suspended.is_operational());
        assert!(!StreamState::Connecting.is_operational());
        assert!(!StreamState::Terminated.is_good());
    }
}
