//! Backend error types

use thiserror::Error;

/// Errors that can occur during backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Server unreachable or handshake refused
    #[error("Connection to audio server failed: {message} (code {code})")]
    Connection { code: i32, message: String },

    /// Stream creation/connection failed, or the stream fell to `Failed`
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Unsupported sample encoding, channel count or channel map
    #[error("Unsupported format: {0}")]
    Format(String),

    /// Capture request exceeds buffered + pending data
    #[error("Insufficient capture data: requested {requested} frames, {available} available")]
    InsufficientData { requested: usize, available: usize },

    /// Caller's capture buffer cannot hold the requested frames
    #[error("Capture buffer too small: {needed} bytes needed, {provided} provided")]
    BufferTooSmall { needed: usize, provided: usize },

    /// The device was invalidated by an asynchronous failure
    #[error("Audio device disconnected")]
    Disconnected,

    /// Display name not present in the device list
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// No device (or no stream) is open
    #[error("Audio device is not open")]
    NotOpen,

    /// The mainloop thread could not be started
    #[error("Failed to start mainloop thread: {0}")]
    Thread(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
