//! Pulse Bridge - blocking device backend over a callback-driven audio server
//!
//! Bridges an asynchronous audio-server client (its own callback thread
//! delivering state, write-ready and buffer-resize notifications) to a
//! synchronous device API: open/reset/start/stop, push-style playback and
//! pull-style capture.
//!
//! - [`backend::PulseBackend`]: the host-facing device
//! - [`mainloop`]: callback thread plus the single lock both sides share
//! - [`connection`], [`negotiate`], [`playback`], [`capture`]: the bridge
//! - [`server`]: the client-library seam, with an in-process [`server::sim`]

pub mod backend;
pub mod capture;
pub mod channel_map;
pub mod config;
pub mod connection;
pub mod devices;
pub mod error;
pub mod host;
pub mod mainloop;
pub mod negotiate;
pub mod playback;
pub mod ring;
pub mod server;
pub mod session;
pub mod types;

pub use backend::PulseBackend;
pub use config::{BackendConfig, ConfigLookup};
pub use devices::{DeviceList, DeviceNameEntry};
pub use error::{BackendError, BackendResult};
pub use host::{DeviceParams, Mixer};
pub use types::*;
