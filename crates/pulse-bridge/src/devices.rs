//! Device name lists
//!
//! Each probe builds a fresh [`DeviceList`] owned by the caller. The first
//! entry always stands for the server default and carries no endpoint name.

use crate::connection;
use crate::error::{BackendError, BackendResult};
use crate::mainloop::LoopGuard;
use crate::server::{AudioServer, EndpointInfo, OperationState};
use crate::types::Direction;

/// Display name of the default playback entry
pub const DEFAULT_PLAYBACK_NAME: &str = "PulseAudio on default";

/// Display name of the default capture entry
pub const DEFAULT_CAPTURE_NAME: &str = "PulseAudio Capture";

/// Host-visible device name and the server endpoint behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNameEntry {
    pub display_name: String,
    /// `None` selects the server default
    pub endpoint: Option<String>,
}

/// Ordered device names for one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceList {
    direction: Direction,
    entries: Vec<DeviceNameEntry>,
}

impl DeviceList {
    /// A list holding only the default entry
    pub fn new(direction: Direction) -> Self {
        let display_name = match direction {
            Direction::Playback => DEFAULT_PLAYBACK_NAME,
            Direction::Capture => DEFAULT_CAPTURE_NAME,
        };
        Self {
            direction,
            entries: vec![DeviceNameEntry {
                display_name: display_name.to_string(),
                endpoint: None,
            }],
        }
    }

    /// Build a list from endpoint query results
    pub fn from_endpoints<'a>(
        direction: Direction,
        endpoints: impl IntoIterator<Item = &'a EndpointInfo>,
    ) -> Self {
        let mut list = Self::new(direction);
        for info in endpoints {
            list.entries.push(DeviceNameEntry {
                display_name: format!("PulseAudio on {}", info.description),
                endpoint: Some(info.name.clone()),
            });
        }
        list
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn entries(&self) -> &[DeviceNameEntry] {
        &self.entries
    }

    pub fn default_entry(&self) -> &DeviceNameEntry {
        &self.entries[0]
    }

    /// Resolve a display name; `None` picks the default entry
    pub fn find(&self, name: Option<&str>) -> BackendResult<&DeviceNameEntry> {
        match name {
            None => Ok(self.default_entry()),
            Some(name) => self
                .entries
                .iter()
                .find(|entry| entry.display_name == name)
                .ok_or_else(|| BackendError::DeviceNotFound(name.to_string())),
        }
    }

    pub fn display_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.display_name.as_str())
    }
}

/// List the server's sinks or sources over a connected context
///
/// A query that does not complete is an error, never a default-only list.
pub fn probe_devices<S: AudioServer>(
    guard: &mut LoopGuard<'_, S>,
    direction: Direction,
) -> BackendResult<DeviceList> {
    guard.device.endpoints.clear();
    let op = guard.server.query_endpoints(direction, None).map_err(|code| {
        BackendError::Stream(format!("endpoint query failed: {}", guard.server.strerror(code)))
    })?;
    let state = connection::wait_operation(guard, op);
    let endpoints = std::mem::take(&mut guard.device.endpoints);
    if state != OperationState::Done {
        log::error!("{:?} endpoint query ended {:?}", direction, state);
        return Err(BackendError::Stream(format!(
            "endpoint query did not complete ({:?})",
            state
        )));
    }

    let list = DeviceList::from_endpoints(direction, &endpoints);
    log::debug!("Probed {} {:?} devices", list.entries().len(), direction);
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::ChannelMap;

    fn endpoint(name: &str, description: &str) -> EndpointInfo {
        EndpointInfo {
            name: name.to_string(),
            description: description.to_string(),
            channel_map: ChannelMap::wave_ex(2).unwrap(),
        }
    }

    #[test]
    fn test_default_entries() {
        let playback = DeviceList::new(Direction::Playback);
        assert_eq!(playback.default_entry().display_name, "PulseAudio on default");
        assert_eq!(playback.default_entry().endpoint, None);

        let capture = DeviceList::new(Direction::Capture);
        assert_eq!(capture.default_entry().display_name, "PulseAudio Capture");
    }

    #[test]
    fn test_from_endpoints_keeps_order() {
        let infos = vec![endpoint("alsa.hdmi", "HDMI Output"), endpoint("alsa.analog", "Speakers")];
        let list = DeviceList::from_endpoints(Direction::Playback, &infos);

        let names: Vec<&str> = list.display_names().collect();
        assert_eq!(
            names,
            vec!["PulseAudio on default", "PulseAudio on HDMI Output", "PulseAudio on Speakers"]
        );
        assert_eq!(list.entries()[2].endpoint.as_deref(), Some("alsa.analog"));
    }

    #[test]
    fn test_find() {
        let infos = vec![endpoint("mic", "USB Mic")];
        let list = DeviceList::from_endpoints(Direction::Capture, &infos);

        assert_eq!(list.find(None).unwrap().endpoint, None);
        assert_eq!(
            list.find(Some("PulseAudio on USB Mic")).unwrap().endpoint.as_deref(),
            Some("mic")
        );
        assert_eq!(
            list.find(Some("nope")),
            Err(BackendError::DeviceNotFound("nope".to_string()))
        );
    }
}
