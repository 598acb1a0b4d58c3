//! Channel maps and the sink-layout lookup table
//!
//! The server describes each sink's speaker arrangement as an ordered list of
//! channel positions. [`layout_for_map`] walks [`LAYOUT_TABLE`] in declared
//! order and returns the first host layout whose map matches exactly, or, when
//! superset matching is enabled, the first layout whose positions are all
//! present in the sink's map.

use crate::types::ChannelLayout;

/// Speaker position of a single channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPosition {
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    RearLeft,
    RearRight,
    RearCenter,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    SideLeft,
    SideRight,
}

impl ChannelPosition {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelPosition::Mono => "mono",
            ChannelPosition::FrontLeft => "front-left",
            ChannelPosition::FrontRight => "front-right",
            ChannelPosition::FrontCenter => "front-center",
            ChannelPosition::Lfe => "lfe",
            ChannelPosition::RearLeft => "rear-left",
            ChannelPosition::RearRight => "rear-right",
            ChannelPosition::RearCenter => "rear-center",
            ChannelPosition::FrontLeftOfCenter => "front-left-of-center",
            ChannelPosition::FrontRightOfCenter => "front-right-of-center",
            ChannelPosition::SideLeft => "side-left",
            ChannelPosition::SideRight => "side-right",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "mono" => ChannelPosition::Mono,
            "front-left" | "left" => ChannelPosition::FrontLeft,
            "front-right" | "right" => ChannelPosition::FrontRight,
            "front-center" | "center" => ChannelPosition::FrontCenter,
            "lfe" | "subwoofer" => ChannelPosition::Lfe,
            "rear-left" => ChannelPosition::RearLeft,
            "rear-right" => ChannelPosition::RearRight,
            "rear-center" => ChannelPosition::RearCenter,
            "front-left-of-center" => ChannelPosition::FrontLeftOfCenter,
            "front-right-of-center" => ChannelPosition::FrontRightOfCenter,
            "side-left" => ChannelPosition::SideLeft,
            "side-right" => ChannelPosition::SideRight,
            _ => return None,
        })
    }
}

/// WAVEFORMATEXTENSIBLE speaker order, used for automatic maps
const WAVEEX_ORDER: [ChannelPosition; 11] = [
    ChannelPosition::FrontLeft,
    ChannelPosition::FrontRight,
    ChannelPosition::FrontCenter,
    ChannelPosition::Lfe,
    ChannelPosition::RearLeft,
    ChannelPosition::RearRight,
    ChannelPosition::FrontLeftOfCenter,
    ChannelPosition::FrontRightOfCenter,
    ChannelPosition::RearCenter,
    ChannelPosition::SideLeft,
    ChannelPosition::SideRight,
];

/// Ordered list of channel positions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelMap {
    positions: Vec<ChannelPosition>,
}

impl ChannelMap {
    pub fn new(positions: Vec<ChannelPosition>) -> Self {
        Self { positions }
    }

    /// Parse a comma-separated list of position names
    pub fn parse(s: &str) -> Option<Self> {
        let positions = s
            .split(',')
            .map(|name| ChannelPosition::from_name(name.trim()))
            .collect::<Option<Vec<_>>>()?;
        if positions.is_empty() {
            return None;
        }
        Some(Self { positions })
    }

    /// Automatic WAVEEX map for `channels` channels
    ///
    /// A single channel maps to `mono`. Returns `None` for counts the
    /// WAVEEX order can't describe.
    pub fn wave_ex(channels: u8) -> Option<Self> {
        match channels {
            0 => None,
            1 => Some(Self::new(vec![ChannelPosition::Mono])),
            n if (n as usize) <= WAVEEX_ORDER.len() => {
                Some(Self::new(WAVEEX_ORDER[..n as usize].to_vec()))
            }
            _ => None,
        }
    }

    pub fn channels(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[ChannelPosition] {
        &self.positions
    }

    /// Every position of `other` is present in `self`
    pub fn is_superset_of(&self, other: &ChannelMap) -> bool {
        other.positions.iter().all(|p| self.positions.contains(p))
    }
}

impl std::fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.positions.iter().map(|p| p.name()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Sink channel sets and the host layout each selects, in match order
pub const LAYOUT_TABLE: [(&str, ChannelLayout); 6] = [
    (
        "front-left,front-right,front-center,lfe,rear-left,rear-right,side-left,side-right",
        ChannelLayout::Surround71,
    ),
    (
        "front-left,front-right,front-center,lfe,rear-center,side-left,side-right",
        ChannelLayout::Surround61,
    ),
    (
        "front-left,front-right,front-center,lfe,rear-left,rear-right",
        ChannelLayout::Surround51,
    ),
    ("front-left,front-right,rear-left,rear-right", ChannelLayout::Quad),
    ("front-left,front-right", ChannelLayout::Stereo),
    ("mono", ChannelLayout::Mono),
];

/// Pick the host layout for a sink's channel map
///
/// `allow_superset` must only be set when the server advertises superset
/// matching.
pub fn layout_for_map(map: &ChannelMap, allow_superset: bool) -> Option<ChannelLayout> {
    LAYOUT_TABLE.iter().find_map(|(names, layout)| {
        let candidate = ChannelMap::parse(names)?;
        if *map == candidate || (allow_superset && map.is_superset_of(&candidate)) {
            Some(*layout)
        } else {
            None
        }
    })
}
