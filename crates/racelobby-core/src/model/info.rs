// ── Liveness payload ──
//
// Everything a probe or a list provider tells us about a server beyond
// its identity. Orthogonal to the aggregation logic; carried verbatim.

use serde::{Deserialize, Serialize};

/// Snapshot of a server's advertised state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub track: String,
    pub cars: Vec<String>,
    /// Connected drivers.
    pub drivers: u32,
    pub capacity: u32,
    pub password_required: bool,
    /// ISO country code.
    pub country: Option<String>,
    pub game_port: u16,
    pub session: Option<SessionInfo>,
    pub extended: Option<ExtendedInfo>,
}

impl ServerInfo {
    pub fn has_free_slots(&self) -> bool {
        self.drivers < self.capacity
    }
}

/// The session a server is currently running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub kind: SessionKind,
    /// Seconds left in the current session; negative once overtime.
    pub time_left_secs: i64,
    /// Configured duration of each session in the rotation.
    pub durations: Vec<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[non_exhaustive]
pub enum SessionKind {
    Booking,
    Practice,
    Qualifying,
    Race,
    #[default]
    Unknown,
}

impl From<u8> for SessionKind {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Booking,
            1 => Self::Practice,
            2 => Self::Qualifying,
            3 => Self::Race,
            _ => Self::Unknown,
        }
    }
}

/// Metadata published by servers running a race-management extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedInfo {
    pub weather: Option<String>,
    pub ambient_temperature: Option<f32>,
    pub road_temperature: Option<f32>,
    pub grip: Option<f32>,
}
