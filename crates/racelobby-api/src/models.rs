// Raw wire types shared by the lobby list and the per-server INFO endpoint.
//
// Both endpoints return the same object shape; the lobby list wraps it in
// a JSON array. Field names follow the wire format, not Rust conventions.

use serde::{Deserialize, Serialize};

/// One server as described by the lobby list or its own `INFO` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawServer {
    /// Public IP. Absent from `INFO` responses, where the caller already
    /// knows the address it queried.
    pub ip: Option<String>,
    /// Game (TCP/UDP) port.
    pub port: u16,
    /// HTTP port serving `INFO`.
    pub cport: u16,
    pub name: String,
    /// Connected drivers.
    pub clients: u32,
    #[serde(rename = "maxclients")]
    pub max_clients: u32,
    pub track: String,
    pub cars: Vec<String>,
    /// Password required to join.
    pub pass: bool,
    /// Index into `sessiontypes` of the running session.
    pub session: u32,
    #[serde(rename = "sessiontypes")]
    pub session_types: Vec<u8>,
    /// Session durations, seconds (laps for timed-out race sessions).
    pub durations: Vec<u64>,
    /// Seconds left in the current session.
    #[serde(rename = "timeleft")]
    pub time_left: i64,
    /// `[country name, ISO code]`.
    pub country: Vec<String>,
    /// Server runs a race-management extension exposing the fields below.
    pub extra: bool,
    pub weather: Option<String>,
    #[serde(rename = "ambientTemperature")]
    pub ambient_temperature: Option<f32>,
    #[serde(rename = "roadTemperature")]
    pub road_temperature: Option<f32>,
    pub grip: Option<f32>,
}

impl RawServer {
    /// Country ISO code, if present.
    pub fn country_code(&self) -> Option<&str> {
        self.country.get(1).map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_lobby_entry() {
        let json = r#"{
            "ip": "93.57.10.21", "port": 9600, "cport": 8081,
            "name": "Monza Sprint", "clients": 12, "maxclients": 24,
            "track": "monza", "cars": ["ks_ferrari_488_gt3"], "pass": false,
            "session": 2, "sessiontypes": [1, 2, 3], "durations": [600, 900, 12],
            "timeleft": 420, "country": ["Italy", "IT"], "extra": false
        }"#;
        let raw: RawServer = serde_json::from_str(json).unwrap();
        assert_eq!(raw.ip.as_deref(), Some("93.57.10.21"));
        assert_eq!(raw.cport, 8081);
        assert_eq!(raw.max_clients, 24);
        assert_eq!(raw.country_code(), Some("IT"));
        assert!(raw.weather.is_none());
    }

    #[test]
    fn tolerates_missing_fields() {
        let raw: RawServer = serde_json::from_str(r#"{"name": "Bare"}"#).unwrap();
        assert_eq!(raw.name, "Bare");
        assert!(raw.cars.is_empty());
        assert_eq!(raw.country_code(), None);
    }
}
