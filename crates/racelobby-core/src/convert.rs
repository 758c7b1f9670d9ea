// ── API-to-domain type conversions ──
//
// Bridges raw `racelobby_api` wire types into `racelobby_core::model`
// domain types. Optional name clean-up undoes the punctuation and
// whitespace tricks some hosts use to float to the top of sorted lists.

use racelobby_api::RawServer;

use crate::model::{ExtendedInfo, ServerAddress, ServerInfo, ServerRecord, SessionInfo, SessionKind};

// ── Helpers ────────────────────────────────────────────────────────

/// Strip leading sort-bait decoration and collapse internal whitespace.
///
/// Falls back to the trimmed original when nothing alphanumeric remains.
pub fn fix_name(name: &str) -> String {
    let start = name
        .char_indices()
        .find(|(_, c)| c.is_alphanumeric())
        .map_or(name.len(), |(i, _)| i);
    let cleaned = name[start..].split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        name.trim().to_owned()
    } else {
        cleaned
    }
}

fn session_from_raw(raw: &RawServer) -> Option<SessionInfo> {
    if raw.session_types.is_empty() {
        return None;
    }
    let kind = usize::try_from(raw.session)
        .ok()
        .and_then(|i| raw.session_types.get(i))
        .map_or(SessionKind::Unknown, |t| SessionKind::from(*t));
    Some(SessionInfo {
        kind,
        time_left_secs: raw.time_left,
        durations: raw.durations.clone(),
    })
}

// ── Conversions ─────────────────────────────────────────────────────

pub fn info_from_raw(raw: &RawServer, fix_names: bool) -> ServerInfo {
    let name = if fix_names {
        fix_name(&raw.name)
    } else {
        raw.name.clone()
    };
    let extended = raw.extra.then(|| ExtendedInfo {
        weather: raw.weather.clone(),
        ambient_temperature: raw.ambient_temperature,
        road_temperature: raw.road_temperature,
        grip: raw.grip,
    });
    ServerInfo {
        name,
        track: raw.track.clone(),
        cars: raw.cars.clone(),
        drivers: raw.clients,
        capacity: raw.max_clients,
        password_required: raw.pass,
        country: raw.country_code().map(str::to_owned),
        game_port: raw.port,
        session: session_from_raw(raw),
        extended,
    }
}

/// A complete record for a lobby list entry. `None` without a usable address.
pub fn record_from_raw(raw: &RawServer, fix_names: bool) -> Option<ServerRecord> {
    let host = raw.ip.as_deref().map(str::trim).filter(|h| !h.is_empty())?;
    if raw.cport == 0 {
        return None;
    }
    let address = ServerAddress::new(host.to_lowercase(), raw.cport);
    Some(ServerRecord::from_address(address).with_info(info_from_raw(raw, fix_names)))
}
