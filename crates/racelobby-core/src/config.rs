// ── Runtime tuning ──
//
// Concurrency caps, timeouts and policy flags for the aggregator.
// The CLI (via racelobby-config) builds an `OnlineConfig` and hands it
// in; core never reads settings files.

use std::time::Duration;

/// Tunables for sessions, packs, file lists and the liveness scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineConfig {
    /// Concurrent probes in the default probing mode.
    pub ping_concurrency: usize,
    /// Concurrent probes when `single_socket` is on.
    pub ping_concurrency_single_socket: usize,
    /// Probe through one shared socket, which tolerates a higher fan-out.
    pub single_socket: bool,
    /// Per-probe timeout.
    pub ping_timeout: Duration,
    /// Hold pinging while the local client is mid-session.
    pub pause_during_race: bool,
    /// Strip sort-bait decoration from server names.
    pub fix_names: bool,
    /// Sessions a pack loads at once.
    pub pack_concurrency: usize,
    /// Grace period between the last customer leaving and the load being cancelled.
    pub cancel_debounce: Duration,
    /// Passes per liveness cycle.
    pub ping_max_passes: u32,
    /// Re-check interval while pinging is paused.
    pub pause_poll_interval: Duration,
    /// Evicted file sources kept around for resurrection.
    pub missing_sources_cap: usize,
    /// Extension of file-backed lists, without the dot.
    pub list_extension: String,
    /// Quiet period after a file-system event before rescanning lists.
    pub list_watch_debounce: Duration,
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            ping_concurrency: 30,
            ping_concurrency_single_socket: 100,
            single_socket: false,
            ping_timeout: Duration::from_secs(2),
            pause_during_race: true,
            fix_names: true,
            pack_concurrency: 4,
            cancel_debounce: Duration::from_millis(300),
            ping_max_passes: 10,
            pause_poll_interval: Duration::from_secs(1),
            missing_sources_cap: 32,
            list_extension: "txt".into(),
            list_watch_debounce: Duration::from_millis(250),
        }
    }
}

impl OnlineConfig {
    /// Effective probe concurrency for the configured mode.
    pub fn ping_limit(&self) -> usize {
        let limit = if self.single_socket {
            self.ping_concurrency_single_socket
        } else {
            self.ping_concurrency
        };
        limit.max(1)
    }
}
