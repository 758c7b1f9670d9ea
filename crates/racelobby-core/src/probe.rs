// ── Single-server probing ──
//
// The per-entry remote call the liveness scheduler and LAN source make.
// `HttpProber` asks the server's own `INFO` endpoint and times the
// round trip.

use std::time::Duration;

use async_trait::async_trait;
use racelobby_api::LobbyClient;
use tokio::time::Instant;

use crate::convert;
use crate::error::CoreError;
use crate::model::{ServerAddress, ServerInfo};

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub info: ServerInfo,
    pub ping: Duration,
}

/// Fetch one server's current state by address.
#[async_trait]
pub trait ServerProber: Send + Sync {
    async fn probe(&self, address: &ServerAddress) -> Result<ProbeResult, CoreError>;
}

/// Decides whether a probed server needs content the player does not have.
pub trait ContentCheck: Send + Sync {
    fn is_missing(&self, info: &ServerInfo) -> bool;
}

impl<F> ContentCheck for F
where
    F: Fn(&ServerInfo) -> bool + Send + Sync,
{
    fn is_missing(&self, info: &ServerInfo) -> bool {
        self(info)
    }
}

/// Probes through the server's HTTP `INFO` endpoint.
pub struct HttpProber {
    client: LobbyClient,
    fix_names: bool,
}

impl HttpProber {
    pub fn new(client: LobbyClient, fix_names: bool) -> Self {
        Self { client, fix_names }
    }
}

#[async_trait]
impl ServerProber for HttpProber {
    async fn probe(&self, address: &ServerAddress) -> Result<ProbeResult, CoreError> {
        let started = Instant::now();
        let raw = self
            .client
            .server_info(&address.host, address.http_port)
            .await?;
        let ping = started.elapsed();
        Ok(ProbeResult {
            info: convert::info_from_raw(&raw, self.fix_names),
            ping,
        })
    }
}
