// ── Master lobby list source ──

use std::sync::Arc;

use async_trait::async_trait;
use racelobby_api::{LobbyClient, RawServer};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BatchSource, LoadProgress, ProgressSink, SourceIdentity};
use crate::convert;
use crate::error::CoreError;
use crate::model::ServerRecord;

pub const LOBBY_KEY: &str = "kunos";

/// Fetches the full lobby list in one request.
#[async_trait]
pub trait LobbyApi: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<RawServer>, racelobby_api::Error>;
}

#[async_trait]
impl LobbyApi for LobbyClient {
    async fn list_servers(&self) -> Result<Vec<RawServer>, racelobby_api::Error> {
        LobbyClient::list_servers(self).await
    }
}

/// Batch source over the public lobby list. Records arrive fully loaded.
pub struct LobbySource {
    api: Arc<dyn LobbyApi>,
    fix_names: bool,
}

impl LobbySource {
    pub fn new(api: Arc<dyn LobbyApi>, fix_names: bool) -> Self {
        Self { api, fix_names }
    }
}

impl SourceIdentity for LobbySource {
    fn key(&self) -> &str {
        LOBBY_KEY
    }

    fn display_name(&self) -> String {
        "Lobby".into()
    }
}

#[async_trait]
impl BatchSource for LobbySource {
    async fn fetch(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ServerRecord>>, CoreError> {
        progress.progress(LoadProgress::message("Downloading lobby list"));
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(None),
            listed = self.api.list_servers() => listed?,
        };

        let total = raw.len();
        let records: Vec<ServerRecord> = raw
            .iter()
            .filter_map(|r| convert::record_from_raw(r, self.fix_names))
            .collect();
        if records.len() < total {
            debug!(skipped = total - records.len(), "lobby entries without a usable address");
        }
        progress.progress(LoadProgress::count(records.len(), Some(total)));
        Ok(Some(records))
    }
}
