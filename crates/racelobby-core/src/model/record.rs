// ── Raw source output ──

use serde::{Deserialize, Serialize};

use super::id::{ServerAddress, ServerId};
use super::info::ServerInfo;

/// One server as yielded by a source, before reconciliation.
///
/// Sources never deduplicate; the session merges records into the shared
/// store by `id`. A record with `info` is complete; a record without it
/// only says "this address exists" and waits for the liveness scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub address: Option<ServerAddress>,
    pub display_name: Option<String>,
    pub info: Option<ServerInfo>,
}

impl ServerRecord {
    /// A record known only by its address.
    pub fn from_address(address: ServerAddress) -> Self {
        Self {
            id: ServerId::from_address(&address),
            address: Some(address),
            display_name: None,
            info: None,
        }
    }

    /// A record known only by its id (e.g. a file-backed list line).
    pub fn from_id(id: ServerId, display_name: Option<String>) -> Self {
        Self {
            address: id.address(),
            id,
            display_name,
            info: None,
        }
    }

    pub fn with_info(mut self, info: ServerInfo) -> Self {
        if self.display_name.is_none() && !info.name.is_empty() {
            self.display_name = Some(info.name.clone());
        }
        self.info = Some(info);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.info.is_some()
    }
}
