#![allow(clippy::unwrap_used)]
// End-to-end aggregation over a lobby list and a LAN scan.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use racelobby_api::{LanReply, RawServer};
use tokio_util::sync::CancellationToken;

use racelobby_core::source::{LanScanner, LobbyApi};
use racelobby_core::{
    CoreError, EntryStatus, LAN_KEY, LOBBY_KEY, LanSource, LobbySource, OnlineConfig,
    OnlineManager, PackSelection, ProbeResult, ServerAddress, ServerId, ServerInfo, ServerProber,
    SessionStatus, Source,
};

// ── Fakes ───────────────────────────────────────────────────────────

struct FakeLobby {
    servers: Vec<RawServer>,
}

#[async_trait]
impl LobbyApi for FakeLobby {
    async fn list_servers(&self) -> Result<Vec<RawServer>, racelobby_api::Error> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(self.servers.clone())
    }
}

struct FakeScanner {
    replies: Vec<LanReply>,
}

#[async_trait]
impl LanScanner for FakeScanner {
    async fn scan(
        &self,
        on_found: &mut (dyn FnMut(LanReply) + Send),
        cancel: &CancellationToken,
    ) -> Result<bool, racelobby_api::Error> {
        for reply in &self.replies {
            tokio::select! {
                () = cancel.cancelled() => return Ok(false),
                () = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
            on_found(*reply);
        }
        Ok(true)
    }
}

struct FakeProber;

#[async_trait]
impl ServerProber for FakeProber {
    async fn probe(&self, address: &ServerAddress) -> Result<ProbeResult, CoreError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(ProbeResult {
            info: ServerInfo {
                name: format!("Server at {address}"),
                drivers: 1,
                capacity: 16,
                ..ServerInfo::default()
            },
            ping: Duration::from_millis(5),
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn lobby_servers(count: u8) -> Vec<RawServer> {
    (0..count)
        .map(|i| RawServer {
            ip: Some(format!("93.57.0.{i}")),
            port: 9600,
            cport: 8081,
            name: format!("Lobby {i}"),
            clients: u32::from(i % 7),
            max_clients: 24,
            ..RawServer::default()
        })
        .collect()
}

fn lan_replies(hosts: &[[u8; 4]]) -> Vec<LanReply> {
    hosts
        .iter()
        .map(|[a, b, c, d]| LanReply {
            ip: IpAddr::V4(Ipv4Addr::new(*a, *b, *c, *d)),
            http_port: 8081,
        })
        .collect()
}

fn manager_with(lobby: Vec<RawServer>, lan: Vec<LanReply>) -> OnlineManager {
    let prober: Arc<dyn ServerProber> = Arc::new(FakeProber);
    let manager = OnlineManager::new(OnlineConfig::default(), Arc::clone(&prober));
    manager.register_source(Source::batch(LobbySource::new(
        Arc::new(FakeLobby { servers: lobby }),
        true,
    )));
    manager.register_source(Source::streaming(LanSource::new(
        Arc::new(FakeScanner { replies: lan }),
        prober,
    )));
    manager
}

/// Wait until every session in the pack settled, streaming ones included.
async fn settle(manager: &OnlineManager) {
    let pack = manager.pack(&PackSelection::All);
    pack.ensure_loaded(&CancellationToken::new()).await;
    for session in pack.sessions() {
        let mut updates = session.subscribe();
        while updates.borrow_and_update().status == SessionStatus::Loading {
            updates.changed().await.unwrap();
        }
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn lobby_and_lan_merge_into_one_store() {
    let manager = manager_with(
        lobby_servers(100),
        lan_replies(&[[192, 168, 1, 10], [192, 168, 1, 11], [192, 168, 1, 12]]),
    );

    settle(&manager).await;

    let store = manager.store();
    assert_eq!(store.len(), 103);
    assert_eq!(store.origin_count(LOBBY_KEY), 100);
    assert_eq!(store.origin_count(LAN_KEY), 3);

    let lan = store.get(&ServerId::new("192.168.1.11:8081")).unwrap().state();
    assert!(lan.is_lan());
    assert_eq!(lan.origins.iter().collect::<Vec<_>>(), vec![LAN_KEY]);
    assert_eq!(lan.name(), "Server at 192.168.1.11:8081");

    let lobby = store.get(&ServerId::new("93.57.0.42:8081")).unwrap().state();
    assert_eq!(lobby.origins.iter().collect::<Vec<_>>(), vec![LOBBY_KEY]);
    assert!(lobby.fully_loaded);
    assert!(!lobby.is_lan());

    assert_eq!(manager.pack(&PackSelection::All).status().status, SessionStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn shared_server_keeps_both_origins() {
    let manager = manager_with(lobby_servers(3), lan_replies(&[[93, 57, 0, 1]]));

    settle(&manager).await;

    let store = manager.store();
    assert_eq!(store.len(), 3);
    let shared = store.get(&ServerId::new("93.57.0.1:8081")).unwrap().state();
    assert!(shared.has_origin(LOBBY_KEY) && shared.has_origin(LAN_KEY));
    assert!(shared.is_lan());

    // Dropping the lobby keeps the entry alive through the LAN origin.
    assert!(manager.unregister_source(LOBBY_KEY));
    assert_eq!(store.len(), 1);
    assert!(store.contains(&ServerId::new("93.57.0.1:8081")));
}

#[tokio::test(start_paused = true)]
async fn pinging_fills_in_every_merged_entry() {
    let manager = manager_with(lobby_servers(20), lan_replies(&[[192, 168, 1, 10]]));
    settle(&manager).await;

    let progress = manager.start_pinging(None).await.unwrap();
    assert_eq!(progress.total, 21);
    assert_eq!(progress.pinged, 21);
    assert!(
        manager
            .store()
            .snapshot()
            .iter()
            .all(|e| e.status() == EntryStatus::Ready)
    );
    manager.shutdown().await;
}
