#![allow(clippy::unwrap_used)]
// Integration tests for `LobbyClient` using wiremock.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use racelobby_api::{Error, LobbyClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, LobbyClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = LobbyClient::with_client(reqwest::Client::new(), base_url);
    (server, client)
}

fn host_and_port(server: &MockServer) -> (String, u16) {
    let addr = server.address();
    (addr.ip().to_string(), addr.port())
}

// ── Lobby list ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_servers() {
    let (server, client) = setup().await;

    let body = json!([
        {
            "ip": "10.0.0.1", "port": 9600, "cport": 8081, "name": "Spa Endurance",
            "clients": 4, "maxclients": 30, "track": "spa", "cars": ["ks_audi_r8_lms"],
            "pass": false, "session": 0, "sessiontypes": [3], "durations": [3600],
            "timeleft": 1200, "country": ["Belgium", "BE"]
        },
        {
            "ip": "10.0.0.2", "port": 9601, "cport": 8082, "name": "Drift Practice",
            "clients": 0, "maxclients": 12, "track": "drift", "cars": [], "pass": true
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/lobby.ashx/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let servers = client.list_servers().await.unwrap();

    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].name, "Spa Endurance");
    assert_eq!(servers[0].clients, 4);
    assert_eq!(servers[0].country_code(), Some("BE"));
    assert!(servers[1].pass);
}

#[tokio::test]
async fn test_list_servers_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/lobby.ashx/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let result = client.list_servers().await;

    assert!(
        matches!(result, Err(Error::Malformed { .. })),
        "expected Malformed error, got: {result:?}"
    );
    assert!(result.unwrap_err().is_malformed());
}

#[tokio::test]
async fn test_list_servers_http_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/lobby.ashx/list"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client.list_servers().await;

    assert!(
        matches!(result, Err(Error::Status { status: 503, .. })),
        "expected Status error, got: {result:?}"
    );
}

// ── Server INFO ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_info_fills_address() {
    let (server, client) = setup().await;
    let (host, port) = host_and_port(&server);

    Mock::given(method("GET"))
        .and(path("/INFO"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Local Test", "clients": 2, "maxclients": 8, "track": "imola",
            "cars": ["abarth500"], "pass": false, "port": 9600,
            "extra": true, "weather": "3_clear", "ambientTemperature": 24.0,
            "roadTemperature": 31.5, "grip": 98.0
        })))
        .mount(&server)
        .await;

    let info = client.server_info(&host, port).await.unwrap();

    assert_eq!(info.ip.as_deref(), Some(host.as_str()));
    assert_eq!(info.cport, port);
    assert_eq!(info.weather.as_deref(), Some("3_clear"));
    assert_eq!(info.grip, Some(98.0));
}

#[tokio::test]
async fn test_server_info_timeout() {
    let server = MockServer::start().await;
    let (host, port) = host_and_port(&server);
    let transport = TransportConfig::default().with_timeout(Duration::from_millis(100));
    let client = LobbyClient::new(Url::parse(&server.uri()).unwrap(), &transport).unwrap();

    Mock::given(method("GET"))
        .and(path("/INFO"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "slow"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = client.server_info(&host, port).await;

    assert!(
        matches!(result, Err(Error::Timeout { timeout_ms: 100 })),
        "expected Timeout error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_server_info_connection_refused() {
    // Bind and immediately drop a listener to get a port nobody serves.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = LobbyClient::with_client(
        reqwest::Client::new(),
        Url::parse("http://127.0.0.1").unwrap(),
    );

    let err = client.server_info("127.0.0.1", port).await.unwrap_err();

    assert!(err.is_connection_refused(), "expected refusal, got: {err:?}");
    assert!(err.is_transient());
}
