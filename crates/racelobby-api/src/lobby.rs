// Lobby HTTP client
//
// Wraps `reqwest::Client` with the master-list and per-server INFO
// endpoints. Transport failures are classified here so the core never
// has to look at `reqwest` internals.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::RawServer;
use crate::transport::TransportConfig;

/// Raw HTTP client for the lobby master list and individual servers.
#[derive(Debug, Clone)]
pub struct LobbyClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl LobbyClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the lobby root (e.g. `http://93.57.10.21`); the list
    /// lives under `lobby.ashx/list`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
        }
    }

    /// The lobby base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the full master list.
    pub async fn list_servers(&self) -> Result<Vec<RawServer>, Error> {
        let url = Url::parse(&format!(
            "{}/lobby.ashx/list",
            self.base_url.as_str().trim_end_matches('/')
        ))?;
        self.get_json(url).await
    }

    /// Query a single server's `INFO` endpoint.
    ///
    /// The caller measures latency around this call; the response carries
    /// no address, so `ip` is filled in from `host` when missing.
    pub async fn server_info(&self, host: &str, http_port: u16) -> Result<RawServer, Error> {
        let url = info_url(host, http_port)?;
        let mut raw: RawServer = self.get_json(url).await?;
        if raw.ip.is_none() {
            raw.ip = Some(host.to_owned());
        }
        if raw.cport == 0 {
            raw.cport = http_port;
        }
        Ok(raw)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await.map_err(|e| self.classify(&url, e))?;
        serde_json::from_str(&body).map_err(|e| Error::Malformed {
            message: e.to_string(),
            body,
        })
    }

    fn classify(&self, url: &Url, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if err.is_connect() {
            Error::ConnectionRefused {
                address: format!(
                    "{}:{}",
                    url.host_str().unwrap_or("<unknown>"),
                    url.port_or_known_default().unwrap_or_default()
                ),
            }
        } else {
            Error::Transport(err)
        }
    }
}

fn info_url(host: &str, http_port: u16) -> Result<Url, Error> {
    let full = if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{http_port}/INFO")
    } else {
        format!("http://{host}:{http_port}/INFO")
    };
    Ok(Url::parse(&full)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::info_url;

    #[test]
    fn info_url_brackets_ipv6_hosts() {
        let url = info_url("::1", 8081).unwrap();
        assert_eq!(url.as_str(), "http://[::1]:8081/INFO");
    }

    #[test]
    fn info_url_plain_host() {
        let url = info_url("10.0.0.5", 9000).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:9000/INFO");
    }
}
