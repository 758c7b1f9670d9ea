// LAN broadcast discovery
//
// Sends a one-byte probe to the broadcast address on every port of a
// range, then collects replies for a fixed window. Each reply advertises
// the HTTP port the server answers INFO on.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

/// Probe byte; servers echo it as the first byte of their reply.
pub const PROBE: u8 = 0xC8;

/// A server that answered the broadcast probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LanReply {
    pub ip: IpAddr,
    pub http_port: u16,
}

/// Broadcast scanner over a port range.
#[derive(Debug, Clone)]
pub struct LanDiscovery {
    ports: RangeInclusive<u16>,
    window: Duration,
    target: Ipv4Addr,
}

impl LanDiscovery {
    pub fn new(ports: RangeInclusive<u16>, window: Duration) -> Self {
        Self {
            ports,
            window,
            target: Ipv4Addr::BROADCAST,
        }
    }

    /// Probe a specific address instead of the limited broadcast address.
    pub fn with_target(mut self, target: Ipv4Addr) -> Self {
        self.target = target;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run one discovery window, invoking `on_found` once per distinct server.
    ///
    /// Returns `Ok(false)` if `cancel` fired before the window elapsed.
    pub async fn scan<F>(&self, mut on_found: F, cancel: &CancellationToken) -> Result<bool, Error>
    where
        F: FnMut(LanReply) + Send,
    {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        for port in self.ports.clone() {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if let Err(e) = socket.send_to(&[PROBE], (self.target, port)).await {
                debug!(port, error = %e, "lan probe send failed");
            }
        }

        let deadline = tokio::time::Instant::now() + self.window;
        let mut seen = HashSet::new();
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(false),
                () = tokio::time::sleep_until(deadline) => return Ok(true),
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(v) => v,
                        Err(e) => {
                            debug!(error = %e, "lan receive failed");
                            continue;
                        }
                    };
                    let Some(reply) = parse_reply(buf.get(..len).unwrap_or_default(), from.ip()) else {
                        debug!(%from, len, "ignoring unrecognised lan reply");
                        continue;
                    };
                    if seen.insert(reply) {
                        on_found(reply);
                    }
                }
            }
        }
    }
}

fn parse_reply(payload: &[u8], ip: IpAddr) -> Option<LanReply> {
    match payload {
        [PROBE, lo, hi, ..] => {
            let http_port = u16::from_le_bytes([*lo, *hi]);
            (http_port != 0).then_some(LanReply { ip, http_port })
        }
        _ => None,
    }
}
