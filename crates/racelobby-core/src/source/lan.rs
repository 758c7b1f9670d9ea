// ── LAN discovery source ──
//
// Streaming: broadcast discovery runs for a fixed window while every
// reply is probed concurrently and pushed as soon as it is known.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use racelobby_api::{LanDiscovery, LanReply};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LoadProgress, RecordSink, SourceIdentity, StreamingSource};
use crate::error::CoreError;
use crate::model::{ServerAddress, ServerRecord, SourceFlags};
use crate::probe::ServerProber;

pub const LAN_KEY: &str = "lan";

const PROBE_CONCURRENCY: usize = 8;

/// Runs one broadcast discovery window.
#[async_trait]
pub trait LanScanner: Send + Sync {
    /// `Ok(false)` if cancelled before the window ended.
    async fn scan(
        &self,
        on_found: &mut (dyn FnMut(LanReply) + Send),
        cancel: &CancellationToken,
    ) -> Result<bool, racelobby_api::Error>;
}

#[async_trait]
impl LanScanner for LanDiscovery {
    async fn scan(
        &self,
        on_found: &mut (dyn FnMut(LanReply) + Send),
        cancel: &CancellationToken,
    ) -> Result<bool, racelobby_api::Error> {
        LanDiscovery::scan(self, on_found, cancel).await
    }
}

/// Servers answering LAN broadcast discovery.
pub struct LanSource {
    scanner: Arc<dyn LanScanner>,
    prober: Arc<dyn ServerProber>,
}

impl LanSource {
    pub fn new(scanner: Arc<dyn LanScanner>, prober: Arc<dyn ServerProber>) -> Self {
        Self { scanner, prober }
    }

    async fn resolve(&self, reply: LanReply, cancel: &CancellationToken) -> Option<ServerRecord> {
        if cancel.is_cancelled() {
            return None;
        }
        let address = ServerAddress::new(reply.ip.to_string(), reply.http_port);
        let probed = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            probed = self.prober.probe(&address) => probed,
        };
        let record = ServerRecord::from_address(address);
        match probed {
            Ok(result) => Some(record.with_info(result.info)),
            Err(e) => {
                // Keep the address; the liveness scheduler will retry it.
                debug!(address = %record.id, error = %e, "lan server did not answer INFO");
                Some(record)
            }
        }
    }
}

impl SourceIdentity for LanSource {
    fn key(&self) -> &str {
        LAN_KEY
    }

    fn display_name(&self) -> String {
        "LAN".into()
    }

    fn flags(&self) -> SourceFlags {
        SourceFlags {
            lan: true,
            ..SourceFlags::default()
        }
    }
}

#[async_trait]
impl StreamingSource for LanSource {
    async fn stream(
        &self,
        sink: &dyn RecordSink,
        cancel: &CancellationToken,
    ) -> Result<bool, CoreError> {
        sink.progress(LoadProgress::message("Scanning local network"));
        let (tx, rx) = mpsc::unbounded_channel();
        let scanner = &self.scanner;

        // The sender lives inside this future, so the reply stream ends
        // as soon as the discovery window closes.
        let scan = async move {
            let mut on_found = move |reply: LanReply| {
                let _ = tx.send(reply);
            };
            scanner.scan(&mut on_found, cancel).await
        };

        let mut found = 0usize;
        let resolve = UnboundedReceiverStream::new(rx)
            .map(|reply| self.resolve(reply, cancel))
            .buffer_unordered(PROBE_CONCURRENCY)
            .for_each(|record| {
                if let Some(record) = record {
                    found += 1;
                    sink.push(record);
                    sink.progress(LoadProgress::count(found, None));
                }
                futures_util::future::ready(())
            });

        let (completed, ()) = tokio::join!(scan, resolve);
        Ok(completed? && !cancel.is_cancelled())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    use super::*;
    use crate::probe::testing::ScriptedProber;
    use crate::source::ProgressSink;

    struct FixedScanner(Vec<LanReply>);

    #[async_trait]
    impl LanScanner for FixedScanner {
        async fn scan(
            &self,
            on_found: &mut (dyn FnMut(LanReply) + Send),
            cancel: &CancellationToken,
        ) -> Result<bool, racelobby_api::Error> {
            for reply in &self.0 {
                on_found(*reply);
            }
            Ok(!cancel.is_cancelled())
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<ServerRecord>>);

    impl ProgressSink for Collect {
        fn progress(&self, _: LoadProgress) {}
    }

    impl RecordSink for Collect {
        fn push(&self, record: ServerRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn reply(last: u8, port: u16) -> LanReply {
        LanReply {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, last)),
            http_port: port,
        }
    }

    #[tokio::test]
    async fn pushes_probed_and_unreachable_servers() {
        let prober = Arc::new(ScriptedProber::default());
        prober.fail(ServerAddress::new("192.168.1.3", 8082), 1);
        let source = LanSource::new(
            Arc::new(FixedScanner(vec![reply(2, 8081), reply(3, 8082)])),
            prober,
        );

        let sink = Collect::default();
        assert!(source.stream(&sink, &CancellationToken::new()).await.unwrap());

        let mut records = sink.0.into_inner().unwrap();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(records.len(), 2);
        assert!(records[0].is_complete());
        assert!(!records[1].is_complete());
        assert_eq!(records[1].id.as_str(), "192.168.1.3:8082");
    }

    #[tokio::test]
    async fn cancelled_scan_reports_incomplete() {
        let source = LanSource::new(
            Arc::new(FixedScanner(vec![reply(2, 8081)])),
            Arc::new(ScriptedProber::default()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = Collect::default();
        assert!(!source.stream(&sink, &cancel).await.unwrap());
        assert!(sink.0.into_inner().unwrap().is_empty());
    }
}
