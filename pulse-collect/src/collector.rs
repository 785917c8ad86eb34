//! Source collector
//!
//! Fetches every configured dashboard concurrently and merges the
//! outcomes into one [`CollectionReport`]:
//! - Concurrency equals the number of sources, so nothing queues
//! - Each fetch is bounded by its own `timeout_ms`; on expiry the request
//!   future is dropped, which cancels the in-flight call
//! - Failures never escape: they become per-source error entries

use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use pulse_core::{CollectionReport, CollectionResult, SignalSource};

use crate::{create_client, CollectError, CollectorConfig};

/// Concurrent fan-out over upstream read endpoints
#[derive(Debug, Clone)]
pub struct SourceCollector {
    client: Client,
}

impl SourceCollector {
    pub fn new(config: &CollectorConfig) -> Result<Self, CollectError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    /// Build around an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Collect every source; the report has exactly one entry per distinct name
    pub async fn collect(&self, sources: &[SignalSource]) -> CollectionReport {
        let mut seen: HashSet<&str> = HashSet::new();
        let unique: Vec<SignalSource> = sources
            .iter()
            .filter(|source| {
                let fresh = seen.insert(source.name.as_str());
                if !fresh {
                    warn!("Duplicate source {} ignored", source.name);
                }
                fresh
            })
            .cloned()
            .collect();

        if unique.is_empty() {
            return CollectionReport::new();
        }

        let width = unique.len();
        let started = Instant::now();

        let results: Vec<CollectionResult> = stream::iter(unique)
            .map(|source| async move {
                match self.fetch(&source).await {
                    Ok(payload) => CollectionResult::success(&source.name, payload),
                    Err(e) => {
                        warn!("Source {} failed: {}", source.name, e);
                        CollectionResult::error(&source.name, e.to_string())
                    }
                }
            })
            .buffer_unordered(width)
            .collect()
            .await;

        let report: CollectionReport = results.into_iter().collect();
        debug!(
            "Collected {} sources ({} ok, {} failed) in {:?}",
            report.len(),
            report.success_count(),
            report.error_count(),
            started.elapsed()
        );
        report
    }

    /// Fetch one source within its timeout
    pub async fn fetch(&self, source: &SignalSource) -> Result<serde_json::Value, CollectError> {
        let budget = Duration::from_millis(source.timeout_ms);
        match tokio::time::timeout(budget, self.request(source)).await {
            Ok(result) => result,
            Err(_) => Err(CollectError::Timeout(source.timeout_ms)),
        }
    }

    async fn request(&self, source: &SignalSource) -> Result<serde_json::Value, CollectError> {
        debug!("Fetching {} from {}", source.name, source.endpoint);

        let response = self.client.get(&source.endpoint).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<serde_json::Value>(&body).map_err(|e| CollectError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP server answering every request after `delay`
    async fn spawn_stub(delay: Duration, status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}/", addr)
    }

    fn collector() -> SourceCollector {
        SourceCollector::new(&CollectorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_partial_failure_within_timeout() {
        let fast_a = spawn_stub(Duration::from_millis(50), 200, r#"{"holisticScore": 0.8}"#).await;
        let fast_b = spawn_stub(Duration::from_millis(50), 200, r#"{"kpis": {"overall_avg_score": 4.1}}"#).await;
        let hung = spawn_stub(Duration::from_secs(60), 200, "{}").await;

        let sources = vec![
            SignalSource::new("food", &fast_a),
            SignalSource::new("delivery", &fast_b),
            SignalSource::new("ux", &hung).with_timeout_ms(2000),
        ];

        let started = Instant::now();
        let report = collector().collect(&sources).await;
        let elapsed = started.elapsed();

        assert_eq!(report.len(), 3);
        assert_eq!(report.success_count(), 2);
        assert!(report.get("food").unwrap().is_success());
        assert!(report.get("delivery").unwrap().is_success());
        assert!(report.get("ux").unwrap().error().unwrap().contains("Timeout"));
        assert!(elapsed >= Duration::from_millis(1900), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3000), "took too long: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_latency_independent_of_source_count() {
        let mut sources = Vec::new();
        for i in 0..8 {
            let url = spawn_stub(Duration::from_millis(300), 200, r#"{"ok": true}"#).await;
            sources.push(SignalSource::new(&format!("source-{}", i), &url).with_timeout_ms(1500));
        }

        let started = Instant::now();
        let report = collector().collect(&sources).await;

        assert_eq!(report.len(), 8);
        assert_eq!(report.success_count(), 8);
        assert!(started.elapsed() < Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_error_statuses_and_bad_payloads() {
        let failing = spawn_stub(Duration::ZERO, 503, r#"{"detail": "down"}"#).await;
        let garbage = spawn_stub(Duration::ZERO, 200, "<html>not json</html>").await;

        // bind then drop to get a port nobody listens on
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            format!("http://{}/", listener.local_addr().unwrap())
        };

        let sources = vec![
            SignalSource::new("failing", &failing),
            SignalSource::new("garbage", &garbage),
            SignalSource::new("closed", &closed),
        ];

        let report = collector().collect(&sources).await;

        assert_eq!(report.len(), 3);
        assert_eq!(report.error_count(), 3);
        assert!(report.get("failing").unwrap().error().unwrap().contains("503"));
        assert!(report.get("garbage").unwrap().error().unwrap().contains("Unparsable"));
        assert!(report.get("closed").unwrap().error().is_some());
    }

    #[tokio::test]
    async fn test_collect_on_spawned_task() {
        let url = spawn_stub(Duration::from_millis(20), 200, r#"{"holisticScore": 0.7}"#).await;
        let sources = vec![
            SignalSource::new("ux", &url),
            SignalSource::new("food", &url),
        ];

        let collector = collector();
        let report = tokio::spawn(async move { collector.collect(&sources).await })
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.success_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_sources() {
        let url = spawn_stub(Duration::ZERO, 200, "[1, 2, 3]").await;
        let sources = vec![
            SignalSource::new("ux", &url),
            SignalSource::new("ux", "http://127.0.0.1:1/"),
        ];

        let report = collector().collect(&sources).await;
        assert_eq!(report.len(), 1);
        assert!(report.get("ux").unwrap().is_success());

        assert!(collector().collect(&[]).await.is_empty());
    }
}
