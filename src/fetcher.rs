use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::{self, RetryPolicy};
use crate::error::{AppError, Result};
use crate::types::{RunTimestamp, StatRow, StatsEnvelope};

/// Anything that can return the raw body for a stats URL.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn get_body(&self, url: &str) -> Result<String>;
}

/// Live OpenSea source backed by a shared reqwest client.
pub struct HttpStatsSource {
    client: reqwest::Client,
}

impl HttpStatsSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    async fn get_body(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, config::USER_AGENT)
            .send()
            .await?;
        // Status is not checked; error pages are classified by their body.
        let status = resp.status();
        let body = resp.text().await?;
        debug!(%status, bytes = body.len(), "GET {url}");
        Ok(body)
    }
}

pub fn stats_url(base_url: &str, collection: &str, endpoint: &str) -> String {
    format!("{base_url}/{collection}/{endpoint}")
}

/// Decode a stats response into a long-form row.
///
/// Bodies that are not JSON at all surface as `AppError::Json` (transient).
/// Valid JSON of the wrong shape is `AppError::UnexpectedPayload`.
pub fn parse_stats_body(collection: &str, body: &str, timestamp: RunTimestamp) -> Result<StatRow> {
    let envelope: StatsEnvelope = serde_json::from_str(body).map_err(|e| {
        if e.is_data() {
            AppError::UnexpectedPayload {
                collection: collection.to_string(),
                reason: e.to_string(),
            }
        } else {
            AppError::Json(e)
        }
    })?;

    Ok(StatRow {
        collection: collection.to_string(),
        timestamp,
        entries: envelope.stats.0,
    })
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient_parse() && attempt < max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    delay_secs = policy.delay.as_secs(),
                    "Attempt {attempt} failed with malformed response ({e}); retrying whole batch in {:?}",
                    policy.delay,
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fetch every collection once, in order.
async fn fetch_batch_once<S>(
    source: &S,
    base_url: &str,
    collections: &[String],
    endpoint: &str,
    timestamp: RunTimestamp,
) -> Result<Vec<StatRow>>
where
    S: StatsSource + ?Sized,
{
    let mut rows = Vec::with_capacity(collections.len());
    for collection in collections {
        let url = stats_url(base_url, collection, endpoint);
        let body = source.get_body(&url).await?;
        rows.push(parse_stats_body(collection, &body, timestamp)?);
    }
    Ok(rows)
}

/// Fetch stats for all collections, retrying the entire batch from the first
/// collection when any response is not valid JSON. Every row carries
/// `timestamp`, including rows fetched on a later attempt.
pub async fn fetch_collection_stats<S>(
    source: &S,
    base_url: &str,
    collections: &[String],
    endpoint: &str,
    timestamp: RunTimestamp,
    retry: RetryPolicy,
) -> Result<Vec<StatRow>>
where
    S: StatsSource + ?Sized,
{
    if let Some(pos) = collections.iter().position(|c| c.trim().is_empty()) {
        return Err(AppError::Config(format!(
            "collection slug at index {pos} is empty"
        )));
    }

    retry_transient(retry, |attempt| {
        info!(
            attempt,
            max_attempts = retry.max_attempts,
            collections = collections.len(),
            "Fetching collection stats: attempt {attempt} of {}",
            retry.max_attempts,
        );
        fetch_batch_once(source, base_url, collections, endpoint, timestamp)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Replays canned bodies in order and records every requested URL.
    struct ScriptedSource {
        bodies: Mutex<VecDeque<String>>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(bodies: &[&str]) -> Self {
            Self {
                bodies: Mutex::new(bodies.iter().map(|b| b.to_string()).collect()),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatsSource for ScriptedSource {
        async fn get_body(&self, url: &str) -> Result<String> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(self
                .bodies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "<html>no script left</html>".to_string()))
        }
    }

    fn slugs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn url_is_base_slug_endpoint() {
        assert_eq!(
            stats_url("https://api.opensea.io/api/v1/collection", "azuki", "stats"),
            "https://api.opensea.io/api/v1/collection/azuki/stats"
        );
    }

    #[test]
    fn parse_classifies_failures() {
        let ts = RunTimestamp::now();
        assert!(parse_stats_body("foo", "Too Many Requests", ts)
            .unwrap_err()
            .is_transient_parse());
        assert!(matches!(
            parse_stats_body("foo", r#"{"detail": "Not found"}"#, ts),
            Err(AppError::UnexpectedPayload { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn every_row_shares_the_run_timestamp() {
        let source = ScriptedSource::new(&[
            r#"{"stats": {"a": 1}}"#,
            r#"{"stats": {"b": 2}}"#,
            r#"{"stats": {"c": 3}}"#,
        ]);
        let ts = RunTimestamp::now();
        let rows = fetch_collection_stats(&source, "http://x", &slugs(&["p", "q", "r"]), "stats", ts, policy())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.timestamp == ts));
        assert_eq!(
            source.requested(),
            vec!["http://x/p/stats", "http://x/q/stats", "http://x/r/stats"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_retries_whole_batch() {
        // foo ok, bar malformed; then both ok.
        let source = ScriptedSource::new(&[
            r#"{"stats": {"a": 1}}"#,
            "<html>rate limited</html>",
            r#"{"stats": {"a": 1}}"#,
            r#"{"stats": {"b": 2}}"#,
        ]);
        let start = tokio::time::Instant::now();
        let rows = fetch_collection_stats(
            &source,
            "http://x",
            &slugs(&["foo", "bar"]),
            "stats",
            RunTimestamp::now(),
            policy(),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].collection, "bar");
        assert_eq!(
            source.requested(),
            vec!["http://x/foo/stats", "http://x/bar/stats", "http://x/foo/stats", "http://x/bar/stats"]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_attempts() {
        let source = ScriptedSource::new(&[]);
        let start = tokio::time::Instant::now();
        let err = fetch_collection_stats(
            &source,
            "http://x",
            &slugs(&["foo"]),
            "stats",
            RunTimestamp::now(),
            policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Json(_)));
        assert_eq!(source.requested().len(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(4 * 30));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_shape_is_not_retried() {
        let source = ScriptedSource::new(&[r#"{"detail": "Request was throttled."}"#]);
        let err = fetch_collection_stats(
            &source,
            "http://x",
            &slugs(&["foo"]),
            "stats",
            RunTimestamp::now(),
            policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::UnexpectedPayload { .. }));
        assert_eq!(source.requested().len(), 1);
    }

    #[tokio::test]
    async fn empty_slug_is_rejected_before_any_request() {
        let source = ScriptedSource::new(&[]);
        let err = fetch_collection_stats(
            &source,
            "http://x",
            &slugs(&["foo", " "]),
            "stats",
            RunTimestamp::now(),
            policy(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(source.requested().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_passes_attempt_number_explicitly() {
        let mut seen = Vec::new();
        let res: Result<()> = retry_transient(
            RetryPolicy { max_attempts: 3, delay: Duration::from_secs(1) },
            |attempt| {
                seen.push(attempt);
                async {
                    let e = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
                    Err::<(), AppError>(AppError::Json(e))
                }
            },
        )
        .await;
        assert!(res.is_err());
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_stops_immediately() {
        let mut calls = 0;
        let res: Result<()> = retry_transient(policy(), |_| {
            calls += 1;
            async { Err::<(), AppError>(AppError::Config("boom".into())) }
        })
        .await;
        assert!(matches!(res, Err(AppError::Config(_))));
        assert_eq!(calls, 1);
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Serves one canned response per connection, in order, and returns the
    /// raw request heads it saw.
    async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut heads = Vec::new();
            for response in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = sock.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                heads.push(String::from_utf8_lossy(&buf).into_owned());
                sock.write_all(response.as_bytes()).await.unwrap();
                sock.shutdown().await.unwrap();
            }
            heads
        });
        (format!("http://{addr}/collection"), handle)
    }

    #[tokio::test]
    async fn http_source_sends_json_accept_and_returns_error_pages() {
        let (base, server) = serve(vec![
            http_response("200 OK", "application/json", r#"{"stats": {"floor_price": 1.5}}"#),
            http_response("429 Too Many Requests", "text/html", "<html><body>Too Many Requests</body></html>"),
        ])
        .await;
        let source = HttpStatsSource::new(Duration::from_secs(5)).unwrap();
        let ts = RunTimestamp::now();

        let body = source.get_body(&stats_url(&base, "azuki", "stats")).await.unwrap();
        let row = parse_stats_body("azuki", &body, ts).unwrap();
        assert_eq!(row.entries.len(), 1);
        assert_eq!(row.entries[0].0, "floor_price");

        let body = source.get_body(&stats_url(&base, "azuki", "stats")).await.unwrap();
        let err = parse_stats_body("azuki", &body, ts).unwrap_err();
        assert!(matches!(err, AppError::Json(_)));
        assert!(err.is_transient_parse());

        let heads = server.await.unwrap();
        assert_eq!(heads.len(), 2);
        for head in &heads {
            assert!(head.starts_with("GET /collection/azuki/stats HTTP/1.1\r\n"), "{head}");
            assert!(head.to_ascii_lowercase().contains("\r\naccept: application/json\r\n"), "{head}");
        }
    }

    #[tokio::test]
    async fn http_rate_limit_page_is_retried_until_stats_arrive() {
        let (base, server) = serve(vec![
            http_response("429 Too Many Requests", "text/html", "<html>slow down</html>"),
            http_response("200 OK", "application/json", r#"{"stats": {"num_owners": 10}}"#),
        ])
        .await;
        let source = HttpStatsSource::new(Duration::from_secs(5)).unwrap();

        let rows = fetch_collection_stats(
            &source,
            &base,
            &slugs(&["azuki"]),
            "stats",
            RunTimestamp::now(),
            RetryPolicy { max_attempts: 5, delay: Duration::ZERO },
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].collection, "azuki");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn console_reports_each_attempt_in_order() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let source = ScriptedSource::new(&["Too Many Requests", r#"{"stats": {"a": 1}}"#]);
        fetch_collection_stats(
            &source,
            "http://x",
            &slugs(&["foo"]),
            "stats",
            RunTimestamp::now(),
            policy(),
        )
        .await
        .unwrap();

        let out = logs.contents();
        let first = out.find("attempt 1 of 5").expect("attempt 1 logged");
        let retry = out.find("Attempt 1 failed").expect("retry warning logged");
        let second = out.find("attempt 2 of 5").expect("attempt 2 logged");
        assert!(first < retry && retry < second, "{out}");
        assert!(!out.contains("attempt 3 of 5"), "{out}");
    }
}
