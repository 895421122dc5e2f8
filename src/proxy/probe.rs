//! Origin probe: one request to an IP-echo endpoint, optionally through a proxy

use crate::proxy::models::ProxyRecord;
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default IP-echo endpoint
pub const DEFAULT_ECHO_URL: &str = "http://httpbin.org/ip";

/// Why a probe produced no origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    ConnectError,
    BadStatus,
    MalformedResponse,
    /// The probe task itself faulted; never produced by a probe implementation
    InternalFault,
}

/// Typed probe failure with a human-readable detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub detail: Option<String>,
}

impl ProbeFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(FailureKind::Timeout, format!("no response within {:.1}s", after.as_secs_f64()))
    }

    pub fn bad_status(status: u16) -> Self {
        Self::new(FailureKind::BadStatus, status.to_string())
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedResponse, detail)
    }

    pub fn connect(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::ConnectError, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::InternalFault, detail)
    }

    fn from_request_error(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(timeout)
        } else {
            Self::connect(error_chain(err))
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            FailureKind::Timeout => "timed out",
            FailureKind::ConnectError => "connection error",
            FailureKind::BadStatus => "bad HTTP status",
            FailureKind::MalformedResponse => "malformed echo response",
            FailureKind::InternalFault => "internal fault",
        };
        match &self.detail {
            Some(detail) => write!(f, "{label}: {detail}"),
            None => f.write_str(label),
        }
    }
}

impl StdError for ProbeFailure {}

/// Origin address seen by the echo endpoint and the round trip it took
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSuccess {
    pub origin: String,
    pub latency_seconds: f64,
}

pub type ProbeResult = std::result::Result<ProbeSuccess, ProbeFailure>;

/// A single-attempt origin lookup
///
/// `proxy == None` means a direct request. Implementations must respect
/// `timeout` as an upper bound and never retry.
#[async_trait]
pub trait OriginProbe: Send + Sync {
    async fn probe(&self, proxy: Option<&ProxyRecord>, timeout: Duration) -> ProbeResult;
}

/// [`OriginProbe`] backed by reqwest against a JSON echo endpoint
#[derive(Debug, Clone)]
pub struct HttpOriginProbe {
    echo_url: String,
}

impl HttpOriginProbe {
    pub fn new(echo_url: impl Into<String>) -> Self {
        Self {
            echo_url: echo_url.into(),
        }
    }

    pub fn echo_url(&self) -> &str {
        &self.echo_url
    }

    /// Create a client routed through `proxy`, or one that ignores proxy environment variables
    fn create_client(proxy: Option<&ProxyRecord>, timeout: Duration) -> std::result::Result<Client, ProbeFailure> {
        let builder = Client::builder().timeout(timeout).connect_timeout(timeout);

        let builder = match proxy {
            Some(proxy) => {
                let reqwest_proxy = ReqwestProxy::all(proxy.client_url())
                    .map_err(|e| ProbeFailure::connect(format!("unusable proxy {proxy}: {}", error_chain(&e))))?;
                builder.proxy(reqwest_proxy)
            }
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| ProbeFailure::connect(format!("failed to build HTTP client: {}", error_chain(&e))))
    }

    async fn fetch_origin(&self, client: &Client, timeout: Duration) -> std::result::Result<String, ProbeFailure> {
        let response = client
            .get(&self.echo_url)
            .send()
            .await
            .map_err(|e| ProbeFailure::from_request_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::bad_status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProbeFailure::from_request_error(&e, timeout))?;

        parse_origin(&body)
    }
}

impl Default for HttpOriginProbe {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_URL)
    }
}

#[async_trait]
impl OriginProbe for HttpOriginProbe {
    async fn probe(&self, proxy: Option<&ProxyRecord>, timeout: Duration) -> ProbeResult {
        let client = Self::create_client(proxy, timeout)?;
        let start = Instant::now();

        // Dropping the request future on expiry closes its connection.
        let origin = match tokio::time::timeout(timeout, self.fetch_origin(&client, timeout)).await {
            Ok(result) => result?,
            Err(_) => return Err(ProbeFailure::timeout(timeout)),
        };

        let latency_seconds = start.elapsed().as_secs_f64();
        match proxy {
            Some(proxy) => debug!(proxy = %proxy, origin = %origin, latency_seconds, "probe succeeded"),
            None => debug!(origin = %origin, latency_seconds, "direct probe succeeded"),
        }

        Ok(ProbeSuccess {
            origin,
            latency_seconds,
        })
    }
}

/// Extract the non-empty string `origin` field from an echo body
pub fn parse_origin(body: &[u8]) -> std::result::Result<String, ProbeFailure> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProbeFailure::malformed(format!("body is not JSON: {e}")))?;

    value
        .get("origin")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProbeFailure::malformed(format!("missing origin field in {value}")))
}

/// Render an error with its source chain, e.g. `error sending request: connection refused`
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Protocol;
    use crate::proxy::report::ValidationStatus;
    use crate::proxy::validator::{ProxyValidator, ValidatorConfig};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// HTTP forward proxy on 127.0.0.1 that answers every request itself
    /// with `{"origin": <origin>}` and records each request head
    async fn echoing_proxy(origin: &'static str) -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let heads = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&heads);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    let mut head = String::new();
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line == "\r\n" {
                            break;
                        }
                        head.push_str(&line);
                    }
                    seen.lock().unwrap().push(head);

                    let body = format!(r#"{{"origin": "{origin}"}}"#);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let socket = reader.get_mut();
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (port, heads)
    }

    #[test]
    fn test_parse_origin() {
        assert_eq!(parse_origin(br#"{"origin": "9.9.9.9"}"#).unwrap(), "9.9.9.9");
        assert_eq!(parse_origin(br#"{"origin": " 1.1.1.1, 9.9.9.9 "}"#).unwrap(), "1.1.1.1, 9.9.9.9");

        let bodies: [&[u8]; 4] = [b"not json", br#"{"ip": "9.9.9.9"}"#, br#"{"origin": ""}"#, br#"{"origin": 42}"#];
        for body in bodies {
            let err = parse_origin(body).unwrap_err();
            assert_eq!(err.kind, FailureKind::MalformedResponse);
        }
    }

    #[test]
    fn test_failure_display_is_readable() {
        assert_eq!(ProbeFailure::bad_status(503).to_string(), "bad HTTP status: 503");
        assert_eq!(
            ProbeFailure::timeout(Duration::from_secs(10)).to_string(),
            "timed out: no response within 10.0s"
        );
        let bare = ProbeFailure {
            kind: FailureKind::ConnectError,
            detail: None,
        };
        assert_eq!(bare.to_string(), "connection error");
    }

    #[tokio::test]
    async fn test_direct_probe_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ip")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"origin": "9.9.9.9"}"#)
            .expect(1)
            .create_async()
            .await;

        let probe = HttpOriginProbe::new(format!("{}/ip", server.url()));
        let success = probe.probe(None, TIMEOUT).await.unwrap();

        mock.assert_async().await;
        assert_eq!(success.origin, "9.9.9.9");
        assert!(success.latency_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_non_2xx_is_bad_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/ip").with_status(503).create_async().await;

        let probe = HttpOriginProbe::new(format!("{}/ip", server.url()));
        let failure = probe.probe(None, TIMEOUT).await.unwrap_err();

        assert_eq!(failure, ProbeFailure::bad_status(503));
    }

    #[tokio::test]
    async fn test_missing_origin_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ip")
            .with_status(200)
            .with_body(r#"{"address": "9.9.9.9"}"#)
            .create_async()
            .await;

        let probe = HttpOriginProbe::new(format!("{}/ip", server.url()));
        let failure = probe.probe(None, TIMEOUT).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_hanging_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let probe = HttpOriginProbe::new(format!("http://{addr}/ip"));
        let start = Instant::now();
        let failure = probe.probe(None, Duration::from_millis(200)).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpOriginProbe::new(format!("http://{addr}/ip"));
        let failure = probe.probe(None, TIMEOUT).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::ConnectError);
        assert!(failure.detail.is_some());
    }

    #[tokio::test]
    async fn test_origin_seen_through_http_proxy() {
        let (port, heads) = echoing_proxy("198.51.100.9").await;
        let proxy = ProxyRecord::new("127.0.0.1", port, Protocol::Http)
            .with_auth("alice".to_string(), "secret".to_string());

        let probe = HttpOriginProbe::new("http://echo.invalid/ip");
        let success = probe.probe(Some(&proxy), TIMEOUT).await.unwrap();
        assert_eq!(success.origin, "198.51.100.9");

        let heads = heads.lock().unwrap();
        assert_eq!(heads.len(), 1);
        assert!(heads[0].starts_with("GET http://echo.invalid/ip HTTP/1.1\r\n"), "{}", heads[0]);
        assert!(
            heads[0].to_ascii_lowercase().contains("proxy-authorization: basic ywxpy2u6c2vjcmv0"),
            "{}",
            heads[0]
        );
    }

    #[tokio::test]
    async fn test_validator_verdicts_through_real_proxies() {
        let mut server = mockito::Server::new_async().await;
        let direct = server
            .mock("GET", "/ip")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"origin": "203.0.113.7"}"#)
            .expect(1)
            .create_async()
            .await;

        let (hiding, _) = echoing_proxy("198.51.100.9").await;
        let (leaking, _) = echoing_proxy("198.51.100.9, 203.0.113.7").await;
        let records = [
            ProxyRecord::new("127.0.0.1", hiding, Protocol::Http),
            ProxyRecord::new("127.0.0.1", leaking, Protocol::Http),
        ];

        let config = ValidatorConfig::new()
            .with_echo_url(format!("{}/ip", server.url()))
            .with_timeout(TIMEOUT)
            .with_concurrency(2);
        let report = ProxyValidator::new(config).validate_all(&records).await.unwrap();

        direct.assert_async().await;
        assert_eq!(report.true_origin, "203.0.113.7");
        let statuses: Vec<_> = report.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            [ValidationStatus::LiveAnonymizing, ValidationStatus::LiveTransparent]
        );
        assert_eq!(report.results[0].observed_origin.as_deref(), Some("198.51.100.9"));
        assert!(report.results[1].latency_seconds.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let proxy = ProxyRecord::new("127.0.0.1", port, Protocol::Http);
        let probe = HttpOriginProbe::new("http://example.invalid/ip");
        let failure = probe.probe(Some(&proxy), TIMEOUT).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::ConnectError);
    }
}
