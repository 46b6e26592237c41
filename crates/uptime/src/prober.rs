//! HTTP probe implementation.
//!
//! A probe is a single GET request. Any HTTP response, whatever its status
//! code, means the endpoint is reachable and the probe is `UP`. Only a
//! transport failure makes it `DOWN`.
//!
//! Latency is measured from just before the request is sent until the
//! response head has been received. The body is never read.

use crate::types::{ProbeOutcome, ProbeResult};
use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// User agent sent with every probe
pub const USER_AGENT: &str = "Uptime-Monitor/1.0";

/// Probe timeout used when none is configured
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect hops followed before giving up
pub const MAX_REDIRECTS: usize = 10;

/// Prober trait
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `url`, giving up after `timeout_duration`.
    ///
    /// Never fails: transport errors become a `DOWN` outcome.
    async fn probe(&self, url: &str, timeout_duration: Duration) -> ProbeOutcome;

    /// Get the name of this prober
    fn name(&self) -> &str;
}

/// Short classification of a failed probe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection error")]
    Connect,

    #[error("Too many redirects")]
    Redirect,

    #[error("Invalid URL")]
    InvalidUrl,

    #[error("Request failed: {0}")]
    Request(String),
}

impl ProbeError {
    /// Map a reqwest error onto a classification
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else if err.is_connect() {
            ProbeError::Connect
        } else if err.is_redirect() {
            ProbeError::Redirect
        } else if err.is_builder() {
            ProbeError::InvalidUrl
        } else {
            // Only the top-level message, never the source chain.
            let message = err.to_string();
            let first_line = message.lines().next().unwrap_or("unknown error");
            ProbeError::Request(first_line.to_string())
        }
    }
}

/// HTTP GET prober
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Create a new HTTP prober
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout_duration: Duration) -> ProbeOutcome {
        let request = self.client.get(url).timeout(timeout_duration);
        let start = Instant::now();

        let result = match timeout(timeout_duration, request.send()).await {
            Ok(Ok(response)) => {
                let elapsed = start.elapsed();
                let latency_ms = elapsed.as_secs_f64() * 1000.0;
                debug!(url, status = response.status().as_u16(), latency_ms, "Probe answered");
                ProbeResult::Up { latency_ms }
            }
            Ok(Err(e)) => {
                let classified = ProbeError::classify(&e);
                warn!(url, error = %e, classification = %classified, "Probe failed");
                ProbeResult::Down {
                    error: classified.to_string(),
                }
            }
            Err(_) => {
                warn!(url, timeout_ms = timeout_duration.as_millis() as u64, "Probe timed out");
                ProbeResult::Down {
                    error: ProbeError::Timeout.to_string(),
                }
            }
        };

        ProbeOutcome {
            checked_at: Utc::now(),
            result,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckStatus;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex;

    /// Read one request head from the socket
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve one canned response per connection, recording request heads
    async fn serve(responses: Vec<String>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let head = read_request(&mut stream).await;
                seen.lock().await.push(head);
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (addr, requests)
    }

    fn response(status_line: &str, extra_headers: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
            status_line, extra_headers
        )
    }

    #[tokio::test]
    async fn test_server_error_counts_as_up() {
        let (addr, _) = serve(vec![response("500 Internal Server Error", "")]).await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober
            .probe(&format!("http://{}/health", addr), Duration::from_secs(2))
            .await;

        assert_eq!(outcome.result.status(), CheckStatus::Up);
        let latency = outcome.result.latency_ms().expect("latency recorded");
        assert!(latency >= 0.0);
        assert!(outcome.result.error().is_none());
    }

    #[tokio::test]
    async fn test_not_found_counts_as_up() {
        let (addr, _) = serve(vec![response("404 Not Found", "")]).await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober
            .probe(&format!("http://{}/missing", addr), Duration::from_secs(2))
            .await;

        assert_eq!(outcome.result.status(), CheckStatus::Up);
    }

    #[tokio::test]
    async fn test_connection_refused_is_down() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HttpProber::new().unwrap();
        let outcome = prober
            .probe(&format!("http://{}/", addr), Duration::from_secs(2))
            .await;

        assert_eq!(outcome.result.status(), CheckStatus::Down);
        assert_eq!(outcome.result.error(), Some("Connection error"));
        assert!(outcome.result.latency_ms().is_none());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let prober = HttpProber::new().unwrap();
        let start = Instant::now();
        let outcome = prober
            .probe(&format!("http://{}/", addr), Duration::from_millis(200))
            .await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.result.status(), CheckStatus::Down);
        assert_eq!(outcome.result.error(), Some("Request timeout"));
    }

    #[tokio::test]
    async fn test_follows_redirects_with_user_agent() {
        let (addr, requests) = serve(vec![
            response("302 Found", "Location: /final\r\n"),
            response("200 OK", ""),
        ])
        .await;

        let prober = HttpProber::new().unwrap();
        let outcome = prober
            .probe(&format!("http://{}/start", addr), Duration::from_secs(2))
            .await;

        assert_eq!(outcome.result.status(), CheckStatus::Up);

        let requests = requests.lock().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("GET /final"));
        for head in requests.iter() {
            assert!(head.to_lowercase().contains("user-agent: uptime-monitor/1.0"));
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_down() {
        let prober = HttpProber::new().unwrap();
        let outcome = prober.probe("not a url", Duration::from_secs(1)).await;

        assert_eq!(outcome.result.status(), CheckStatus::Down);
        assert!(outcome.result.error().is_some());
    }
}
