use std::time::Duration;

use async_trait::async_trait;
use liveguard_capture::FrameSample;
use liveguard_core::{CaptureRegion, ServiceReply};
use serde::Serialize;
use thiserror::Error;

/// Per-frame transport failures. All of them are recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
}

/// Body of `POST /authenticate`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// JPEG data URI.
    pub image: &'a str,
    pub oval_guide: CaptureRegion,
    #[serde(rename = "sessionId")]
    pub session_id: &'a str,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl<'a> AuthRequest<'a> {
    pub fn new(sample: &'a FrameSample, session_id: &'a str, timestamp: i64) -> Self {
        Self {
            image: &sample.image_data,
            oval_guide: sample.region,
            session_id,
            timestamp,
        }
    }
}

/// Sends captured frames to the authentication service.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest<'_>) -> Result<ServiceReply, TransportError>;
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn network_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn authenticate(&self, request: &AuthRequest<'_>) -> Result<ServiceReply, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(network_error)?;
        Ok(ServiceReply::from_slice(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveguard_core::DetectionResult;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with `status` and `body`; yields the request body.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/authenticate", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let request_body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + length {
                        break text[split + 4..split + 4 + length].to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request_body
        });
        (url, handle)
    }

    fn sample() -> FrameSample {
        FrameSample {
            image_data: "data:image/jpeg;base64,AAAA".to_string(),
            region: CaptureRegion {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
            },
            captured_at_ms: 0,
            width: 10,
            height: 10,
        }
    }

    #[tokio::test]
    async fn test_posts_frame_and_parses_reply() {
        let (url, server) =
            serve_once("200 OK", r#"{"is_live": true, "confidence": 0.8, "message": "ok"}"#).await;
        let transport = HttpTransport::new(url, Duration::from_secs(5));
        let sample = sample();
        let reply = transport
            .authenticate(&AuthRequest::new(&sample, "session-1", 42))
            .await
            .unwrap();

        match reply {
            ServiceReply::Detection(DetectionResult { is_live, .. }) => assert!(is_live),
            other => panic!("unexpected reply: {other:?}"),
        }

        let sent: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sent["sessionId"], "session-1");
        assert_eq!(sent["oval_guide"]["height"], 4);
        assert_eq!(sent["timestamp"], 42);
        assert!(sent["image"].as_str().unwrap().starts_with("data:image/jpeg"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let (url, _server) = serve_once("503 Service Unavailable", "{}").await;
        let transport = HttpTransport::new(url, Duration::from_secs(5));
        let sample = sample();
        let err = transport
            .authenticate(&AuthRequest::new(&sample, "s", 0))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Status(503));
    }

    #[tokio::test]
    async fn test_error_field_is_rejection() {
        let (url, _server) = serve_once("200 OK", r#"{"error": "multiple faces detected"}"#).await;
        let transport = HttpTransport::new(url, Duration::from_secs(5));
        let sample = sample();
        let reply = transport
            .authenticate(&AuthRequest::new(&sample, "s", 0))
            .await
            .unwrap();
        assert!(matches!(reply, ServiceReply::Rejected { fatal: false, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/authenticate", listener.local_addr().unwrap());
        drop(listener);
        let transport = HttpTransport::new(url, Duration::from_secs(2));
        let sample = sample();
        let err = transport
            .authenticate(&AuthRequest::new(&sample, "s", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_) | TransportError::Timeout));
    }
}
