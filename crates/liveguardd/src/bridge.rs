//! Host-shell bridge.
//!
//! Terminal outcomes are relayed to whatever embeds the capture front end
//! (a mobile shell, a desktop session, a parent process). The available
//! channels are probed once at startup in a configured priority order, and
//! the first one that resolves is used for the daemon's lifetime. Delivery
//! is fire-and-forget.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dbus_interface::{SessionService, OBJECT_PATH};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stdout write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification sent to the host shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeEvent {
    Success {
        name: Option<String>,
        message: String,
        timestamp: String,
    },
    Error {
        message: String,
        timestamp: String,
    },
    Timeout {
        message: String,
        timestamp: String,
    },
    SwitchAuth {
        method: String,
        timestamp: String,
    },
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl BridgeEvent {
    pub fn success(name: Option<String>) -> Self {
        Self::Success {
            name,
            message: "authenticated".to_string(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn timeout() -> Self {
        Self::Timeout {
            message: "session timed out".to_string(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn switch_auth(method: impl Into<String>) -> Self {
        Self::SwitchAuth {
            method: method.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Kinds of host channel, in the order they may be configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeKind {
    Dbus,
    Webhook,
    Stdout,
}

impl std::str::FromStr for BridgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dbus" => Ok(Self::Dbus),
            "webhook" => Ok(Self::Webhook),
            "stdout" => Ok(Self::Stdout),
            other => Err(format!("unknown bridge '{other}'")),
        }
    }
}

/// One way of reaching the host shell.
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, event: &BridgeEvent) -> Result<(), BridgeError>;
}

/// Emits the `Outcome` signal on the daemon's D-Bus object.
pub struct DbusBridge {
    conn: zbus::Connection,
}

impl DbusBridge {
    pub fn new(conn: zbus::Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl BridgeAdapter for DbusBridge {
    fn name(&self) -> &'static str {
        "dbus"
    }

    async fn send(&self, event: &BridgeEvent) -> Result<(), BridgeError> {
        let payload = event.to_json()?;
        let emitter = zbus::object_server::SignalEmitter::new(&self.conn, OBJECT_PATH)?;
        SessionService::outcome(&emitter, &payload).await?;
        Ok(())
    }
}

/// POSTs events to a host-provided URL without waiting for the response.
pub struct WebhookBridge {
    client: reqwest::Client,
    url: String,
}

impl WebhookBridge {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl BridgeAdapter for WebhookBridge {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &BridgeEvent) -> Result<(), BridgeError> {
        let request = self.client.post(&self.url).json(event);
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                tracing::warn!(url, error = %e, "webhook delivery failed");
            }
        });
        Ok(())
    }
}

/// Writes one JSON line per event, for a parent process reading our stdout.
pub struct StdoutBridge;

#[async_trait]
impl BridgeAdapter for StdoutBridge {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn send(&self, event: &BridgeEvent) -> Result<(), BridgeError> {
        let line = event.to_json()?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// The resolved host channel, if any.
pub struct Bridge {
    adapter: Option<Box<dyn BridgeAdapter>>,
}

impl Bridge {
    pub fn new(adapter: Option<Box<dyn BridgeAdapter>>) -> Self {
        Self { adapter }
    }

    /// Pick the first channel in `order` that is available.
    pub fn resolve(
        order: &[BridgeKind],
        dbus: Option<&zbus::Connection>,
        webhook: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let adapter = order.iter().find_map(|kind| -> Option<Box<dyn BridgeAdapter>> {
            match kind {
                BridgeKind::Dbus => dbus.map(|conn| {
                    Box::new(DbusBridge::new(conn.clone())) as Box<dyn BridgeAdapter>
                }),
                BridgeKind::Webhook => webhook.map(|url| {
                    Box::new(WebhookBridge::new(url, timeout)) as Box<dyn BridgeAdapter>
                }),
                BridgeKind::Stdout => Some(Box::new(StdoutBridge)),
            }
        });
        match &adapter {
            Some(a) => tracing::info!(bridge = a.name(), "host bridge resolved"),
            None => tracing::info!("no host bridge available, outcomes are logged locally"),
        }
        Self { adapter }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.adapter.as_ref().map(|a| a.name())
    }

    /// Relay an event. Never fails: delivery problems are logged.
    pub async fn relay(&self, event: BridgeEvent) {
        match &self.adapter {
            Some(adapter) => {
                if let Err(e) = adapter.send(&event).await {
                    tracing::warn!(bridge = adapter.name(), error = %e, ?event, "bridge delivery failed");
                } else {
                    tracing::debug!(bridge = adapter.name(), ?event, "outcome relayed");
                }
            }
            None => tracing::info!(?event, "outcome (no host bridge)"),
        }
    }
}
