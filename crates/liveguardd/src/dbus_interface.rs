use liveguard_core::DisplaySize;
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::engine::{EngineError, EngineHandle};

pub const BUS_NAME: &str = "org.liveguard.Session1";
pub const OBJECT_PATH: &str = "/org/liveguard/Session1";

/// D-Bus control surface for the capture daemon.
///
/// Bus name: org.liveguard.Session1
/// Object path: /org/liveguard/Session1
pub struct SessionService {
    pub engine: EngineHandle,
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %e, "session request failed");
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.liveguard.Session1")]
impl SessionService {
    /// Current session snapshot and visible view, as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(failed)?;
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Start a new session after an error or timeout.
    async fn retry(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("retry requested");
        self.engine.retry().await.map_err(failed)?;
        Ok(true)
    }

    /// Discard the running session and start over.
    async fn reset(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("reset requested");
        self.engine.reset().await.map_err(failed)?;
        Ok(true)
    }

    /// Give up on face capture; the host is told to use `method` instead.
    async fn switch_method(&self, method: &str) -> zbus::fdo::Result<bool> {
        let method = method.trim();
        if method.is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "method must not be empty".to_string(),
            ));
        }
        self.engine
            .switch_method(method.to_string())
            .await
            .map_err(failed)?;
        Ok(true)
    }

    /// The video element changed size on screen.
    async fn resize(&self, width: f64, height: f64) -> zbus::fdo::Result<bool> {
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "invalid display size {width}x{height}"
            )));
        }
        self.engine
            .resize(DisplaySize { width, height })
            .await
            .map_err(failed)?;
        Ok(true)
    }

    /// Terminal outcome for the host shell, as JSON.
    #[zbus(signal)]
    pub async fn outcome(emitter: &SignalEmitter<'_>, event: &str) -> zbus::Result<()>;
}
