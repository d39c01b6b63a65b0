use std::path::{Path, PathBuf};
use std::time::Duration;

use liveguard_core::{DisplaySize, EvaluatorConfig, GuideConfig, SessionConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::bridge::BridgeKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: an optional TOML file named by `LIVEGUARD_CONFIG`,
/// overridden by `LIVEGUARD_*` environment variables. Read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Authentication service URL.
    pub endpoint: String,
    /// Directory of frames replayed as the video stream.
    pub frames_dir: PathBuf,
    /// On-screen size of the video element; defaults to the stream size.
    pub display: Option<DisplaySize>,
    pub guide: GuideConfig,
    pub evaluator: EvaluatorConfig,
    pub session: SessionConfig,
    /// Minimum delay between capture cycles.
    pub frame_interval_ms: u64,
    /// How often the capture region is recomputed without a resize.
    pub region_refresh_ms: u64,
    pub request_timeout_secs: u64,
    pub jpeg_quality: u8,
    /// Host bridge channels, highest priority first.
    pub bridge_order: Vec<BridgeKind>,
    pub bridge_webhook: Option<String>,
    /// Serve control on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/authenticate".to_string(),
            frames_dir: PathBuf::from("/var/lib/liveguard/frames"),
            display: None,
            guide: GuideConfig::default(),
            evaluator: EvaluatorConfig::default(),
            session: SessionConfig::default(),
            frame_interval_ms: 500,
            region_refresh_ms: 1000,
            request_timeout_secs: 10,
            jpeg_quality: 85,
            bridge_order: vec![BridgeKind::Dbus, BridgeKind::Webhook, BridgeKind::Stdout],
            bridge_webhook: None,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load the optional config file, then apply environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = match std::env::var("LIVEGUARD_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn with_env(self) -> Self {
        self.with_vars(&|key| std::env::var(key).ok())
    }

    /// Apply `LIVEGUARD_*` overrides read through `var`.
    fn with_vars(mut self, var: &dyn Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = var("LIVEGUARD_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(dir) = var("LIVEGUARD_FRAMES_DIR") {
            self.frames_dir = PathBuf::from(dir);
        }

        let width = parse_var::<f64>(var, "LIVEGUARD_DISPLAY_WIDTH");
        let height = parse_var::<f64>(var, "LIVEGUARD_DISPLAY_HEIGHT");
        if let (Some(width), Some(height)) = (width, height) {
            if width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0 {
                self.display = Some(DisplaySize { width, height });
            } else {
                tracing::warn!(width, height, "ignoring invalid display size");
            }
        }
        if let Some(fit) = parse_var(var, "LIVEGUARD_FIT") {
            self.guide.fit = fit;
        }

        self.frame_interval_ms =
            parse_var(var, "LIVEGUARD_FRAME_INTERVAL_MS").unwrap_or(self.frame_interval_ms);
        self.session.required_live_frames = parse_var(var, "LIVEGUARD_REQUIRED_LIVE_FRAMES")
            .unwrap_or(self.session.required_live_frames);
        self.evaluator.min_liveness_confidence = parse_var(var, "LIVEGUARD_MIN_CONFIDENCE")
            .unwrap_or(self.evaluator.min_liveness_confidence);
        if let Some(secs) = parse_var::<u64>(var, "LIVEGUARD_SESSION_TIMEOUT_SECS") {
            self.session.session_timeout_ms = secs.saturating_mul(1000);
        }
        self.request_timeout_secs =
            parse_var(var, "LIVEGUARD_REQUEST_TIMEOUT_SECS").unwrap_or(self.request_timeout_secs);
        self.jpeg_quality = parse_var(var, "LIVEGUARD_JPEG_QUALITY").unwrap_or(self.jpeg_quality);

        if let Some(order) = var("LIVEGUARD_BRIDGE_ORDER") {
            self.bridge_order = parse_bridge_order(&order);
        }
        if let Some(url) = var("LIVEGUARD_BRIDGE_WEBHOOK") {
            self.bridge_webhook = Some(url).filter(|u| !u.is_empty());
        }
        if var("LIVEGUARD_SESSION_BUS").is_some() {
            self.session_bus = true;
        }
        self
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Parse a comma-separated bridge list, skipping unknown names.
fn parse_bridge_order(value: &str) -> Vec<BridgeKind> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match s.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring bridge entry");
                None
            }
        })
        .collect()
}

fn parse_var<T: std::str::FromStr>(
    var: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveguard_core::FitMode;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.required_live_frames, 3);
        assert_eq!(config.session.session_timeout_ms, 20_000);
        assert_eq!(config.evaluator.min_liveness_confidence, 0.6);
        assert_eq!(config.frame_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            endpoint = "https://auth.example.com/authenticate"
            bridge_order = ["webhook", "stdout"]

            [guide]
            fit = "cover"

            [session]
            required_live_frames = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "https://auth.example.com/authenticate");
        assert_eq!(config.guide.fit, FitMode::Cover);
        assert_eq!(config.guide.max_fraction, 0.85);
        assert_eq!(config.session.required_live_frames, 5);
        assert_eq!(config.session.session_timeout_ms, 20_000);
        assert_eq!(config.bridge_order, vec![BridgeKind::Webhook, BridgeKind::Stdout]);
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(Config::from_toml("frame_interval_ms = \"fast\"").is_err());
    }

    #[test]
    fn test_missing_file_reported() {
        let err = Config::from_file(Path::new("/nonexistent/liveguard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bridge_order_skips_unknown() {
        assert_eq!(
            parse_bridge_order("stdout, fax ,dbus,"),
            vec![BridgeKind::Stdout, BridgeKind::Dbus]
        );
    }

    fn vars(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::default().with_vars(&|key| map.get(key).cloned())
    }

    #[test]
    fn test_env_overrides() {
        let config = vars(&[
            ("LIVEGUARD_ENDPOINT", "http://auth.local/authenticate"),
            ("LIVEGUARD_REQUIRED_LIVE_FRAMES", "5"),
            ("LIVEGUARD_SESSION_TIMEOUT_SECS", "30"),
            ("LIVEGUARD_DISPLAY_WIDTH", "640"),
            ("LIVEGUARD_DISPLAY_HEIGHT", "480"),
            ("LIVEGUARD_FIT", "cover"),
        ]);
        assert_eq!(config.endpoint, "http://auth.local/authenticate");
        assert_eq!(config.session.required_live_frames, 5);
        assert_eq!(config.session.session_timeout_ms, 30_000);
        assert_eq!(
            config.display,
            Some(DisplaySize {
                width: 640.0,
                height: 480.0
            })
        );
        assert_eq!(config.guide.fit, FitMode::Cover);
    }

    #[test]
    fn test_huge_session_timeout_saturates() {
        let config = vars(&[("LIVEGUARD_SESSION_TIMEOUT_SECS", &u64::MAX.to_string())]);
        assert_eq!(config.session.session_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_invalid_display_size_ignored() {
        for (w, h) in [("0", "480"), ("640", "-1"), ("NaN", "480"), ("inf", "480")] {
            let config = vars(&[
                ("LIVEGUARD_DISPLAY_WIDTH", w),
                ("LIVEGUARD_DISPLAY_HEIGHT", h),
            ]);
            assert_eq!(config.display, None, "{w}x{h}");
        }
    }
}
