use anyhow::{Context, Result};
use liveguard_capture::{FrameCapturer, ImageSequenceSource};
use tracing_subscriber::EnvFilter;

mod backoff;
mod bridge;
mod config;
mod dbus_interface;
mod engine;
mod presenter;
mod transport;

use bridge::{Bridge, BridgeKind};
use config::Config;
use dbus_interface::{SessionService, BUS_NAME, OBJECT_PATH};
use engine::EngineConfig;
use transport::HttpTransport;

async fn connect_bus(session_bus: bool) -> zbus::Result<zbus::Connection> {
    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    builder.name(BUS_NAME)?.build().await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("liveguardd starting");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        endpoint = %config.endpoint,
        frames_dir = %config.frames_dir.display(),
        required_live_frames = config.session.required_live_frames,
        timeout_ms = config.session.session_timeout_ms,
        "configuration loaded"
    );

    // Camera unavailable at startup is unrecoverable.
    let source = ImageSequenceSource::open(&config.frames_dir)
        .context("failed to open video source")?;
    let capturer = FrameCapturer::new(source, config.jpeg_quality);

    let wants_dbus = config.bridge_order.contains(&BridgeKind::Dbus);
    let conn = match connect_bus(config.session_bus).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable, control interface disabled");
            None
        }
    };

    let bridge = Bridge::resolve(
        &config.bridge_order,
        conn.as_ref().filter(|_| wants_dbus),
        config.bridge_webhook.as_deref(),
        config.request_timeout(),
    );
    let transport = HttpTransport::new(config.endpoint.clone(), config.request_timeout());
    tracing::info!(endpoint = transport.endpoint(), "transport ready");

    let engine = engine::spawn_engine(
        EngineConfig {
            session: config.session.clone(),
            evaluator: config.evaluator.clone(),
            guide: config.guide.clone(),
            display: config.display,
            frame_interval: config.frame_interval(),
            region_refresh_ms: config.region_refresh_ms,
        },
        capturer,
        transport,
        bridge,
        Box::new(presenter::LogPresenter),
    );

    if let Some(conn) = &conn {
        conn.object_server()
            .at(
                OBJECT_PATH,
                SessionService {
                    engine: engine.clone(),
                },
            )
            .await
            .context("failed to register D-Bus interface")?;
        tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
    }

    tracing::info!("liveguardd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("liveguardd shutting down");
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "engine already stopped");
    }

    Ok(())
}
