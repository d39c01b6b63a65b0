use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use liveguard_core::{
    compute_region, evaluate, CaptureRegion, DisplaySize, EvaluatorConfig, FitMode, GuideConfig,
    ServiceReply, VideoSize,
};
use tracing_subscriber::EnvFilter;

#[zbus::proxy(
    interface = "org.liveguard.Session1",
    default_service = "org.liveguard.Session1",
    default_path = "/org/liveguard/Session1"
)]
trait Session {
    fn status(&self) -> zbus::Result<String>;
    fn retry(&self) -> zbus::Result<bool>;
    fn reset(&self) -> zbus::Result<bool>;
    fn switch_method(&self, method: &str) -> zbus::Result<bool>;
    fn resize(&self, width: f64, height: f64) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "liveguard", version, about = "Face capture session tools")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute the capture region for a video and display size
    Region {
        /// Intrinsic video size, e.g. 1280x720
        #[arg(long, value_parser = parse_size)]
        video: (f64, f64),
        /// On-screen size of the video element; defaults to the video size
        #[arg(long, value_parser = parse_size)]
        display: Option<(f64, f64)>,
        /// How the video is fitted into its element (contain|cover)
        #[arg(long, default_value = "contain")]
        fit: FitMode,
    },
    /// Classify a saved service reply against a capture region
    Evaluate {
        /// Capture region as x,y,width,height
        #[arg(long, value_parser = parse_region)]
        region: CaptureRegion,
        /// JSON file holding the service reply
        #[arg(long)]
        response: PathBuf,
        /// Minimum liveness confidence
        #[arg(long, default_value_t = 0.6)]
        min_confidence: f64,
    },
    /// Print the running session's status
    Status,
    /// Start a new session after an error or timeout
    Retry,
    /// Discard the running session and start over
    Reset,
    /// Abandon face capture in favour of another method
    SwitchMethod {
        /// Method name passed to the host (e.g. pin, password)
        method: String,
    },
    /// Tell the daemon the video element was resized
    Resize { width: f64, height: f64 },
}

fn parse_size(s: &str) -> Result<(f64, f64), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
    Ok((w, h))
}

fn parse_region(s: &str) -> Result<CaptureRegion, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bad region '{s}': {e}"))?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(CaptureRegion {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        }),
        _ => Err(format!("expected x,y,width,height, got '{s}'")),
    }
}

fn bus_label(session_bus: bool) -> &'static str {
    if session_bus {
        "session"
    } else {
        "system"
    }
}

async fn proxy(session_bus: bool) -> Result<SessionProxy<'static>> {
    tracing::debug!(
        bus = bus_label(session_bus),
        service = "org.liveguard.Session1",
        "connecting to liveguardd"
    );
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    SessionProxy::new(&conn)
        .await
        .context("liveguardd is not running")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Region {
            video,
            display,
            fit,
        } => {
            if video.0 < 0.0 || video.1 < 0.0 || video.0.fract() != 0.0 || video.1.fract() != 0.0 {
                bail!("video size must be whole pixels");
            }
            let video = VideoSize {
                width: video.0 as u32,
                height: video.1 as u32,
            };
            let display = display
                .map(|(width, height)| DisplaySize { width, height })
                .unwrap_or(DisplaySize {
                    width: f64::from(video.width),
                    height: f64::from(video.height),
                });
            let guide = GuideConfig {
                fit,
                ..GuideConfig::default()
            };
            let region = compute_region(video, display, &guide)?;
            print_json(&region)?;
        }
        Command::Evaluate {
            region,
            response,
            min_confidence,
        } => {
            tracing::debug!(path = %response.display(), ?region, "evaluating stored reply");
            let body = std::fs::read(&response)
                .with_context(|| format!("failed to read {}", response.display()))?;
            let config = EvaluatorConfig {
                min_liveness_confidence: min_confidence,
                ..EvaluatorConfig::default()
            };
            match ServiceReply::from_slice(&body) {
                ServiceReply::Detection(result) => {
                    print_json(&evaluate(&region, &result, &config))?;
                }
                ServiceReply::Rejected { message, fatal } => {
                    print_json(&serde_json::json!({
                        "verdict": "rejected",
                        "message": message,
                        "fatal": fatal,
                    }))?;
                }
            }
        }
        Command::Status => {
            let json = proxy(cli.session_bus).await?.status().await?;
            let value: serde_json::Value = serde_json::from_str(&json)?;
            print_json(&value)?;
        }
        Command::Retry => {
            proxy(cli.session_bus).await?.retry().await?;
            println!("session restarted");
        }
        Command::Reset => {
            proxy(cli.session_bus).await?.reset().await?;
            println!("session reset");
        }
        Command::SwitchMethod { method } => {
            proxy(cli.session_bus).await?.switch_method(&method).await?;
            println!("switched to {method}");
        }
        Command::Resize { width, height } => {
            proxy(cli.session_bus).await?.resize(width, height).await?;
            println!("display resized to {width}x{height}");
        }
    }

    Ok(())
}
