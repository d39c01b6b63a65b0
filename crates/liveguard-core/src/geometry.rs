//! Capture-region geometry.
//!
//! The oval guide is laid out relative to the on-screen video element, but
//! frames are captured at the stream's intrinsic resolution. This module maps
//! the guide from display space into video pixel space, accounting for the
//! scale factor and the letterbox (or crop) offset introduced by the element's
//! fit mode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum GeometryError {
    #[error("video stream not ready: intrinsic size {width}x{height}")]
    NotReady { width: u32, height: u32 },
    #[error("display element has no size: {width}x{height}")]
    NoDisplay { width: f64, height: f64 },
}

/// The guide rectangle, in video pixel coordinates.
///
/// Always fully contained in `[0, video_width) x [0, video_height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn half_extents(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Whether the region lies inside a `width x height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Intrinsic stream dimensions, as reported once metadata has loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

/// On-screen size of the element displaying the video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

/// How the video is fitted into its display element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Whole frame visible, letterboxed or pillarboxed.
    #[default]
    Contain,
    /// Element fully covered, frame cropped on the overflowing axis.
    Cover,
}

impl std::str::FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contain" => Ok(Self::Contain),
            "cover" => Ok(Self::Cover),
            other => Err(format!("unknown fit mode '{other}' (expected contain|cover)")),
        }
    }
}

/// Guide sizing and placement ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideConfig {
    /// Guide height as a fraction of the video height.
    pub height_ratio: f64,
    /// Guide width divided by guide height (face aspect).
    pub aspect_ratio: f64,
    /// Upper bound for either guide dimension, as a fraction of the video dimension.
    pub max_fraction: f64,
    /// Guide centre, as a fraction of the display width.
    pub center_x_ratio: f64,
    /// Guide centre, as a fraction of the display height.
    pub center_y_ratio: f64,
    pub fit: FitMode,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            height_ratio: 0.72,
            aspect_ratio: 0.78,
            max_fraction: 0.85,
            center_x_ratio: 0.5,
            center_y_ratio: 0.5,
            fit: FitMode::Contain,
        }
    }
}

/// Scale and offset mapping display coordinates onto the video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DisplayMapping {
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl DisplayMapping {
    fn new(video: VideoSize, display: DisplaySize, fit: FitMode) -> Self {
        let sx = display.width / video.width as f64;
        let sy = display.height / video.height as f64;
        let scale = match fit {
            FitMode::Contain => sx.min(sy),
            FitMode::Cover => sx.max(sy),
        };
        // Negative under Cover: the frame overflows the element.
        let offset_x = (display.width - video.width as f64 * scale) / 2.0;
        let offset_y = (display.height - video.height as f64 * scale) / 2.0;
        Self {
            scale,
            offset_x,
            offset_y,
        }
    }

    fn to_video(self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }
}

/// Compute the capture region for the current stream and display sizes.
///
/// Returns [`GeometryError::NotReady`] while the stream has no intrinsic size;
/// callers retry on the next tick rather than capturing a degenerate region.
pub fn compute_region(
    video: VideoSize,
    display: DisplaySize,
    config: &GuideConfig,
) -> Result<CaptureRegion, GeometryError> {
    if video.width == 0 || video.height == 0 {
        return Err(GeometryError::NotReady {
            width: video.width,
            height: video.height,
        });
    }
    if !(display.width.is_finite() && display.height.is_finite())
        || display.width <= 0.0
        || display.height <= 0.0
    {
        return Err(GeometryError::NoDisplay {
            width: display.width,
            height: display.height,
        });
    }

    let vw = video.width as f64;
    let vh = video.height as f64;
    let max_fraction = config.max_fraction.clamp(0.0, 1.0);
    let max_w = (vw * max_fraction).floor();
    let max_h = (vh * max_fraction).floor();

    let mut height = vh * config.height_ratio.max(0.0);
    let mut width = height * config.aspect_ratio.max(0.0);
    if width > max_w {
        width = max_w;
    }
    if height > max_h {
        height = max_h;
    }
    let width = width.floor();
    let height = height.floor();
    if width < 1.0 || height < 1.0 {
        return Err(GeometryError::NotReady {
            width: video.width,
            height: video.height,
        });
    }

    let mapping = DisplayMapping::new(video, display, config.fit);
    let (cx, cy) = mapping.to_video(
        display.width * config.center_x_ratio,
        display.height * config.center_y_ratio,
    );

    let x = (cx - width / 2.0).round().clamp(0.0, vw - width);
    let y = (cy - height / 2.0).round().clamp(0.0, vh - height);

    Ok(CaptureRegion {
        x: x as u32,
        y: y as u32,
        width: width as u32,
        height: height as u32,
    })
}

/// Caches the last computed region and decides when it must be recomputed:
/// on metadata load, on display resize, and once per refresh period.
#[derive(Debug, Clone)]
pub struct RegionTracker {
    config: GuideConfig,
    refresh_ms: u64,
    video: Option<VideoSize>,
    display: Option<DisplaySize>,
    region: Option<CaptureRegion>,
    computed_at: Option<u64>,
}

impl RegionTracker {
    pub fn new(config: GuideConfig, refresh_ms: u64) -> Self {
        Self {
            config,
            refresh_ms,
            video: None,
            display: None,
            region: None,
            computed_at: None,
        }
    }

    pub fn on_metadata(&mut self, video: VideoSize) {
        self.video = Some(video);
        self.computed_at = None;
    }

    pub fn on_resize(&mut self, display: DisplaySize) {
        self.display = Some(display);
        self.computed_at = None;
    }

    pub fn video(&self) -> Option<VideoSize> {
        self.video
    }

    /// Current region, recomputing if stale.
    pub fn region(&mut self, now_ms: u64) -> Result<CaptureRegion, GeometryError> {
        let fresh = matches!(
            (self.region, self.computed_at),
            (Some(_), Some(at)) if now_ms.saturating_sub(at) < self.refresh_ms
        );
        if fresh {
            if let Some(region) = self.region {
                return Ok(region);
            }
        }

        let video = self.video.unwrap_or(VideoSize {
            width: 0,
            height: 0,
        });
        // Without a display size, assume the element matches the stream.
        let display = self.display.unwrap_or(DisplaySize {
            width: video.width as f64,
            height: video.height as f64,
        });
        let region = compute_region(video, display, &self.config)?;
        if self.region != Some(region) {
            tracing::debug!(?region, "capture region updated");
        }
        self.region = Some(region);
        self.computed_at = Some(now_ms);
        Ok(region)
    }
}
