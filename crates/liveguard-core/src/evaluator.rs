//! Position and liveness classification of a single service result.

use serde::{Deserialize, Serialize};

use crate::detection::DetectionResult;
use crate::geometry::CaptureRegion;

/// Direction the user should move to re-centre their face in the guide,
/// expressed in video image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Classification of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    NoFace,
    MultipleFaces,
    Reposition { direction: Direction },
    TooFar,
    TooClose,
    NotLive { confidence: f64 },
    Live { confidence: f64 },
}

impl Verdict {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Maximum centre offset per axis, as a percentage of the guide half-extent.
    pub position_tolerance_pct: f64,
    /// Face/guide area ratio below which the face is too far away.
    pub min_area_ratio: f64,
    /// Face/guide area ratio above which the face is too close.
    pub max_area_ratio: f64,
    pub min_liveness_confidence: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            position_tolerance_pct: 50.0,
            min_area_ratio: 0.15,
            max_area_ratio: 0.85,
            min_liveness_confidence: 0.6,
        }
    }
}

/// Whether a service message reports more than one face in frame.
pub fn reports_multiple_faces(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("multiple face") || message.contains("more than one face")
}

/// Classify a detection result against the guide region.
///
/// Multiple faces short-circuit every other check. A missing face box is
/// `NoFace`. Position is checked before size, and liveness only once the
/// face sits correctly in the guide.
pub fn evaluate(
    region: &CaptureRegion,
    result: &DetectionResult,
    config: &EvaluatorConfig,
) -> Verdict {
    if result.face_count.is_some_and(|n| n > 1)
        || reports_multiple_faces(&result.message)
        || result
            .liveness_message
            .as_deref()
            .is_some_and(reports_multiple_faces)
    {
        return Verdict::MultipleFaces;
    }

    let Some(face) = result.face_rect else {
        return Verdict::NoFace;
    };

    let (half_w, half_h) = region.half_extents();
    if half_w <= 0.0 || half_h <= 0.0 {
        return Verdict::NoFace;
    }

    let (rx, ry) = region.center();
    let (fx, fy) = face.center();
    let dx = (fx - rx) / half_w * 100.0;
    let dy = (fy - ry) / half_h * 100.0;
    let tolerance = config.position_tolerance_pct;
    if dx.abs() > tolerance || dy.abs() > tolerance {
        // Correct the dominant axis first.
        let direction = if dx.abs() >= dy.abs() {
            if dx > 0.0 {
                Direction::Left
            } else {
                Direction::Right
            }
        } else if dy > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };
        return Verdict::Reposition { direction };
    }

    // Elliptical guide against a rectangular face box: an approximation.
    let area_ratio = face.area() / (std::f64::consts::PI * half_w * half_h);
    if area_ratio < config.min_area_ratio {
        return Verdict::TooFar;
    }
    if area_ratio > config.max_area_ratio {
        return Verdict::TooClose;
    }

    if result.is_live && result.confidence >= config.min_liveness_confidence {
        Verdict::Live {
            confidence: result.confidence,
        }
    } else {
        Verdict::NotLive {
            confidence: result.confidence,
        }
    }
}
