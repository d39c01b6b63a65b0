//! Replies from the remote authentication service.
//!
//! Everything here is untrusted input. Parsing never fails: unknown shapes,
//! wrong types and out-of-range values degrade to "no face" rather than
//! surfacing as errors in the capture loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Face bounding box reported by the service, in video pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceRect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    fn from_json(value: &Value) -> Option<Self> {
        let rect = match value {
            Value::Object(_) => Self {
                x: number(value, &["x", "left"])?,
                y: number(value, &["y", "top"])?,
                width: number(value, &["width", "w"])?,
                height: number(value, &["height", "h"])?,
            },
            // [x, y, width, height]
            Value::Array(items) if items.len() == 4 => Self {
                x: items[0].as_f64()?,
                y: items[1].as_f64()?,
                width: items[2].as_f64()?,
                height: items[3].as_f64()?,
            },
            _ => return None,
        };
        let finite = [rect.x, rect.y, rect.width, rect.height]
            .iter()
            .all(|v| v.is_finite());
        (finite && rect.width > 0.0 && rect.height > 0.0).then_some(rect)
    }
}

/// One liveness/detection result for a submitted frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    pub is_live: bool,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub message: String,
    pub liveness_message: Option<String>,
    pub face_rect: Option<FaceRect>,
    /// Number of faces the service saw, when it reports one.
    pub face_count: Option<u32>,
    pub recognized_name: Option<String>,
}

impl DetectionResult {
    /// Leniently extract a result from an arbitrary JSON value.
    pub fn from_json(value: &Value) -> Self {
        let confidence = number(value, &["confidence", "score"])
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        Self {
            is_live: boolean(value, &["is_live", "isLive"]).unwrap_or(false),
            confidence,
            message: string(value, &["message"]).unwrap_or_default(),
            liveness_message: string(value, &["liveness_message", "livenessMessage"]),
            face_rect: field(value, &["face_rect", "faceRect"]).and_then(FaceRect::from_json),
            face_count: number(value, &["face_count", "faceCount"])
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(|n| n as u32),
            recognized_name: string(value, &["recognized_name", "recognizedName"])
                .filter(|name| !name.trim().is_empty()),
        }
    }
}

/// Outcome of one round-trip to the authentication service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply {
    Detection(DetectionResult),
    /// The service answered with a structured `error` field.
    Rejected { message: String, fatal: bool },
}

impl ServiceReply {
    pub fn from_json(value: &Value) -> Self {
        if let Some(error) = field(value, &["error"]).filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s.clone(),
                Value::Object(_) => string(error, &["message"]).unwrap_or_else(|| error.to_string()),
                other => other.to_string(),
            };
            let fatal = boolean(value, &["fatal"]).unwrap_or(false);
            return Self::Rejected { message, fatal };
        }
        Self::Detection(DetectionResult::from_json(value))
    }

    /// Parse a raw body; anything that is not JSON reads as an empty detection.
    pub fn from_slice(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::from_json(&value),
            Err(e) => {
                tracing::debug!(error = %e, "unparseable service reply treated as no face");
                Self::Detection(DetectionResult::default())
            }
        }
    }
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(*k))
}

fn number(value: &Value, keys: &[&str]) -> Option<f64> {
    match field(value, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(value: &Value, keys: &[&str]) -> Option<bool> {
    match field(value, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        _ => None,
    }
}

fn string(value: &Value, keys: &[&str]) -> Option<String> {
    match field(value, keys)? {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snake_case_reply() {
        let result = DetectionResult::from_json(&json!({
            "is_live": true,
            "confidence": 0.91,
            "message": "ok",
            "recognized_name": "Dana",
            "face_rect": {"x": 10, "y": 20, "width": 100, "height": 120}
        }));
        assert!(result.is_live);
        assert!((result.confidence - 0.91).abs() < 1e-9);
        assert_eq!(result.recognized_name.as_deref(), Some("Dana"));
        assert_eq!(result.face_rect.unwrap().area(), 12_000.0);
    }

    #[test]
    fn test_camel_case_reply() {
        let result = DetectionResult::from_json(&json!({
            "isLive": "true",
            "confidence": "0.7",
            "faceRect": [0, 0, 50, 60],
            "faceCount": 1
        }));
        assert!(result.is_live);
        assert_eq!(result.face_count, Some(1));
        assert!(result.face_rect.is_some());
    }

    #[test]
    fn test_missing_fields_default_to_no_face() {
        let result = DetectionResult::from_json(&json!({}));
        assert!(!result.is_live);
        assert_eq!(result.confidence, 0.0);
        assert!(result.face_rect.is_none());
    }

    #[test]
    fn test_malformed_fields_are_dropped() {
        let result = DetectionResult::from_json(&json!({
            "is_live": [1, 2],
            "confidence": 7.5,
            "face_rect": {"x": 1, "y": 2, "width": -4, "height": 10},
            "recognized_name": "  "
        }));
        assert!(!result.is_live);
        assert_eq!(result.confidence, 1.0);
        assert!(result.face_rect.is_none());
        assert!(result.recognized_name.is_none());
    }

    #[test]
    fn test_error_field_is_rejection() {
        let reply = ServiceReply::from_json(&json!({"error": "multiple faces detected"}));
        assert_eq!(
            reply,
            ServiceReply::Rejected {
                message: "multiple faces detected".to_string(),
                fatal: false
            }
        );

        let reply = ServiceReply::from_json(&json!({"error": {"message": "model offline"}, "fatal": true}));
        assert!(matches!(reply, ServiceReply::Rejected { fatal: true, .. }));
    }

    #[test]
    fn test_null_error_is_not_rejection() {
        let reply = ServiceReply::from_json(&json!({"error": null, "is_live": true}));
        assert!(matches!(reply, ServiceReply::Detection(d) if d.is_live));
    }

    #[test]
    fn test_garbage_body_is_empty_detection() {
        let reply = ServiceReply::from_slice(b"<html>502</html>");
        assert_eq!(reply, ServiceReply::Detection(DetectionResult::default()));
    }
}
