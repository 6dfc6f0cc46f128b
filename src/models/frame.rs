//! Frame and face detection records

use serde::Serialize;
use serde_json::Value;

/// One timestamped detection report from a player/camera.
///
/// Identity is structural: a frame carries no persisted id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub timestamp: i64,
    #[serde(rename = "playerUUID")]
    pub player_uuid: Option<String>,
    pub camera_id: Option<String>,
    pub img_width: Option<i64>,
    pub img_height: Option<i64>,
    pub face_detections: Vec<FaceDetection>,
}

impl Frame {
    /// Decode a frame from raw JSON.
    ///
    /// `timestamp` is the only mandatory field; everything else defaults
    /// to absent. Returns `None` when the record cannot be a frame at all.
    /// Any inline image payload is dropped here and never travels further.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let timestamp = obj.get("timestamp").and_then(Value::as_i64)?;

        let face_detections = obj
            .get("faceDetections")
            .and_then(Value::as_array)
            .map(|faces| faces.iter().map(FaceDetection::from_value).collect())
            .unwrap_or_default();

        Some(Self {
            timestamp,
            player_uuid: string_field(obj.get("playerUUID")),
            camera_id: string_field(obj.get("cameraId")),
            img_width: obj.get("imgWidth").and_then(Value::as_i64),
            img_height: obj.get("imgHeight").and_then(Value::as_i64),
            face_detections,
        })
    }
}

/// One detected face within a frame.
///
/// All numeric fields are optional; absence means "unknown", not zero.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDetection {
    #[serde(rename = "faceID", skip_serializing_if = "Option::is_none")]
    pub face_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion_confidence: Option<f64>,
    /// Raw glasses value as reported by the camera (int, bool or string).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glasses: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glasses_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_time_seen: Option<i64>,
    /// Raw "last seen" flag as reported by the camera.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_last_time_seen: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl FaceDetection {
    /// Decode a face record from raw JSON. Never fails: a non-object
    /// produces an empty face, bad fields produce absent fields.
    pub fn from_value(raw: &Value) -> Self {
        let obj = match raw.as_object() {
            Some(o) => o,
            None => return Self::default(),
        };

        Self {
            face_id: obj.get("faceID").and_then(Value::as_i64),
            age: obj.get("age").and_then(Value::as_i64),
            age_confidence: obj.get("ageConfidence").and_then(Value::as_f64),
            gender: obj.get("gender").and_then(Value::as_i64),
            gender_confidence: obj.get("genderConfidence").and_then(Value::as_f64),
            dwell_time: obj.get("dwellTime").and_then(Value::as_f64),
            attention_time: obj.get("attentionTime").and_then(Value::as_f64),
            emotion: obj.get("emotion").and_then(Value::as_i64),
            emotion_confidence: obj.get("emotionConfidence").and_then(Value::as_f64),
            glasses: obj.get("glasses").cloned(),
            glasses_confidence: obj.get("glassesConfidence").and_then(Value::as_f64),
            first_time_seen: obj.get("firstTimeSeen").and_then(Value::as_i64),
            is_last_time_seen: obj.get("isLastTimeSeen").cloned(),
            x: obj.get("x").and_then(Value::as_f64),
            y: obj.get("y").and_then(Value::as_f64),
            width: obj.get("width").and_then(Value::as_f64),
            height: obj.get("height").and_then(Value::as_f64),
        }
    }

    /// Normalized glasses code: 1 = with, 0 = without, None = unknown.
    pub fn glasses_code(&self) -> Option<i64> {
        glasses_code(self.glasses.as_ref())
    }

    /// Normalized "last seen" flag; unknown counts as not-last-seen.
    pub fn last_seen_flag(&self) -> i64 {
        match self.is_last_time_seen.as_ref() {
            Some(Value::Bool(b)) => i64::from(*b),
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Normalize a raw glasses value to a 0/1 code.
pub fn glasses_code(raw: Option<&Value>) -> Option<i64> {
    match raw {
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(0),
            Some(1) => Some(1),
            _ => None,
        },
        Some(Value::String(s)) => match s.as_str() {
            "1" | "glasses" => Some(1),
            "0" | "no_glasses" => Some(0),
            _ => None,
        },
        _ => None,
    }
}

fn string_field(raw: Option<&Value>) -> Option<String> {
    raw.and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_requires_timestamp() {
        assert!(Frame::from_value(&json!({"playerUUID": "p1"})).is_none());
        assert!(Frame::from_value(&json!({"timestamp": "soon"})).is_none());
        assert!(Frame::from_value(&json!({"timestamp": 1700000000})).is_some());
    }

    #[test]
    fn test_frame_drops_image_data() {
        let frame = Frame::from_value(&json!({
            "timestamp": 1700000000,
            "imgDataBase64": "AAAA",
            "faceDetections": [{"faceID": 7}]
        }))
        .unwrap();

        let out = serde_json::to_value(&frame).unwrap();
        assert!(out.get("imgDataBase64").is_none());
        assert_eq!(out["faceDetections"][0]["faceID"], 7);
    }

    #[test]
    fn test_face_tolerates_bad_types() {
        let face = FaceDetection::from_value(&json!({
            "faceID": "not-a-number",
            "age": 33,
            "gender": 1.5
        }));
        assert_eq!(face.face_id, None);
        assert_eq!(face.age, Some(33));
        assert_eq!(face.gender, None);
    }

    #[test]
    fn test_glasses_code_variants() {
        assert_eq!(glasses_code(Some(&json!(true))), Some(1));
        assert_eq!(glasses_code(Some(&json!(0))), Some(0));
        assert_eq!(glasses_code(Some(&json!("glasses"))), Some(1));
        assert_eq!(glasses_code(Some(&json!("no_glasses"))), Some(0));
        assert_eq!(glasses_code(Some(&json!("maybe"))), None);
        assert_eq!(glasses_code(None), None);
    }

    #[test]
    fn test_last_seen_flag_coercion() {
        let face = FaceDetection::from_value(&json!({"isLastTimeSeen": true}));
        assert_eq!(face.last_seen_flag(), 1);
        let face = FaceDetection::from_value(&json!({"isLastTimeSeen": "1"}));
        assert_eq!(face.last_seen_flag(), 1);
        let face = FaceDetection::from_value(&json!({}));
        assert_eq!(face.last_seen_flag(), 0);
    }
}
