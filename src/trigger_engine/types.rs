//! Trigger rule definitions

use serde_json::Value;

use crate::models::FaceDetection;

/// Gender a rule can target. Face records encode male as 0, female as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerGender {
    Male,
    Female,
}

impl TriggerGender {
    fn face_code(&self) -> i64 {
        match self {
            Self::Male => 0,
            Self::Female => 1,
        }
    }
}

/// Glasses state a rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerGlasses {
    With,
    Without,
}

impl TriggerGlasses {
    fn face_code(&self) -> i64 {
        match self {
            Self::With => 1,
            Self::Without => 0,
        }
    }
}

/// A named predicate over face attributes.
///
/// Every predicate is optional; a rule with none matches every face.
/// Rules arrive as loose JSON from players, so decoding tolerates bad
/// fields by treating them as absent -- only the `id` is mandatory.
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    pub id: String,
    /// Inclusive [min, max] age range.
    pub age: Option<(i64, i64)>,
    pub age_confidence: Option<f64>,
    pub gender: Option<TriggerGender>,
    pub gender_confidence: Option<f64>,
    /// Set of matching emotion codes (0-3).
    pub emotion: Option<Vec<i64>>,
    pub emotion_confidence: Option<f64>,
    /// Minimum dwell time in milliseconds.
    pub dwell_time: Option<i64>,
    /// Minimum attention time in milliseconds.
    pub attention_time: Option<i64>,
    pub glasses: Option<TriggerGlasses>,
    pub glasses_confidence: Option<f64>,
    /// Match only faces not flagged as "last time seen".
    pub first_seen: bool,
}

impl Trigger {
    /// Decode one rule; `None` when it has no usable id.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?
            .to_string();

        let age = obj.get("age").and_then(Value::as_array).and_then(|range| {
            if range.len() == 2 {
                Some((num_i64(&range[0])?, num_i64(&range[1])?))
            } else {
                None
            }
        });

        let gender = obj
            .get("gender")
            .and_then(Value::as_str)
            .map(|g| match g {
                "male" => TriggerGender::Male,
                _ => TriggerGender::Female,
            });

        let emotion = obj
            .get("emotion")
            .and_then(Value::as_array)
            .map(|set| set.iter().filter_map(num_i64).collect());

        let glasses = obj
            .get("glasses")
            .and_then(Value::as_str)
            .map(|g| match g {
                "glasses" => TriggerGlasses::With,
                _ => TriggerGlasses::Without,
            });

        Some(Self {
            id,
            age,
            age_confidence: obj.get("ageConfidence").and_then(Value::as_f64),
            gender,
            gender_confidence: obj.get("genderConfidence").and_then(Value::as_f64),
            emotion,
            emotion_confidence: obj.get("emotionConfidence").and_then(Value::as_f64),
            dwell_time: obj.get("dwellTime").and_then(num_i64),
            attention_time: obj.get("attentionTime").and_then(num_i64),
            glasses,
            glasses_confidence: obj.get("glassesConfidence").and_then(Value::as_f64),
            first_seen: obj.get("firstSeen").and_then(Value::as_bool) == Some(true),
        })
    }

    /// Decode a rule list, dropping entries without a valid id.
    pub fn decode_list(raw: &[Value]) -> Vec<Self> {
        raw.iter()
            .filter_map(|rule| {
                let trigger = Self::from_value(rule);
                if trigger.is_none() {
                    tracing::debug!("Dropping trigger rule without id");
                }
                trigger
            })
            .collect()
    }

    /// Conjunction over all configured predicates. An absent predicate is
    /// vacuously satisfied; a failing one short-circuits to non-match.
    pub fn matches(&self, face: &FaceDetection) -> bool {
        if let Some((min, max)) = self.age {
            match face.age {
                Some(age) if age >= min && age <= max => {}
                _ => return false,
            }
            if let Some(min_conf) = self.age_confidence {
                if face.age_confidence.unwrap_or(0.0) < min_conf {
                    return false;
                }
            }
        }

        if let Some(gender) = self.gender {
            if face.gender != Some(gender.face_code()) {
                return false;
            }
            if let Some(min_conf) = self.gender_confidence {
                if face.gender_confidence.unwrap_or(0.0) < min_conf {
                    return false;
                }
            }
        }

        if let Some(emotions) = &self.emotion {
            match face.emotion {
                Some(emotion) if emotions.contains(&emotion) => {}
                _ => return false,
            }
            if let Some(min_conf) = self.emotion_confidence {
                if face.emotion_confidence.unwrap_or(0.0) < min_conf {
                    return false;
                }
            }
        }

        if let Some(min_dwell) = self.dwell_time {
            if (face.dwell_time.unwrap_or(0.0) as i64) < min_dwell {
                return false;
            }
        }

        if let Some(min_attention) = self.attention_time {
            if (face.attention_time.unwrap_or(0.0) as i64) < min_attention {
                return false;
            }
        }

        if let Some(glasses) = self.glasses {
            if face.glasses_code() != Some(glasses.face_code()) {
                return false;
            }
            if let Some(min_conf) = self.glasses_confidence {
                if face.glasses_confidence.unwrap_or(0.0) < min_conf {
                    return false;
                }
            }
        }

        if self.first_seen && face.last_seen_flag() != 0 {
            return false;
        }

        true
    }
}

fn num_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn face(fields: Value) -> FaceDetection {
        FaceDetection::from_value(&fields)
    }

    #[test]
    fn test_empty_trigger_matches_everything() {
        let trigger = Trigger::from_value(&json!({"id": "t-1"})).unwrap();
        assert!(trigger.matches(&face(json!({}))));
        assert!(trigger.matches(&face(json!({"age": 99, "gender": 1}))));
    }

    #[test]
    fn test_decode_requires_id() {
        assert!(Trigger::from_value(&json!({"gender": "male"})).is_none());
        assert!(Trigger::from_value(&json!({"id": ""})).is_none());
        assert!(Trigger::from_value(&json!({"id": 42})).is_none());

        let rules = vec![
            json!({"id": "keep"}),
            json!({"gender": "male"}),
            json!("junk"),
        ];
        let decoded = Trigger::decode_list(&rules);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, "keep");
    }

    #[test]
    fn test_age_range_with_confidence() {
        let trigger = Trigger::from_value(&json!({
            "id": "t-1",
            "age": [20, 30],
            "ageConfidence": 0.8
        }))
        .unwrap();

        assert!(trigger.matches(&face(json!({"age": 25, "ageConfidence": 0.9}))));
        assert!(trigger.matches(&face(json!({"age": 20, "ageConfidence": 0.8}))));
        assert!(trigger.matches(&face(json!({"age": 30, "ageConfidence": 0.8}))));
        assert!(!trigger.matches(&face(json!({"age": 19, "ageConfidence": 0.9}))));
        assert!(!trigger.matches(&face(json!({"age": 31, "ageConfidence": 0.9}))));
        assert!(!trigger.matches(&face(json!({"age": 25, "ageConfidence": 0.5}))));
        // Missing age never matches an age-constrained rule
        assert!(!trigger.matches(&face(json!({"ageConfidence": 0.9}))));
    }

    #[test]
    fn test_gender_predicate() {
        let trigger = Trigger::from_value(&json!({"id": "t-1", "gender": "male"})).unwrap();
        assert!(trigger.matches(&face(json!({"gender": 0}))));
        assert!(!trigger.matches(&face(json!({"gender": 1}))));
        assert!(!trigger.matches(&face(json!({}))));

        let trigger = Trigger::from_value(&json!({"id": "t-2", "gender": "female"})).unwrap();
        assert!(trigger.matches(&face(json!({"gender": 1}))));
    }

    #[test]
    fn test_emotion_set() {
        let trigger = Trigger::from_value(&json!({"id": "t-1", "emotion": [0, 1]})).unwrap();
        assert!(trigger.matches(&face(json!({"emotion": 0}))));
        assert!(trigger.matches(&face(json!({"emotion": 1}))));
        assert!(!trigger.matches(&face(json!({"emotion": 2}))));
        assert!(!trigger.matches(&face(json!({}))));
    }

    #[test]
    fn test_dwell_and_attention_minimums() {
        let trigger = Trigger::from_value(&json!({
            "id": "t-1",
            "dwellTime": 500,
            "attentionTime": 200
        }))
        .unwrap();

        assert!(trigger.matches(&face(json!({"dwellTime": 500, "attentionTime": 250}))));
        assert!(!trigger.matches(&face(json!({"dwellTime": 499, "attentionTime": 250}))));
        assert!(!trigger.matches(&face(json!({"dwellTime": 600}))));
    }

    #[test]
    fn test_glasses_predicate() {
        let trigger = Trigger::from_value(&json!({"id": "t-1", "glasses": "glasses"})).unwrap();
        assert!(trigger.matches(&face(json!({"glasses": 1}))));
        assert!(trigger.matches(&face(json!({"glasses": true}))));
        assert!(!trigger.matches(&face(json!({"glasses": 0}))));
        assert!(!trigger.matches(&face(json!({}))));
    }

    #[test]
    fn test_first_seen_flag() {
        let trigger = Trigger::from_value(&json!({"id": "t-1", "firstSeen": true})).unwrap();
        assert!(trigger.matches(&face(json!({}))));
        assert!(trigger.matches(&face(json!({"isLastTimeSeen": 0}))));
        assert!(!trigger.matches(&face(json!({"isLastTimeSeen": 1}))));
    }

    #[test]
    fn test_malformed_predicates_are_absent() {
        let trigger = Trigger::from_value(&json!({
            "id": "t-1",
            "age": [20],
            "emotion": "happy",
            "gender": 3
        }))
        .unwrap();
        assert!(trigger.age.is_none());
        assert!(trigger.emotion.is_none());
        assert!(trigger.gender.is_none());
        assert!(trigger.matches(&face(json!({}))));
    }
}
