//! Aggregation result types
//!
//! Shapes mirror the dashboard wire format: camelCase fields, label keys
//! for the categorical breakdowns, buckets in chronological order.

use serde::{Deserialize, Serialize};

/// Time bucketing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketType {
    /// Eight equal-width segments across the window.
    Hourly8,
    Day,
    Week,
    Month,
    Year,
}

impl BucketType {
    /// Parse a caller-supplied override; unknown values mean "auto".
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hourly8" => Some(Self::Hourly8),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

impl std::fmt::Display for BucketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly8 => write!(f, "hourly8"),
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Year => write!(f, "year"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenderCounts {
    pub male: u64,
    pub female: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionCounts {
    #[serde(rename = "Happy")]
    pub happy: u64,
    #[serde(rename = "Satisfied")]
    pub satisfied: u64,
    #[serde(rename = "Neutral")]
    pub neutral: u64,
    #[serde(rename = "Unhappy")]
    pub unhappy: u64,
}

impl EmotionCounts {
    pub fn sum(&self) -> u64 {
        self.happy + self.satisfied + self.neutral + self.unhappy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlassesCounts {
    pub with: u64,
    pub without: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    pub sum: i64,
    pub avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeBins {
    #[serde(rename = "<20")]
    pub under_20: u64,
    #[serde(rename = "20-29")]
    pub age_20_29: u64,
    #[serde(rename = "30-45")]
    pub age_30_45: u64,
    #[serde(rename = "45+")]
    pub over_45: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenderPct {
    pub male: f64,
    pub female: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionPct {
    #[serde(rename = "Happy")]
    pub happy: f64,
    #[serde(rename = "Satisfied")]
    pub satisfied: f64,
    #[serde(rename = "Neutral")]
    pub neutral: f64,
    #[serde(rename = "Unhappy")]
    pub unhappy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlassesPct {
    pub with: f64,
    pub without: f64,
}

/// Window-level totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub faces: u64,
    pub views: u64,
    pub impressions: u64,
    pub gender: GenderCounts,
    pub emotion: EmotionCounts,
    pub glasses: GlassesCounts,
    #[serde(rename = "dwellTime")]
    pub dwell_time: TimeStats,
    #[serde(rename = "attentionTime")]
    pub attention_time: TimeStats,
    #[serde(rename = "genderPct")]
    pub gender_pct: GenderPct,
    #[serde(rename = "emotionPct")]
    pub emotion_pct: EmotionPct,
    #[serde(rename = "glassesPct")]
    pub glasses_pct: GlassesPct,
}

/// Per-bucket statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub bucket: String,
    pub faces: u64,
    pub gender: GenderCounts,
    pub emotion: EmotionCounts,
    pub glasses: GlassesCounts,
    #[serde(rename = "dwellTime")]
    pub dwell_time: TimeStats,
    #[serde(rename = "attentionTime")]
    pub attention_time: TimeStats,
    #[serde(rename = "ageBins")]
    pub age_bins: AgeBins,
}

/// Full aggregation output; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    #[serde(rename = "bucketType")]
    pub bucket_type: BucketType,
    pub totals: Totals,
    pub buckets: Vec<BucketStats>,
}
