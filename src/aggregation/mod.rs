//! AggregationEngine - Dashboard Analytics
//!
//! ## Responsibilities
//!
//! - Deterministic time-bucketing of historical frames
//! - Face/view/impression counting with categorical breakdowns
//! - Idempotent caching keyed on a content projection of the input
//!
//! Buckets for the whole window are pre-generated (zero counts included)
//! so a quiet interval still appears in the output, and the bucket list
//! preserves chronological insertion order. Per-frame and per-face
//! problems are skipped individually; one bad record never aborts a
//! query.

mod types;

pub use types::{
    AgeBins, AggregationResult, BucketStats, BucketType, EmotionCounts, EmotionPct, GenderCounts,
    GenderPct, GlassesCounts, GlassesPct, TimeStats, Totals,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};

use crate::models::FaceDetection;
use crate::state_store::StateStore;
use crate::{Error, Result};

const DEFAULT_VIEW_GAP_SEC: i64 = 5;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_MAX_FRAMES: usize = 10_000;

const DAY_SECS: i64 = 86_400;

/// Tunables for the aggregation engine.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Minimum gap between two counted views of the same
    /// (player, content) pair, in seconds.
    pub view_gap_sec: i64,
    /// Result cache TTL in seconds; 0 disables caching.
    pub cache_ttl_secs: u64,
    /// Maximum accepted input size.
    pub max_frames: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            view_gap_sec: DEFAULT_VIEW_GAP_SEC,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

#[derive(Default)]
struct BucketAccum {
    faces: u64,
    gender: GenderCounts,
    emotion: EmotionCounts,
    glasses: GlassesCounts,
    dwell_sum: i64,
    attention_sum: i64,
    age_bins: AgeBins,
}

/// Aggregation engine with a store-backed result cache.
pub struct AggregationEngine {
    store: Arc<dyn StateStore>,
    config: AggregationConfig,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn StateStore>, config: AggregationConfig) -> Self {
        Self { store, config }
    }

    /// Aggregate raw frames over `[start, end)`.
    ///
    /// Fails with [`Error::Validation`] for unparseable dates or
    /// start >= end, and with [`Error::LimitExceeded`] when the input is
    /// larger than the configured maximum.
    pub async fn aggregate(
        &self,
        frames: &[Value],
        start_iso: &str,
        end_iso: &str,
        bucket_type: Option<BucketType>,
    ) -> Result<AggregationResult> {
        let start_ts = parse_timestamp(start_iso).ok_or_else(|| {
            Error::Validation("Invalid date format for start or end time".to_string())
        })?;
        let end_ts = parse_timestamp(end_iso).ok_or_else(|| {
            Error::Validation("Invalid date format for start or end time".to_string())
        })?;
        if start_ts >= end_ts {
            return Err(Error::Validation(
                "Start time must be before end time".to_string(),
            ));
        }
        if frames.len() > self.config.max_frames {
            return Err(Error::LimitExceeded(format!(
                "Frame count ({}) exceeds maximum limit ({})",
                frames.len(),
                self.config.max_frames
            )));
        }

        let cache_key = self.cache_key(frames, start_iso, end_iso, bucket_type);
        if self.config.cache_ttl_secs > 0 {
            if let Some(cached) = self.cache_get(&cache_key).await {
                tracing::debug!(
                    cache_key = %cache_key,
                    frame_count = frames.len(),
                    "Aggregation cache hit"
                );
                return Ok(cached);
            }
        }

        let bucket = bucket_type.unwrap_or_else(|| auto_bucket(end_ts - start_ts));
        let (bucket_keys, mut buckets) = make_buckets(start_ts, end_ts, bucket);

        let mut totals = Totals::default();
        let mut last_view_ts: HashMap<String, i64> = HashMap::new();
        let mut impressions: HashSet<i64> = HashSet::new();

        for raw in frames {
            let Some(obj) = raw.as_object() else { continue };
            let ts = obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
            if ts < start_ts || ts >= end_ts {
                continue;
            }
            let Some(bucket_key) = bucket_key_for(ts, bucket, start_ts, end_ts) else {
                continue;
            };
            if !buckets.contains_key(&bucket_key) {
                continue;
            }

            let player_uuid = obj.get("playerUUID").and_then(Value::as_str).unwrap_or("");
            let faces: Vec<FaceDetection> = obj
                .get("faceDetections")
                .and_then(Value::as_array)
                .map(|list| list.iter().map(FaceDetection::from_value).collect())
                .unwrap_or_default();

            totals.faces += faces.len() as u64;

            // View counting per (playerUUID, contentId) with a gap window
            for content_id in content_ids(obj) {
                let view_key = format!("{player_uuid}|{content_id}");
                let last = last_view_ts.get(&view_key).copied().unwrap_or(0);
                if ts - last >= self.config.view_gap_sec {
                    totals.views += 1;
                    last_view_ts.insert(view_key, ts);
                }
            }

            let Some(accum) = buckets.get_mut(&bucket_key) else {
                continue;
            };
            accum.faces += faces.len() as u64;

            for face in &faces {
                let dwell = face.dwell_time.unwrap_or(0.0).round() as i64;
                let attention = face.attention_time.unwrap_or(0.0).round() as i64;
                totals.dwell_time.sum += dwell;
                totals.attention_time.sum += attention;
                accum.dwell_sum += dwell;
                accum.attention_sum += attention;

                match face.gender {
                    Some(0) => {
                        totals.gender.male += 1;
                        accum.gender.male += 1;
                    }
                    Some(1) => {
                        totals.gender.female += 1;
                        accum.gender.female += 1;
                    }
                    _ => {}
                }

                match face.emotion {
                    Some(0) => {
                        totals.emotion.happy += 1;
                        accum.emotion.happy += 1;
                    }
                    Some(1) => {
                        totals.emotion.satisfied += 1;
                        accum.emotion.satisfied += 1;
                    }
                    Some(2) => {
                        totals.emotion.neutral += 1;
                        accum.emotion.neutral += 1;
                    }
                    Some(3) => {
                        totals.emotion.unhappy += 1;
                        accum.emotion.unhappy += 1;
                    }
                    _ => {}
                }

                match face.glasses_code() {
                    Some(1) => {
                        totals.glasses.with += 1;
                        accum.glasses.with += 1;
                    }
                    Some(0) => {
                        totals.glasses.without += 1;
                        accum.glasses.without += 1;
                    }
                    _ => {}
                }

                match face.age {
                    Some(age) if age < 20 => accum.age_bins.under_20 += 1,
                    Some(age) if age < 30 => accum.age_bins.age_20_29 += 1,
                    Some(age) if age <= 45 => accum.age_bins.age_30_45 += 1,
                    Some(_) => accum.age_bins.over_45 += 1,
                    // Unknown age lands in the default bin
                    None => accum.age_bins.age_20_29 += 1,
                }

                if let Some(face_id) = face.face_id {
                    if dwell > 0 || attention > 0 {
                        impressions.insert(face_id);
                    }
                }
            }
        }

        totals.impressions = impressions.len() as u64;
        let face_count = totals.faces.max(1) as f64;
        totals.dwell_time.avg = totals.dwell_time.sum as f64 / face_count;
        totals.attention_time.avg = totals.attention_time.sum as f64 / face_count;

        let gender_sum = (totals.gender.male + totals.gender.female).max(1) as f64;
        totals.gender_pct = GenderPct {
            male: totals.gender.male as f64 / gender_sum,
            female: totals.gender.female as f64 / gender_sum,
        };
        let emotion_sum = totals.emotion.sum().max(1) as f64;
        totals.emotion_pct = EmotionPct {
            happy: totals.emotion.happy as f64 / emotion_sum,
            satisfied: totals.emotion.satisfied as f64 / emotion_sum,
            neutral: totals.emotion.neutral as f64 / emotion_sum,
            unhappy: totals.emotion.unhappy as f64 / emotion_sum,
        };
        let glasses_sum = (totals.glasses.with + totals.glasses.without).max(1) as f64;
        totals.glasses_pct = GlassesPct {
            with: totals.glasses.with as f64 / glasses_sum,
            without: totals.glasses.without as f64 / glasses_sum,
        };

        let bucket_list = bucket_keys
            .into_iter()
            .map(|key| {
                let accum = buckets.remove(&key).unwrap_or_default();
                let f = accum.faces.max(1) as f64;
                BucketStats {
                    bucket: key,
                    faces: accum.faces,
                    gender: accum.gender,
                    emotion: accum.emotion,
                    glasses: accum.glasses,
                    dwell_time: TimeStats {
                        sum: accum.dwell_sum,
                        avg: accum.dwell_sum as f64 / f,
                    },
                    attention_time: TimeStats {
                        sum: accum.attention_sum,
                        avg: accum.attention_sum as f64 / f,
                    },
                    age_bins: accum.age_bins,
                }
            })
            .collect();

        let result = AggregationResult {
            bucket_type: bucket,
            totals,
            buckets: bucket_list,
        };

        if self.config.cache_ttl_secs > 0 {
            self.cache_put(&cache_key, &result).await;
        }

        tracing::debug!(
            frame_count = frames.len(),
            bucket_type = %bucket,
            "Aggregation completed"
        );

        Ok(result)
    }

    /// Cache key from a content projection of the input: timestamp,
    /// player UUID and face count per frame, plus the window and bucket
    /// override. A change in any frame changes the hash.
    fn cache_key(
        &self,
        frames: &[Value],
        start_iso: &str,
        end_iso: &str,
        bucket_type: Option<BucketType>,
    ) -> String {
        let projection: Vec<Value> = frames
            .iter()
            .map(|frame| {
                json!({
                    "timestamp": frame.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
                    "playerUUID": frame.get("playerUUID").cloned().unwrap_or(Value::Null),
                    "faceCount": frame
                        .get("faceDetections")
                        .and_then(Value::as_array)
                        .map_or(0, |faces| faces.len()),
                })
            })
            .collect();

        let mut hasher = Sha1::new();
        hasher.update(serde_json::to_string(&projection).unwrap_or_default().as_bytes());
        let hash = hex::encode(hasher.finalize());

        let bucket = bucket_type
            .map(|b| b.to_string())
            .unwrap_or_else(|| "auto".to_string());
        format!("aggregation:{hash}:{start_iso}:{end_iso}:{bucket}")
    }

    async fn cache_get(&self, key: &str) -> Option<AggregationResult> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::warn!(cache_key = %key, error = %e, "Failed to decode cached aggregation");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::error!(cache_key = %key, error = %e, "Store error reading aggregation cache");
                None
            }
        }
    }

    async fn cache_put(&self, key: &str, result: &AggregationResult) {
        let json = match serde_json::to_string(result) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(cache_key = %key, error = %e, "Failed to encode aggregation result");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set_ex(key, &json, self.config.cache_ttl_secs)
            .await
        {
            tracing::error!(cache_key = %key, error = %e, "Store error writing aggregation cache");
        }
    }
}

/// Sort raw frames ascending by timestamp (raw dashboard mode).
pub fn sort_frames_by_timestamp(frames: &mut [Value]) {
    frames.sort_by_key(|frame| frame.get("timestamp").and_then(Value::as_i64).unwrap_or(0));
}

fn content_ids(frame: &serde_json::Map<String, Value>) -> Vec<String> {
    frame
        .get("player")
        .and_then(|p| p.get("content"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| {
                    c.get("id")
                        .or_else(|| c.get("contentId"))
                        .and_then(Value::as_str)
                })
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Bucket granularity from window length when no override is supplied.
fn auto_bucket(diff_secs: i64) -> BucketType {
    if diff_secs <= DAY_SECS {
        BucketType::Hourly8
    } else if diff_secs <= DAY_SECS * 7 {
        BucketType::Day
    } else if diff_secs <= DAY_SECS * 31 {
        BucketType::Week
    } else if diff_secs <= DAY_SECS * 365 {
        BucketType::Month
    } else {
        BucketType::Year
    }
}

/// Pre-generate every bucket in the window, in chronological order.
fn make_buckets(
    start_ts: i64,
    end_ts: i64,
    bucket: BucketType,
) -> (Vec<String>, HashMap<String, BucketAccum>) {
    let mut keys = Vec::new();
    let mut map = HashMap::new();

    fn push(key: String, keys: &mut Vec<String>, map: &mut HashMap<String, BucketAccum>) {
        if !map.contains_key(&key) {
            keys.push(key.clone());
            map.insert(key, BucketAccum::default());
        }
    }

    if bucket == BucketType::Hourly8 {
        let seg = (end_ts - start_ts) as f64 / 8.0;
        for i in 0..8 {
            let ts = start_ts + (i as f64 * seg) as i64;
            if let Some(key) = iso_key(ts) {
                push(key, &mut keys, &mut map);
            }
        }
        return (keys, map);
    }

    let mut cur = start_ts;
    while cur < end_ts {
        if let Some(key) = calendar_key(cur, bucket) {
            push(key, &mut keys, &mut map);
        }
        cur = match bucket {
            BucketType::Day => cur + DAY_SECS,
            BucketType::Week => cur + 7 * DAY_SECS,
            BucketType::Month => step_months(cur, 1).unwrap_or(end_ts),
            BucketType::Year => step_months(cur, 12).unwrap_or(end_ts),
            BucketType::Hourly8 => end_ts,
        };
    }

    (keys, map)
}

/// Bucket key for a timestamp. hourly8 keys come from the segment start;
/// calendar buckets truncate the timestamp itself, so a timestamp exactly
/// on a boundary belongs to the bucket starting there.
fn bucket_key_for(ts: i64, bucket: BucketType, start_ts: i64, end_ts: i64) -> Option<String> {
    if bucket == BucketType::Hourly8 {
        let seg = (end_ts - start_ts) as f64 / 8.0;
        let index = (((ts - start_ts) as f64 / seg).floor() as i64).clamp(0, 7);
        let bucket_start = start_ts + (index as f64 * seg) as i64;
        return iso_key(bucket_start);
    }
    calendar_key(ts, bucket)
}

fn calendar_key(ts: i64, bucket: BucketType) -> Option<String> {
    let dt = to_datetime(ts)?;
    let key = match bucket {
        BucketType::Day => dt.format("%Y-%m-%d").to_string(),
        BucketType::Week => dt.format("%G-W%V").to_string(),
        BucketType::Month => dt.format("%Y-%m").to_string(),
        BucketType::Year => dt.format("%Y").to_string(),
        BucketType::Hourly8 => dt.to_rfc3339_opts(SecondsFormat::Secs, false),
    };
    Some(key)
}

fn iso_key(ts: i64) -> Option<String> {
    Some(to_datetime(ts)?.to_rfc3339_opts(SecondsFormat::Secs, false))
}

fn to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

fn step_months(ts: i64, months: u32) -> Option<i64> {
    to_datetime(ts)?
        .checked_add_months(Months::new(months))
        .map(|dt| dt.timestamp())
}

/// Parse an ISO-8601-ish timestamp; date-only inputs mean UTC midnight.
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }
    None
}
