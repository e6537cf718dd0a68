// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Normalized health metrics shared by every provider.
//!
//! Provider adapters produce [`MetricSample`]s; the sync orchestrator merges
//! samples that share a natural key and stores them as [`NormalizedMetric`]s,
//! one per (user, provider, day, metric type).

use crate::models::Provider;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Marker stored in place of a value the provider did not send.
pub const UNKNOWN: &str = "unknown";

/// A numeric measurement or the explicit `"unknown"` sentinel.
///
/// Deserialization never fails: numbers and numeric strings become
/// [`Reading::Value`], anything else (null, missing, wrong type) becomes
/// [`Reading::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reading {
    Value(f64),
    #[default]
    Unknown,
}

impl Reading {
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Reading::Unknown)
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Reading {
        match self {
            Reading::Value(v) => Reading::Value(f(v)),
            Reading::Unknown => Reading::Unknown,
        }
    }

    /// `self` if known, otherwise `fallback`.
    pub fn or(self, fallback: Reading) -> Reading {
        if self.is_unknown() {
            fallback
        } else {
            self
        }
    }

    /// Sum of the known operands; unknown only when both are.
    pub fn sum(self, other: Reading) -> Reading {
        match (self, other) {
            (Reading::Value(a), Reading::Value(b)) => Reading::Value(a + b),
            (a, b) => a.or(b),
        }
    }

    pub fn max(self, other: Reading) -> Reading {
        match (self, other) {
            (Reading::Value(a), Reading::Value(b)) => Reading::Value(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Reading::Value(v),
            _ => Reading::Unknown,
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Value(v) => serializer.serialize_f64(*v),
            Reading::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
            Other(serde::de::IgnoredAny),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Some(v).into(),
            Raw::Text(s) => s.trim().parse::<f64>().ok().into(),
            Raw::Other(_) => Reading::Unknown,
        })
    }
}

/// Kind of normalized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Recovery,
    Sleep,
    Activity,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [MetricType::Recovery, MetricType::Sleep, MetricType::Activity];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Recovery => "recovery",
            MetricType::Sleep => "sleep",
            MetricType::Activity => "activity",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recovery" => Ok(MetricType::Recovery),
            "sleep" => Ok(MetricType::Sleep),
            "activity" | "workout" => Ok(MetricType::Activity),
            other => Err(format!("unknown metric type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryValues {
    /// Provider recovery/readiness score (0-100)
    pub recovery_score: Reading,
    /// Heart rate variability (RMSSD, milliseconds)
    pub hrv_rmssd_ms: Reading,
    pub resting_heart_rate: Reading,
    pub spo2_percent: Reading,
    pub skin_temp_celsius: Reading,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepValues {
    pub total_sleep_minutes: Reading,
    pub time_in_bed_minutes: Reading,
    pub deep_sleep_minutes: Reading,
    pub light_sleep_minutes: Reading,
    pub rem_sleep_minutes: Reading,
    pub awake_minutes: Reading,
    pub efficiency_percent: Reading,
    pub respiratory_rate: Reading,
}

/// Minutes spent in one heart-rate zone, named as the provider names it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMinutes {
    pub zone: String,
    #[serde(default)]
    pub minutes: Reading,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityValues {
    /// Whoop-style strain (0-21)
    pub strain: Reading,
    pub calories_kcal: Reading,
    pub duration_minutes: Reading,
    pub average_heart_rate: Reading,
    pub max_heart_rate: Reading,
    pub steps: Reading,
    pub heart_rate_zones: Vec<ZoneMinutes>,
    pub activity_names: Vec<String>,
}

/// Typed numeric payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValues {
    Recovery(RecoveryValues),
    Sleep(SleepValues),
    Activity(ActivityValues),
}

impl MetricValues {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValues::Recovery(_) => MetricType::Recovery,
            MetricValues::Sleep(_) => MetricType::Sleep,
            MetricValues::Activity(_) => MetricType::Activity,
        }
    }

    /// Fold a second same-day record of the same kind into this one.
    fn absorb(&mut self, other: MetricValues) {
        match (self, other) {
            (MetricValues::Recovery(a), MetricValues::Recovery(b)) => {
                // Latest reading of the day wins, but never erases a known value.
                a.recovery_score = b.recovery_score.or(a.recovery_score);
                a.hrv_rmssd_ms = b.hrv_rmssd_ms.or(a.hrv_rmssd_ms);
                a.resting_heart_rate = b.resting_heart_rate.or(a.resting_heart_rate);
                a.spo2_percent = b.spo2_percent.or(a.spo2_percent);
                a.skin_temp_celsius = b.skin_temp_celsius.or(a.skin_temp_celsius);
            }
            (MetricValues::Sleep(a), MetricValues::Sleep(b)) => {
                // Quality figures come from the longer session (the night, not the nap).
                let b_is_main = b.total_sleep_minutes.value().unwrap_or(0.0)
                    > a.total_sleep_minutes.value().unwrap_or(0.0);
                if b_is_main {
                    a.efficiency_percent = b.efficiency_percent.or(a.efficiency_percent);
                    a.respiratory_rate = b.respiratory_rate.or(a.respiratory_rate);
                } else {
                    a.efficiency_percent = a.efficiency_percent.or(b.efficiency_percent);
                    a.respiratory_rate = a.respiratory_rate.or(b.respiratory_rate);
                }
                a.total_sleep_minutes = a.total_sleep_minutes.sum(b.total_sleep_minutes);
                a.time_in_bed_minutes = a.time_in_bed_minutes.sum(b.time_in_bed_minutes);
                a.deep_sleep_minutes = a.deep_sleep_minutes.sum(b.deep_sleep_minutes);
                a.light_sleep_minutes = a.light_sleep_minutes.sum(b.light_sleep_minutes);
                a.rem_sleep_minutes = a.rem_sleep_minutes.sum(b.rem_sleep_minutes);
                a.awake_minutes = a.awake_minutes.sum(b.awake_minutes);
            }
            (MetricValues::Activity(a), MetricValues::Activity(b)) => {
                a.average_heart_rate = weighted_average(
                    (a.average_heart_rate, a.duration_minutes),
                    (b.average_heart_rate, b.duration_minutes),
                );
                a.strain = a.strain.max(b.strain);
                a.max_heart_rate = a.max_heart_rate.max(b.max_heart_rate);
                a.calories_kcal = a.calories_kcal.sum(b.calories_kcal);
                a.duration_minutes = a.duration_minutes.sum(b.duration_minutes);
                a.steps = a.steps.sum(b.steps);
                for zone in b.heart_rate_zones {
                    match a.heart_rate_zones.iter_mut().find(|z| z.zone == zone.zone) {
                        Some(existing) => existing.minutes = existing.minutes.sum(zone.minutes),
                        None => a.heart_rate_zones.push(zone),
                    }
                }
                a.activity_names.extend(b.activity_names);
            }
            (a, b) => {
                tracing::warn!(
                    left = %a.metric_type(),
                    right = %b.metric_type(),
                    "Refusing to merge metrics of different kinds"
                );
            }
        }
    }
}

fn weighted_average(a: (Reading, Reading), b: (Reading, Reading)) -> Reading {
    match (a, b) {
        ((Reading::Value(av), Reading::Value(ad)), (Reading::Value(bv), Reading::Value(bd)))
            if ad + bd > 0.0 =>
        {
            Reading::Value((av * ad + bv * bd) / (ad + bd))
        }
        ((av, _), (bv, _)) => av.or(bv),
    }
}

/// One normalized record as returned by a provider adapter (no owner yet).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub provider: Provider,
    pub metric_date: NaiveDate,
    /// Provider-native record ID (comma-joined after merging)
    pub source_record_id: String,
    pub values: MetricValues,
    /// Untouched provider payload
    pub raw: serde_json::Value,
}

impl MetricSample {
    pub fn metric_type(&self) -> MetricType {
        self.values.metric_type()
    }
}

/// Collapse samples sharing (day, metric type) into one, keeping first-seen order.
///
/// Samples carrying the same native ID are the same record delivered twice
/// (overlapping pages, re-uploaded summaries); the last one wins.
///
/// Input is expected to come from a single provider. Merged records carry
/// every native ID (comma-joined) and every raw payload (as an array).
pub fn merge_samples(samples: Vec<MetricSample>) -> Vec<MetricSample> {
    let mut groups: Vec<Vec<MetricSample>> = Vec::new();
    for sample in samples {
        match groups.iter_mut().find(|g| {
            g[0].metric_date == sample.metric_date && g[0].metric_type() == sample.metric_type()
        }) {
            Some(group) => match group.iter_mut().find(|s| {
                !sample.source_record_id.is_empty()
                    && s.source_record_id == sample.source_record_id
            }) {
                // A re-delivered native record supersedes the earlier copy.
                Some(earlier) => *earlier = sample,
                None => group.push(sample),
            },
            None => groups.push(vec![sample]),
        }
    }

    groups.into_iter().filter_map(fold_group).collect()
}

fn fold_group(group: Vec<MetricSample>) -> Option<MetricSample> {
    let mut rest = group.into_iter();
    let mut merged = rest.next()?;
    let mut raws = Vec::new();
    let mut ids: Vec<String> = Vec::new();

    for sample in rest {
        if raws.is_empty() {
            raws.push(merged.raw.take());
            ids.push(std::mem::take(&mut merged.source_record_id));
        }
        merged.values.absorb(sample.values);
        if !sample.source_record_id.is_empty() && !ids.contains(&sample.source_record_id) {
            ids.push(sample.source_record_id);
        }
        raws.push(sample.raw);
    }

    if !raws.is_empty() {
        merged.raw = serde_json::Value::Array(raws);
        merged.source_record_id = ids.join(",");
    }
    Some(merged)
}

/// Stored record, unique per (user, provider, day, metric type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetric {
    pub user_id: String,
    pub provider: Provider,
    /// Calendar day the metric belongs to (YYYY-MM-DD)
    pub metric_date: NaiveDate,
    pub metric_type: MetricType,
    pub source_record_id: String,
    pub values: MetricValues,
    pub raw_payload: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

impl NormalizedMetric {
    pub fn from_sample(user_id: &str, sample: MetricSample, synced_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider: sample.provider,
            metric_date: sample.metric_date,
            metric_type: sample.metric_type(),
            source_record_id: sample.source_record_id,
            values: sample.values,
            raw_payload: sample.raw,
            synced_at,
        }
    }

    /// Natural key used as the storage document ID.
    pub fn document_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            urlencoding::encode(&self.user_id),
            self.provider,
            self.metric_date.format("%Y-%m-%d"),
            self.metric_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn workout(id: &str, date: NaiveDate, kcal: f64, minutes: f64, avg_hr: f64) -> MetricSample {
        MetricSample {
            provider: Provider::Whoop,
            metric_date: date,
            source_record_id: id.to_string(),
            values: MetricValues::Activity(ActivityValues {
                strain: Reading::Value(minutes / 10.0),
                calories_kcal: Reading::Value(kcal),
                duration_minutes: Reading::Value(minutes),
                average_heart_rate: Reading::Value(avg_hr),
                heart_rate_zones: vec![ZoneMinutes {
                    zone: "zone_2".to_string(),
                    minutes: Reading::Value(minutes / 2.0),
                }],
                activity_names: vec![format!("run {}", id)],
                ..Default::default()
            }),
            raw: json!({ "id": id }),
        }
    }

    #[test]
    fn test_reading_serializes_sentinel() {
        assert_eq!(serde_json::to_value(Reading::Value(42.5)).unwrap(), json!(42.5));
        assert_eq!(serde_json::to_value(Reading::Unknown).unwrap(), json!("unknown"));
    }

    #[test]
    fn test_reading_deserializes_leniently() {
        let parse = |v: serde_json::Value| serde_json::from_value::<Reading>(v).unwrap();
        assert_eq!(parse(json!(61)), Reading::Value(61.0));
        assert_eq!(parse(json!("58.5")), Reading::Value(58.5));
        assert_eq!(parse(json!("unknown")), Reading::Unknown);
        assert_eq!(parse(json!(null)), Reading::Unknown);
        assert_eq!(parse(json!({"nested": true})), Reading::Unknown);
    }

    #[test]
    fn test_missing_fields_become_unknown() {
        let values: RecoveryValues =
            serde_json::from_value(json!({ "recovery_score": 71 })).unwrap();
        assert_eq!(values.recovery_score, Reading::Value(71.0));
        assert!(values.hrv_rmssd_ms.is_unknown());
        assert!(values.resting_heart_rate.is_unknown());
    }

    #[test]
    fn test_reading_arithmetic_ignores_unknown() {
        assert_eq!(Reading::Value(1.0).sum(Reading::Unknown), Reading::Value(1.0));
        assert_eq!(Reading::Unknown.sum(Reading::Unknown), Reading::Unknown);
        assert_eq!(Reading::Value(3.0).max(Reading::Value(5.0)), Reading::Value(5.0));
        assert_eq!(Reading::Unknown.max(Reading::Value(5.0)), Reading::Value(5.0));
    }

    #[test]
    fn test_merge_same_day_workouts() {
        let merged = merge_samples(vec![
            workout("a", day(1), 300.0, 30.0, 140.0),
            workout("b", day(2), 100.0, 10.0, 120.0),
            workout("c", day(1), 600.0, 90.0, 120.0),
        ]);

        assert_eq!(merged.len(), 2);
        let first = &merged[0];
        assert_eq!(first.metric_date, day(1));
        assert_eq!(first.source_record_id, "a,c");
        assert_eq!(first.raw, json!([{ "id": "a" }, { "id": "c" }]));

        let MetricValues::Activity(values) = &first.values else {
            panic!("expected activity values");
        };
        assert_eq!(values.calories_kcal, Reading::Value(900.0));
        assert_eq!(values.duration_minutes, Reading::Value(120.0));
        assert_eq!(values.strain, Reading::Value(9.0));
        assert_eq!(values.average_heart_rate, Reading::Value(125.0));
        assert_eq!(values.heart_rate_zones.len(), 1);
        assert_eq!(values.heart_rate_zones[0].minutes, Reading::Value(60.0));
        assert_eq!(values.activity_names, vec!["run a", "run c"]);
    }

    #[test]
    fn test_merge_redelivered_record_replaces_earlier_copy() {
        let merged = merge_samples(vec![
            workout("a", day(1), 300.0, 30.0, 140.0),
            workout("b", day(1), 200.0, 20.0, 130.0),
            workout("a", day(1), 350.0, 35.0, 150.0),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source_record_id, "a,b");
        assert_eq!(merged[0].raw, json!([{ "id": "a" }, { "id": "b" }]));

        let MetricValues::Activity(values) = &merged[0].values else {
            panic!("expected activity values");
        };
        assert_eq!(values.calories_kcal, Reading::Value(550.0));
        assert_eq!(values.duration_minutes, Reading::Value(55.0));
    }

    #[test]
    fn test_merge_single_redelivered_record_is_not_summed() {
        let merged = merge_samples(vec![
            workout("sd-1", day(2), 400.0, 40.0, 120.0),
            workout("sd-1", day(2), 500.0, 50.0, 125.0),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source_record_id, "sd-1");
        let MetricValues::Activity(values) = &merged[0].values else {
            panic!("expected activity values");
        };
        assert_eq!(values.calories_kcal, Reading::Value(500.0));
        assert_eq!(values.average_heart_rate, Reading::Value(125.0));
    }

    #[test]
    fn test_merge_sleep_prefers_main_session_quality() {
        let nap = MetricSample {
            provider: Provider::Oura,
            metric_date: day(3),
            source_record_id: "nap".to_string(),
            values: MetricValues::Sleep(SleepValues {
                total_sleep_minutes: Reading::Value(25.0),
                efficiency_percent: Reading::Value(70.0),
                ..Default::default()
            }),
            raw: json!({}),
        };
        let night = MetricSample {
            provider: Provider::Oura,
            metric_date: day(3),
            source_record_id: "night".to_string(),
            values: MetricValues::Sleep(SleepValues {
                total_sleep_minutes: Reading::Value(420.0),
                efficiency_percent: Reading::Value(91.0),
                ..Default::default()
            }),
            raw: json!({}),
        };

        let merged = merge_samples(vec![nap, night]);
        assert_eq!(merged.len(), 1);
        let MetricValues::Sleep(values) = &merged[0].values else {
            panic!("expected sleep values");
        };
        assert_eq!(values.total_sleep_minutes, Reading::Value(445.0));
        assert_eq!(values.efficiency_percent, Reading::Value(91.0));
    }

    #[test]
    fn test_document_id_is_natural_key() {
        let metric = NormalizedMetric::from_sample(
            "user@example.com",
            workout("a", day(9), 1.0, 1.0, 1.0),
            Utc::now(),
        );
        assert_eq!(
            metric.document_id(),
            "user%40example.com_whoop_2026-03-09_activity"
        );
    }

    #[test]
    fn test_values_tagged_round_trip_shape() {
        let values = MetricValues::Recovery(RecoveryValues {
            recovery_score: Reading::Value(80.0),
            ..Default::default()
        });
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["kind"], "recovery");
        assert_eq!(json["hrv_rmssd_ms"], "unknown");
    }
}
