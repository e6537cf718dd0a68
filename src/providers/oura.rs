// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Oura API v2 user collections.

use crate::error::SyncError;
use crate::models::{
    ActivityValues, DateRange, MetricSample, MetricType, MetricValues, Provider, Reading,
    RecoveryValues, SleepValues,
};
use crate::providers::{
    decode_record, native_id, warn_skipped, ApiClient, ProviderAdapter, MAX_PAGES,
};
use crate::time_utils::parse_day;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const SECS_PER_MINUTE: f64 = 60.0;

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<Value>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyReadiness {
    day: Option<String>,
    #[serde(default)]
    score: Reading,
}

#[derive(Debug, Deserialize)]
struct SleepPeriod {
    day: Option<String>,
    #[serde(flatten)]
    values: SleepFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SleepFields {
    total_sleep_duration: Reading,
    time_in_bed: Reading,
    deep_sleep_duration: Reading,
    light_sleep_duration: Reading,
    rem_sleep_duration: Reading,
    awake_time: Reading,
    efficiency: Reading,
    average_breath: Reading,
    average_hrv: Reading,
    lowest_heart_rate: Reading,
}

#[derive(Debug, Deserialize)]
struct DailyActivity {
    day: Option<String>,
    #[serde(flatten)]
    values: ActivityFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActivityFields {
    active_calories: Reading,
    steps: Reading,
    high_activity_time: Reading,
    medium_activity_time: Reading,
    low_activity_time: Reading,
}

pub struct OuraAdapter {
    api: ApiClient,
}

impl OuraAdapter {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn collect(
        &self,
        path: &str,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<Value>, SyncError> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("start_date", range.start().to_string()),
                ("end_date", range.end().to_string()),
            ];
            if let Some(t) = &next_token {
                query.push(("next_token", t.clone()));
            }

            let page: Page = self.api.get_json(path, token, &query).await?;
            records.extend(page.data);

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(t) => next_token = Some(t),
                None => return Ok(records),
            }
        }

        tracing::warn!(path, "Oura pagination stopped at page limit");
        Ok(records)
    }
}

#[async_trait]
impl ProviderAdapter for OuraAdapter {
    fn provider(&self) -> Provider {
        Provider::Oura
    }

    async fn fetch_recovery(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let readiness = self.collect("/daily_readiness", token, range).await?;
        let sleeps = self.collect("/sleep", token, range).await?;
        Ok(recovery_samples(readiness, sleeps))
    }

    async fn fetch_sleep(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/sleep", token, range).await?;
        Ok(records.into_iter().filter_map(sleep_sample).collect())
    }

    async fn fetch_activity(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/daily_activity", token, range).await?;
        Ok(records.into_iter().filter_map(activity_sample).collect())
    }
}

/// Native ID and `day` every Oura document carries.
fn keyed(
    kind: MetricType,
    raw: &Value,
    day: Option<&str>,
) -> Option<(String, chrono::NaiveDate)> {
    let Some(id) = native_id(raw.get("id")) else {
        warn_skipped(Provider::Oura, kind, "missing id");
        return None;
    };
    let Some(day) = day.and_then(parse_day) else {
        warn_skipped(Provider::Oura, kind, "missing day");
        return None;
    };
    Some((id, day))
}

/// Readiness scores, with HRV and resting heart rate taken from the day's
/// main sleep period.
fn recovery_samples(readiness: Vec<Value>, sleeps: Vec<Value>) -> Vec<MetricSample> {
    let mut samples: Vec<MetricSample> =
        readiness.into_iter().filter_map(readiness_sample).collect();

    let mut main_sleep: Vec<(chrono::NaiveDate, SleepFields)> = Vec::new();
    for raw in sleeps {
        let Some(period) = decode_record::<SleepPeriod>(Provider::Oura, MetricType::Recovery, &raw)
        else {
            continue;
        };
        let Some(day) = period.day.as_deref().and_then(parse_day) else {
            continue;
        };
        let length = period.values.total_sleep_duration.value().unwrap_or(0.0);
        match main_sleep.iter_mut().find(|(d, _)| *d == day) {
            Some(slot) if slot.1.total_sleep_duration.value().unwrap_or(0.0) < length => {
                slot.1 = period.values;
            }
            Some(_) => {}
            None => main_sleep.push((day, period.values)),
        }
    }

    for sample in &mut samples {
        let Some((_, sleep)) = main_sleep.iter().find(|(d, _)| *d == sample.metric_date) else {
            continue;
        };
        if let MetricValues::Recovery(values) = &mut sample.values {
            values.hrv_rmssd_ms = sleep.average_hrv.or(values.hrv_rmssd_ms);
            values.resting_heart_rate = sleep.lowest_heart_rate.or(values.resting_heart_rate);
        }
    }

    samples
}

fn readiness_sample(raw: Value) -> Option<MetricSample> {
    let record: DailyReadiness = decode_record(Provider::Oura, MetricType::Recovery, &raw)?;
    let (id, day) = keyed(MetricType::Recovery, &raw, record.day.as_deref())?;

    // Readiness reports temperature as a deviation, not an absolute value.
    Some(MetricSample {
        provider: Provider::Oura,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Recovery(RecoveryValues {
            recovery_score: record.score,
            ..RecoveryValues::default()
        }),
        raw,
    })
}

fn sleep_sample(raw: Value) -> Option<MetricSample> {
    let record: SleepPeriod = decode_record(Provider::Oura, MetricType::Sleep, &raw)?;
    let (id, day) = keyed(MetricType::Sleep, &raw, record.day.as_deref())?;
    let fields = record.values;
    let minutes = |r: Reading| r.map(|v| v / SECS_PER_MINUTE);

    Some(MetricSample {
        provider: Provider::Oura,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Sleep(SleepValues {
            total_sleep_minutes: minutes(fields.total_sleep_duration),
            time_in_bed_minutes: minutes(fields.time_in_bed),
            deep_sleep_minutes: minutes(fields.deep_sleep_duration),
            light_sleep_minutes: minutes(fields.light_sleep_duration),
            rem_sleep_minutes: minutes(fields.rem_sleep_duration),
            awake_minutes: minutes(fields.awake_time),
            efficiency_percent: fields.efficiency,
            respiratory_rate: fields.average_breath,
        }),
        raw,
    })
}

fn activity_sample(raw: Value) -> Option<MetricSample> {
    let record: DailyActivity = decode_record(Provider::Oura, MetricType::Activity, &raw)?;
    let (id, day) = keyed(MetricType::Activity, &raw, record.day.as_deref())?;
    let fields = record.values;
    let active_secs = fields
        .high_activity_time
        .sum(fields.medium_activity_time)
        .sum(fields.low_activity_time);

    Some(MetricSample {
        provider: Provider::Oura,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Activity(ActivityValues {
            calories_kcal: fields.active_calories,
            duration_minutes: active_secs.map(|v| v / SECS_PER_MINUTE),
            steps: fields.steps,
            ..ActivityValues::default()
        }),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_sleep_mapping_converts_seconds() {
        let raw = json!({
            "id": "8f9a5221-639e-4a85-81cb-4065ef23f979",
            "day": "2026-03-02",
            "type": "long_sleep",
            "total_sleep_duration": 26_100,
            "time_in_bed": 28_800,
            "deep_sleep_duration": 5_400,
            "light_sleep_duration": 14_400,
            "rem_sleep_duration": 6_300,
            "awake_time": 2_700,
            "efficiency": 91,
            "average_breath": 14.875,
            "average_hrv": 47
        });
        let sample = sleep_sample(raw).unwrap();
        assert_eq!(sample.metric_date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        let MetricValues::Sleep(values) = sample.values else {
            panic!("expected sleep");
        };
        assert_eq!(values.total_sleep_minutes, Reading::Value(435.0));
        assert_eq!(values.deep_sleep_minutes, Reading::Value(90.0));
        assert_eq!(values.efficiency_percent, Reading::Value(91.0));
    }

    #[test]
    fn test_recovery_takes_hrv_from_main_sleep() {
        let readiness = vec![
            json!({"id": "r1", "day": "2026-03-02", "score": 82}),
            json!({"id": "r2", "day": "2026-03-03", "score": 75}),
        ];
        let sleeps = vec![
            json!({"id": "nap", "day": "2026-03-02", "total_sleep_duration": 1_800,
                   "average_hrv": 30, "lowest_heart_rate": 60}),
            json!({"id": "night", "day": "2026-03-02", "total_sleep_duration": 26_100,
                   "average_hrv": 47, "lowest_heart_rate": 52}),
        ];

        let samples = recovery_samples(readiness, sleeps);
        assert_eq!(samples.len(), 2);

        let MetricValues::Recovery(values) = &samples[0].values else {
            panic!("expected recovery");
        };
        assert_eq!(values.recovery_score, Reading::Value(82.0));
        assert_eq!(values.hrv_rmssd_ms, Reading::Value(47.0));
        assert_eq!(values.resting_heart_rate, Reading::Value(52.0));

        // No sleep that day.
        let MetricValues::Recovery(values) = &samples[1].values else {
            panic!("expected recovery");
        };
        assert!(values.hrv_rmssd_ms.is_unknown());
        assert!(values.resting_heart_rate.is_unknown());
    }

    #[test]
    fn test_readiness_with_null_score() {
        let raw = json!({"id": "r1", "day": "2026-03-02", "score": null});
        let sample = readiness_sample(raw).unwrap();
        let MetricValues::Recovery(values) = sample.values else {
            panic!("expected recovery");
        };
        assert!(values.recovery_score.is_unknown());
    }

    #[test]
    fn test_activity_mapping() {
        let raw = json!({
            "id": "a1",
            "day": "2026-03-01",
            "active_calories": 512,
            "steps": "9312",
            "high_activity_time": 600,
            "medium_activity_time": 1_800,
            "low_activity_time": 3_600
        });
        let sample = activity_sample(raw).unwrap();
        let MetricValues::Activity(values) = sample.values else {
            panic!("expected activity");
        };
        assert_eq!(values.steps, Reading::Value(9312.0));
        assert_eq!(values.duration_minutes, Reading::Value(100.0));
        assert!(values.strain.is_unknown());
    }

    #[test]
    fn test_missing_day_is_skipped() {
        assert!(activity_sample(json!({"id": "a1", "steps": 10})).is_none());
        assert!(activity_sample(json!({"day": "2026-03-01"})).is_none());
    }
}
