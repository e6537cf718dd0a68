// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Garmin Health (wellness) API.
//!
//! Summaries are queried by upload time, at most 24 hours per request, so a
//! range is walked as consecutive one-day windows. A window can return
//! summaries for earlier calendar days; those outside the range are dropped.

use crate::error::SyncError;
use crate::models::{
    ActivityValues, DateRange, MetricSample, MetricType, MetricValues, Provider, Reading,
    RecoveryValues, SleepValues,
};
use crate::providers::{decode_record, native_id, warn_skipped, ApiClient, ProviderAdapter};
use crate::time_utils::parse_day;
use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;

const WINDOW_SECS: i64 = 24 * 60 * 60;
const SECS_PER_MINUTE: f64 = 60.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Daily {
    calendar_date: Option<String>,
    #[serde(default)]
    steps: Reading,
    #[serde(default)]
    active_kilocalories: Reading,
    #[serde(default)]
    active_time_in_seconds: Reading,
    #[serde(default)]
    average_heart_rate_in_beats_per_minute: Reading,
    #[serde(default)]
    max_heart_rate_in_beats_per_minute: Reading,
    #[serde(default)]
    resting_heart_rate_in_beats_per_minute: Reading,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hrv {
    calendar_date: Option<String>,
    #[serde(default)]
    last_night_avg: Reading,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sleep {
    calendar_date: Option<String>,
    #[serde(default)]
    duration_in_seconds: Reading,
    #[serde(default)]
    deep_sleep_duration_in_seconds: Reading,
    #[serde(default)]
    light_sleep_duration_in_seconds: Reading,
    #[serde(default)]
    rem_sleep_in_seconds: Reading,
    #[serde(default)]
    awake_duration_in_seconds: Reading,
}

pub struct GarminAdapter {
    api: ApiClient,
}

impl GarminAdapter {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Every summary uploaded during `range`, one window at a time.
    async fn collect(
        &self,
        path: &str,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<Value>, SyncError> {
        let mut records = Vec::new();
        let mut window_start = range.start_datetime();
        let end = range.end_datetime_exclusive();

        while window_start < end {
            let window_end = (window_start + Duration::seconds(WINDOW_SECS)).min(end);
            let page: Vec<Value> = self
                .api
                .get_json(
                    path,
                    token,
                    &[
                        (
                            "uploadStartTimeInSeconds",
                            window_start.timestamp().to_string(),
                        ),
                        ("uploadEndTimeInSeconds", window_end.timestamp().to_string()),
                    ],
                )
                .await?;
            records.extend(page);
            window_start = window_end;
        }

        Ok(records)
    }
}

#[async_trait]
impl ProviderAdapter for GarminAdapter {
    fn provider(&self) -> Provider {
        Provider::Garmin
    }

    async fn fetch_recovery(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let hrv = self.collect("/hrv", token, range).await?;
        let dailies = self.collect("/dailies", token, range).await?;
        Ok(recovery_samples(hrv, dailies, range))
    }

    async fn fetch_sleep(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/sleeps", token, range).await?;
        Ok(records
            .into_iter()
            .filter_map(sleep_sample)
            .filter(|s| range.contains(s.metric_date))
            .collect())
    }

    async fn fetch_activity(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/dailies", token, range).await?;
        Ok(records
            .into_iter()
            .filter_map(daily_activity_sample)
            .filter(|s| range.contains(s.metric_date))
            .collect())
    }
}

/// Summary ID and calendar day, or `None` (with a warning) if either is missing.
fn keyed(kind: MetricType, raw: &Value, day: Option<&str>) -> Option<(String, chrono::NaiveDate)> {
    let Some(id) = native_id(raw.get("summaryId")) else {
        warn_skipped(Provider::Garmin, kind, "missing summaryId");
        return None;
    };
    let Some(day) = day.and_then(parse_day) else {
        warn_skipped(Provider::Garmin, kind, "missing calendarDate");
        return None;
    };
    Some((id, day))
}

/// HRV summaries, with resting heart rate filled in from the same day's daily.
fn recovery_samples(hrv: Vec<Value>, dailies: Vec<Value>, range: &DateRange) -> Vec<MetricSample> {
    const KIND: MetricType = MetricType::Recovery;

    let mut samples: Vec<MetricSample> = hrv
        .into_iter()
        .filter_map(|raw| {
            let record: Hrv = decode_record(Provider::Garmin, KIND, &raw)?;
            let (id, day) = keyed(KIND, &raw, record.calendar_date.as_deref())?;
            Some(MetricSample {
                provider: Provider::Garmin,
                metric_date: day,
                source_record_id: id,
                values: MetricValues::Recovery(RecoveryValues {
                    hrv_rmssd_ms: record.last_night_avg,
                    ..RecoveryValues::default()
                }),
                raw,
            })
        })
        .filter(|s| range.contains(s.metric_date))
        .collect();

    for raw in dailies {
        let Some(daily) = decode_record::<Daily>(Provider::Garmin, KIND, &raw) else {
            continue;
        };
        let Some(day) = daily.calendar_date.as_deref().and_then(parse_day) else {
            continue;
        };
        if let Some(MetricValues::Recovery(values)) = samples
            .iter_mut()
            .find(|s| s.metric_date == day)
            .map(|s| &mut s.values)
        {
            values.resting_heart_rate = daily
                .resting_heart_rate_in_beats_per_minute
                .or(values.resting_heart_rate);
        }
    }

    samples
}

fn sleep_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Sleep;
    let record: Sleep = decode_record(Provider::Garmin, KIND, &raw)?;
    let (id, day) = keyed(KIND, &raw, record.calendar_date.as_deref())?;
    let minutes = |r: Reading| r.map(|v| v / SECS_PER_MINUTE);

    let deep = minutes(record.deep_sleep_duration_in_seconds);
    let light = minutes(record.light_sleep_duration_in_seconds);
    let rem = minutes(record.rem_sleep_in_seconds);
    let awake = minutes(record.awake_duration_in_seconds);

    Some(MetricSample {
        provider: Provider::Garmin,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Sleep(SleepValues {
            total_sleep_minutes: deep.sum(light).sum(rem),
            time_in_bed_minutes: minutes(record.duration_in_seconds),
            deep_sleep_minutes: deep,
            light_sleep_minutes: light,
            rem_sleep_minutes: rem,
            awake_minutes: awake,
            efficiency_percent: Reading::Unknown,
            respiratory_rate: Reading::Unknown,
        }),
        raw,
    })
}

fn daily_activity_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Activity;
    let record: Daily = decode_record(Provider::Garmin, KIND, &raw)?;
    let (id, day) = keyed(KIND, &raw, record.calendar_date.as_deref())?;

    Some(MetricSample {
        provider: Provider::Garmin,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Activity(ActivityValues {
            calories_kcal: record.active_kilocalories,
            duration_minutes: record.active_time_in_seconds.map(|v| v / SECS_PER_MINUTE),
            average_heart_rate: record.average_heart_rate_in_beats_per_minute,
            max_heart_rate: record.max_heart_rate_in_beats_per_minute,
            steps: record.steps,
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

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_recovery_takes_resting_hr_from_dailies() {
        let hrv = vec![
            json!({"summaryId": "hrv-1", "calendarDate": "2026-03-01", "lastNightAvg": 44}),
            json!({"summaryId": "hrv-0", "calendarDate": "2026-02-20", "lastNightAvg": 40}),
        ];
        let dailies = vec![json!({
            "summaryId": "d-1",
            "calendarDate": "2026-03-01",
            "restingHeartRateInBeatsPerMinute": 52
        })];

        let samples = recovery_samples(hrv, dailies, &range());
        assert_eq!(samples.len(), 1);
        let MetricValues::Recovery(values) = &samples[0].values else {
            panic!("expected recovery");
        };
        assert_eq!(values.hrv_rmssd_ms, Reading::Value(44.0));
        assert_eq!(values.resting_heart_rate, Reading::Value(52.0));
    }

    #[test]
    fn test_sleep_mapping() {
        let raw = json!({
            "summaryId": "x-1",
            "calendarDate": "2026-03-02",
            "durationInSeconds": 27_000,
            "deepSleepDurationInSeconds": 4_800,
            "lightSleepDurationInSeconds": 15_000,
            "remSleepInSeconds": 5_400,
            "awakeDurationInSeconds": 1_800
        });
        let MetricValues::Sleep(values) = sleep_sample(raw).unwrap().values else {
            panic!("expected sleep");
        };
        assert_eq!(values.total_sleep_minutes, Reading::Value(420.0));
        assert_eq!(values.time_in_bed_minutes, Reading::Value(450.0));
        assert!(values.efficiency_percent.is_unknown());
    }

    #[test]
    fn test_daily_activity_mapping() {
        let raw = json!({
            "summaryId": "d-2",
            "calendarDate": "2026-03-02",
            "steps": 11_043,
            "activeKilocalories": 640,
            "activeTimeInSeconds": 5_400,
            "maxHeartRateInBeatsPerMinute": 161
        });
        let MetricValues::Activity(values) = daily_activity_sample(raw).unwrap().values else {
            panic!("expected activity");
        };
        assert_eq!(values.steps, Reading::Value(11043.0));
        assert_eq!(values.duration_minutes, Reading::Value(90.0));
        assert!(values.average_heart_rate.is_unknown());
    }
}
