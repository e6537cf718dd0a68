// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit Web API.
//!
//! Recovery has no single endpoint: it is assembled per day from the HRV
//! summary and the resting heart rate in the daily heart summary. The
//! activity log list is paged through absolute `pagination.next` links.

use crate::error::SyncError;
use crate::models::{
    ActivityValues, DateRange, MetricSample, MetricType, MetricValues, Provider, Reading,
    RecoveryValues, SleepValues, ZoneMinutes,
};
use crate::providers::{
    decode_record, native_id, warn_skipped, ApiClient, ProviderAdapter, MAX_PAGES,
};
use crate::time_utils::{local_day, parse_day};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const ACTIVITY_PAGE_LIMIT: u32 = 100;
const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Deserialize)]
struct HrvResponse {
    #[serde(default)]
    hrv: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct HeartResponse {
    #[serde(rename = "activities-heart", default)]
    days: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DailyHrv {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    #[serde(default)]
    value: HrvValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HrvValue {
    daily_rmssd: Reading,
}

#[derive(Debug, Deserialize)]
struct DailyHeart {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    #[serde(default)]
    value: HeartValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HeartValue {
    resting_heart_rate: Reading,
}

#[derive(Debug, Deserialize)]
struct SleepResponse {
    #[serde(default)]
    sleep: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SleepLog {
    date_of_sleep: Option<String>,
    #[serde(default)]
    minutes_asleep: Reading,
    #[serde(default)]
    time_in_bed: Reading,
    #[serde(default)]
    minutes_awake: Reading,
    #[serde(default)]
    efficiency: Reading,
    levels: Option<SleepLevels>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SleepLevels {
    summary: BTreeMap<String, StageSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageSummary {
    minutes: Reading,
}

#[derive(Debug, Deserialize)]
struct ActivityListResponse {
    #[serde(default)]
    activities: Vec<Value>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Pagination {
    next: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityLog {
    start_time: Option<String>,
    activity_name: Option<String>,
    #[serde(default)]
    calories: Reading,
    #[serde(default)]
    active_duration: Reading,
    #[serde(default)]
    duration: Reading,
    #[serde(default)]
    average_heart_rate: Reading,
    #[serde(default)]
    steps: Reading,
    #[serde(default)]
    heart_rate_zones: Vec<ZoneLog>,
}

#[derive(Debug, Deserialize)]
struct ZoneLog {
    name: Option<String>,
    #[serde(default)]
    minutes: Reading,
}

pub struct FitbitAdapter {
    api: ApiClient,
}

impl FitbitAdapter {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ProviderAdapter for FitbitAdapter {
    fn provider(&self) -> Provider {
        Provider::Fitbit
    }

    async fn fetch_recovery(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let hrv: HrvResponse = self
            .api
            .get_json(
                &format!("/1/user/-/hrv/date/{}/{}.json", range.start(), range.end()),
                token,
                &[],
            )
            .await?;
        let heart: HeartResponse = self
            .api
            .get_json(
                &format!(
                    "/1/user/-/activities/heart/date/{}/{}.json",
                    range.start(),
                    range.end()
                ),
                token,
                &[],
            )
            .await?;

        Ok(recovery_samples(hrv.hrv, heart.days))
    }

    async fn fetch_sleep(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let response: SleepResponse = self
            .api
            .get_json(
                &format!("/1.2/user/-/sleep/date/{}/{}.json", range.start(), range.end()),
                token,
                &[],
            )
            .await?;
        Ok(response.sleep.into_iter().filter_map(sleep_sample).collect())
    }

    async fn fetch_activity(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let mut samples = Vec::new();
        let mut page: ActivityListResponse = self
            .api
            .get_json(
                "/1/user/-/activities/list.json",
                token,
                &[
                    ("afterDate", format!("{}T00:00:00", range.start())),
                    ("sort", "asc".to_string()),
                    ("offset", "0".to_string()),
                    ("limit", ACTIVITY_PAGE_LIMIT.to_string()),
                ],
            )
            .await?;

        for _ in 0..MAX_PAGES {
            for raw in std::mem::take(&mut page.activities) {
                let Some(sample) = activity_sample(raw) else {
                    continue;
                };
                // Sorted ascending, so the first day past the range ends the walk.
                if sample.metric_date > range.end() {
                    return Ok(samples);
                }
                samples.push(sample);
            }

            let next = page.pagination.take().map(|p| p.next).unwrap_or_default();
            if next.is_empty() {
                return Ok(samples);
            }
            page = self.api.get_url(&next, token, &[]).await?;
        }

        tracing::warn!("Fitbit activity pagination stopped at page limit");
        Ok(samples)
    }
}

fn recovery_samples(hrv: Vec<Value>, heart: Vec<Value>) -> Vec<MetricSample> {
    const KIND: MetricType = MetricType::Recovery;
    let mut days: BTreeMap<NaiveDate, (RecoveryValues, Vec<Value>)> = BTreeMap::new();

    for raw in hrv {
        let Some(entry) = decode_record::<DailyHrv>(Provider::Fitbit, KIND, &raw) else {
            continue;
        };
        let Some(day) = entry.date_time.as_deref().and_then(parse_day) else {
            warn_skipped(Provider::Fitbit, KIND, "hrv entry without dateTime");
            continue;
        };
        let slot = days.entry(day).or_default();
        slot.0.hrv_rmssd_ms = entry.value.daily_rmssd;
        slot.1.push(json!({ "hrv": raw }));
    }

    for raw in heart {
        let Some(entry) = decode_record::<DailyHeart>(Provider::Fitbit, KIND, &raw) else {
            continue;
        };
        let Some(day) = entry.date_time.as_deref().and_then(parse_day) else {
            warn_skipped(Provider::Fitbit, KIND, "heart entry without dateTime");
            continue;
        };
        let slot = days.entry(day).or_default();
        slot.0.resting_heart_rate = entry.value.resting_heart_rate;
        slot.1.push(json!({ "heart": raw }));
    }

    days.into_iter()
        .map(|(day, (values, raws))| MetricSample {
            provider: Provider::Fitbit,
            metric_date: day,
            // Daily summaries have no ID of their own; the day is the key.
            source_record_id: day.to_string(),
            values: MetricValues::Recovery(values),
            raw: Value::Array(raws),
        })
        .collect()
}

fn sleep_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Sleep;
    let log: SleepLog = decode_record(Provider::Fitbit, KIND, &raw)?;
    let Some(id) = native_id(raw.get("logId")) else {
        warn_skipped(Provider::Fitbit, KIND, "missing logId");
        return None;
    };
    let Some(day) = log.date_of_sleep.as_deref().and_then(parse_day) else {
        warn_skipped(Provider::Fitbit, KIND, "missing dateOfSleep");
        return None;
    };

    let stages = log.levels.unwrap_or_default().summary;
    let stage = |name: &str| stages.get(name).map(|s| s.minutes).unwrap_or_default();

    Some(MetricSample {
        provider: Provider::Fitbit,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Sleep(SleepValues {
            total_sleep_minutes: log.minutes_asleep,
            time_in_bed_minutes: log.time_in_bed,
            deep_sleep_minutes: stage("deep"),
            light_sleep_minutes: stage("light"),
            rem_sleep_minutes: stage("rem"),
            awake_minutes: log.minutes_awake,
            efficiency_percent: log.efficiency,
            respiratory_rate: Reading::Unknown,
        }),
        raw,
    })
}

fn activity_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Activity;
    let log: ActivityLog = decode_record(Provider::Fitbit, KIND, &raw)?;
    let Some(id) = native_id(raw.get("logId")) else {
        warn_skipped(Provider::Fitbit, KIND, "missing logId");
        return None;
    };
    // startTime carries the wearer's offset; the log belongs to that local day.
    let Some(day) = log.start_time.as_deref().and_then(local_day) else {
        warn_skipped(Provider::Fitbit, KIND, "missing startTime");
        return None;
    };

    let duration_ms = log.active_duration.or(log.duration);
    Some(MetricSample {
        provider: Provider::Fitbit,
        metric_date: day,
        source_record_id: id,
        values: MetricValues::Activity(ActivityValues {
            strain: Reading::Unknown,
            calories_kcal: log.calories,
            duration_minutes: duration_ms.map(|v| v / MS_PER_MINUTE),
            average_heart_rate: log.average_heart_rate,
            max_heart_rate: Reading::Unknown,
            steps: log.steps,
            heart_rate_zones: log
                .heart_rate_zones
                .into_iter()
                .filter_map(|z| {
                    Some(ZoneMinutes {
                        zone: z.name?,
                        minutes: z.minutes,
                    })
                })
                .collect(),
            activity_names: log.activity_name.into_iter().collect(),
        }),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_recovery_merges_hrv_and_heart_by_day() {
        let hrv = vec![
            json!({"dateTime": "2026-03-01", "value": {"dailyRmssd": 34.5, "deepRmssd": 30.1}}),
            json!({"dateTime": "2026-03-02", "value": {"dailyRmssd": 41.0}}),
        ];
        let heart = vec![
            json!({"dateTime": "2026-03-01", "value": {"restingHeartRate": 58}}),
            json!({"dateTime": "2026-03-03", "value": {"heartRateZones": []}}),
        ];

        let samples = recovery_samples(hrv, heart);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].metric_date, day(1));
        assert_eq!(samples[0].source_record_id, "2026-03-01");
        let MetricValues::Recovery(first) = &samples[0].values else {
            panic!("expected recovery");
        };
        assert_eq!(first.hrv_rmssd_ms, Reading::Value(34.5));
        assert_eq!(first.resting_heart_rate, Reading::Value(58.0));
        assert!(first.recovery_score.is_unknown());

        let MetricValues::Recovery(third) = &samples[2].values else {
            panic!("expected recovery");
        };
        assert!(third.resting_heart_rate.is_unknown());
        assert!(third.hrv_rmssd_ms.is_unknown());
    }

    #[test]
    fn test_sleep_stages() {
        let raw = json!({
            "logId": 26589710670_u64,
            "dateOfSleep": "2026-03-02",
            "isMainSleep": true,
            "minutesAsleep": 412,
            "minutesAwake": 38,
            "timeInBed": 450,
            "efficiency": 92,
            "levels": {
                "summary": {
                    "deep": {"count": 4, "minutes": 71},
                    "light": {"count": 28, "minutes": 245},
                    "rem": {"count": 6, "minutes": 96},
                    "wake": {"count": 27, "minutes": 38}
                }
            }
        });
        let sample = sleep_sample(raw).unwrap();
        assert_eq!(sample.source_record_id, "26589710670");
        let MetricValues::Sleep(values) = sample.values else {
            panic!("expected sleep");
        };
        assert_eq!(values.deep_sleep_minutes, Reading::Value(71.0));
        assert_eq!(values.rem_sleep_minutes, Reading::Value(96.0));
        assert!(values.respiratory_rate.is_unknown());
    }

    #[test]
    fn test_classic_sleep_without_stages() {
        let raw = json!({
            "logId": 1,
            "dateOfSleep": "2026-03-02",
            "minutesAsleep": 300,
            "levels": {"summary": {"asleep": {"minutes": 300}}}
        });
        let MetricValues::Sleep(values) = sleep_sample(raw).unwrap().values else {
            panic!("expected sleep");
        };
        assert_eq!(values.total_sleep_minutes, Reading::Value(300.0));
        assert!(values.deep_sleep_minutes.is_unknown());
    }

    #[test]
    fn test_activity_uses_local_day() {
        let raw = json!({
            "logId": 5401,
            "activityName": "Walk",
            "startTime": "2026-03-01T23:10:00.000-08:00",
            "calories": 180,
            "activeDuration": 1_800_000,
            "duration": 2_000_000,
            "averageHeartRate": 101,
            "steps": 3120,
            "heartRateZones": [
                {"name": "Fat Burn", "minutes": 22, "min": 98, "max": 136},
                {"minutes": 3}
            ]
        });
        let sample = activity_sample(raw).unwrap();
        assert_eq!(sample.metric_date, day(1));
        let MetricValues::Activity(values) = sample.values else {
            panic!("expected activity");
        };
        assert_eq!(values.duration_minutes, Reading::Value(30.0));
        assert_eq!(values.heart_rate_zones.len(), 1);
        assert_eq!(values.heart_rate_zones[0].zone, "Fat Burn");
        assert_eq!(values.activity_names, vec!["Walk"]);
    }
}
