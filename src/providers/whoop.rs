// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Whoop developer API (v2).
//!
//! Recovery, sleep and workout collections are paged with `nextToken`.
//! Durations come in milliseconds and energy in kilojoules.

use crate::error::SyncError;
use crate::models::{
    ActivityValues, DateRange, MetricSample, MetricType, MetricValues, Provider, Reading,
    RecoveryValues, SleepValues, ZoneMinutes,
};
use crate::providers::{
    decode_record, native_id, warn_skipped, ApiClient, ProviderAdapter, MAX_PAGES,
};
use crate::time_utils::{format_utc_rfc3339, parse_provider_timestamp};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const PAGE_LIMIT: u32 = 25;
const KJ_PER_KCAL: f64 = 4.184;
const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<Value>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Recovery {
    created_at: Option<String>,
    score: Option<RecoveryScore>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecoveryScore {
    recovery_score: Reading,
    resting_heart_rate: Reading,
    hrv_rmssd_milli: Reading,
    spo2_percentage: Reading,
    skin_temp_celsius: Reading,
}

#[derive(Debug, Deserialize)]
struct Sleep {
    end: Option<String>,
    score: Option<SleepScore>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SleepScore {
    stage_summary: Option<StageSummary>,
    respiratory_rate: Reading,
    sleep_efficiency_percentage: Reading,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageSummary {
    total_in_bed_time_milli: Reading,
    total_awake_time_milli: Reading,
    total_light_sleep_time_milli: Reading,
    total_slow_wave_sleep_time_milli: Reading,
    total_rem_sleep_time_milli: Reading,
}

#[derive(Debug, Deserialize)]
struct Workout {
    start: Option<String>,
    end: Option<String>,
    sport_name: Option<String>,
    score: Option<WorkoutScore>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkoutScore {
    strain: Reading,
    average_heart_rate: Reading,
    max_heart_rate: Reading,
    kilojoule: Reading,
    zone_durations: Option<ZoneDurations>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ZoneDurations {
    zone_zero_milli: Reading,
    zone_one_milli: Reading,
    zone_two_milli: Reading,
    zone_three_milli: Reading,
    zone_four_milli: Reading,
    zone_five_milli: Reading,
}

impl ZoneDurations {
    fn into_minutes(self) -> Vec<ZoneMinutes> {
        [
            self.zone_zero_milli,
            self.zone_one_milli,
            self.zone_two_milli,
            self.zone_three_milli,
            self.zone_four_milli,
            self.zone_five_milli,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, ms)| ZoneMinutes {
            zone: format!("zone_{}", i),
            minutes: ms.map(|v| v / MS_PER_MINUTE),
        })
        .collect()
    }
}

pub struct WhoopAdapter {
    api: ApiClient,
}

impl WhoopAdapter {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Every record of a collection within `range`, pages applied in order.
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
                ("start", format_utc_rfc3339(range.start_datetime())),
                ("end", format_utc_rfc3339(range.end_datetime_exclusive())),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(t) = &next_token {
                query.push(("nextToken", t.clone()));
            }

            let page: Page = self.api.get_json(path, token, &query).await?;
            records.extend(page.records);

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(t) => next_token = Some(t),
                None => return Ok(records),
            }
        }

        tracing::warn!(path, "Whoop pagination stopped at page limit");
        Ok(records)
    }
}

#[async_trait]
impl ProviderAdapter for WhoopAdapter {
    fn provider(&self) -> Provider {
        Provider::Whoop
    }

    async fn fetch_recovery(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/recovery", token, range).await?;
        Ok(records.into_iter().filter_map(recovery_sample).collect())
    }

    async fn fetch_sleep(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/activity/sleep", token, range).await?;
        Ok(records.into_iter().filter_map(sleep_sample).collect())
    }

    async fn fetch_activity(
        &self,
        token: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricSample>, SyncError> {
        let records = self.collect("/activity/workout", token, range).await?;
        Ok(records.into_iter().filter_map(workout_sample).collect())
    }
}

fn recovery_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Recovery;
    let record: Recovery = decode_record(Provider::Whoop, KIND, &raw)?;
    // Recoveries are keyed by the physiological cycle they close.
    let Some(id) = native_id(raw.get("cycle_id")) else {
        warn_skipped(Provider::Whoop, KIND, "missing cycle_id");
        return None;
    };
    let Some(day) = record
        .created_at
        .as_deref()
        .and_then(parse_provider_timestamp)
    else {
        warn_skipped(Provider::Whoop, KIND, "missing created_at");
        return None;
    };

    let score = record.score.unwrap_or_default();
    Some(MetricSample {
        provider: Provider::Whoop,
        metric_date: day.date_naive(),
        source_record_id: id,
        values: MetricValues::Recovery(RecoveryValues {
            recovery_score: score.recovery_score,
            hrv_rmssd_ms: score.hrv_rmssd_milli,
            resting_heart_rate: score.resting_heart_rate,
            spo2_percent: score.spo2_percentage,
            skin_temp_celsius: score.skin_temp_celsius,
        }),
        raw,
    })
}

fn sleep_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Sleep;
    let record: Sleep = decode_record(Provider::Whoop, KIND, &raw)?;
    let Some(id) = native_id(raw.get("id")) else {
        warn_skipped(Provider::Whoop, KIND, "missing id");
        return None;
    };
    // A night belongs to the day the sleeper wakes up.
    let Some(end) = record.end.as_deref().and_then(parse_provider_timestamp) else {
        warn_skipped(Provider::Whoop, KIND, "missing end");
        return None;
    };

    let score = record.score.unwrap_or_default();
    let stages = score.stage_summary.unwrap_or_default();
    let minutes = |r: Reading| r.map(|v| v / MS_PER_MINUTE);
    let deep = minutes(stages.total_slow_wave_sleep_time_milli);
    let light = minutes(stages.total_light_sleep_time_milli);
    let rem = minutes(stages.total_rem_sleep_time_milli);

    Some(MetricSample {
        provider: Provider::Whoop,
        metric_date: end.date_naive(),
        source_record_id: id,
        values: MetricValues::Sleep(SleepValues {
            total_sleep_minutes: deep.sum(light).sum(rem),
            time_in_bed_minutes: minutes(stages.total_in_bed_time_milli),
            deep_sleep_minutes: deep,
            light_sleep_minutes: light,
            rem_sleep_minutes: rem,
            awake_minutes: minutes(stages.total_awake_time_milli),
            efficiency_percent: score.sleep_efficiency_percentage,
            respiratory_rate: score.respiratory_rate,
        }),
        raw,
    })
}

fn workout_sample(raw: Value) -> Option<MetricSample> {
    const KIND: MetricType = MetricType::Activity;
    let record: Workout = decode_record(Provider::Whoop, KIND, &raw)?;
    let Some(id) = native_id(raw.get("id")) else {
        warn_skipped(Provider::Whoop, KIND, "missing id");
        return None;
    };
    let start = record.start.as_deref().and_then(parse_provider_timestamp);
    let Some(start) = start else {
        warn_skipped(Provider::Whoop, KIND, "missing start");
        return None;
    };
    let end = record.end.as_deref().and_then(parse_provider_timestamp);

    let score = record.score.unwrap_or_default();
    let duration = end
        .map(|end| (end - start).num_seconds() as f64 / 60.0)
        .filter(|m| *m >= 0.0);

    Some(MetricSample {
        provider: Provider::Whoop,
        metric_date: start.date_naive(),
        source_record_id: id,
        values: MetricValues::Activity(ActivityValues {
            strain: score.strain,
            calories_kcal: score.kilojoule.map(|kj| kj / KJ_PER_KCAL),
            duration_minutes: duration.into(),
            average_heart_rate: score.average_heart_rate,
            max_heart_rate: score.max_heart_rate,
            steps: Reading::Unknown,
            heart_rate_zones: score
                .zone_durations
                .map(ZoneDurations::into_minutes)
                .unwrap_or_default(),
            activity_names: record.sport_name.into_iter().collect(),
        }),
        raw,
    })
}
