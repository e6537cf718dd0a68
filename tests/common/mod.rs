// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared test fixtures: a stand-in for every provider's OAuth and data API
//! on an ephemeral port, and app state built on the in-memory store, mock
//! KMS and a manual clock.

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wearable_sync::config::Config;
use wearable_sync::db::{FirestoreDb, HealthStore, MemoryDb};
use wearable_sync::middleware::auth::create_jwt;
use wearable_sync::models::{DateRange, IntegrationCredential, Provider};
use wearable_sync::providers::ProviderRegistry;
use wearable_sync::routes::create_router;
use wearable_sync::services::KmsService;
use wearable_sync::time_utils::ManualClock;
use wearable_sync::AppState;

/// Check if emulator is available via environment variable.
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

pub const USER_ID: &str = "user-1";

/// Fixed "now" for every test: 2026-03-03 12:00 UTC.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

/// 2026-03-01 through 2026-03-03.
pub fn test_range() -> DateRange {
    DateRange::new(day(1), day(3)).unwrap()
}

// ─── Mock provider server ────────────────────────────────────

#[derive(Debug, Clone)]
pub enum TokenBehavior {
    Issue { expires_in: i64 },
    InvalidGrant,
    Unavailable,
}

#[derive(Debug, Clone)]
pub enum DataBehavior {
    Fixtures,
    /// Valid envelopes whose numeric fields are not numbers.
    Garbled,
    /// A body that is not JSON at all.
    Malformed,
    Unavailable,
    /// 503 only for paths containing the given fragment.
    UnavailableFor(&'static str),
    RateLimited { retry_after_secs: u64 },
    Unauthorized,
    Delay(std::time::Duration),
}

pub struct ProviderControl {
    token: Mutex<TokenBehavior>,
    token_delay: Mutex<std::time::Duration>,
    data: Mutex<DataBehavior>,
    token_calls: AtomicUsize,
    api_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
    last_bearer: Mutex<Option<String>>,
}

impl Default for ProviderControl {
    fn default() -> Self {
        Self {
            token: Mutex::new(TokenBehavior::Issue { expires_in: 3600 }),
            token_delay: Mutex::new(std::time::Duration::ZERO),
            data: Mutex::new(DataBehavior::Fixtures),
            token_calls: AtomicUsize::new(0),
            api_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            last_bearer: Mutex::new(None),
        }
    }
}

impl ProviderControl {
    pub fn set_token(&self, behavior: TokenBehavior) {
        *self.token.lock().unwrap() = behavior;
    }

    pub fn set_token_delay(&self, delay: std::time::Duration) {
        *self.token_delay.lock().unwrap() = delay;
    }

    pub fn set_data(&self, behavior: DataBehavior) {
        *self.data.lock().unwrap() = behavior;
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    /// Access token on the most recent data request.
    pub fn last_bearer(&self) -> Option<String> {
        self.last_bearer.lock().unwrap().clone()
    }
}

type Controls = Arc<BTreeMap<Provider, Arc<ProviderControl>>>;

pub struct MockProviders {
    pub base_url: String,
    controls: Controls,
}

impl MockProviders {
    pub async fn start() -> Self {
        let controls: Controls = Arc::new(
            Provider::ALL
                .into_iter()
                .map(|p| (p, Arc::new(ProviderControl::default())))
                .collect(),
        );

        let app = Router::new()
            .route("/{provider}/oauth/token", post(token_endpoint))
            .route(
                "/{provider}/oauth/revoke",
                post(revoke_endpoint).delete(revoke_endpoint),
            )
            .route("/{provider}/api/{*path}", get(api_endpoint))
            .with_state(controls.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            controls,
        }
    }

    pub fn control(&self, provider: Provider) -> Arc<ProviderControl> {
        self.controls[&provider].clone()
    }
}

fn lookup(controls: &Controls, provider: &str) -> Option<(Provider, Arc<ProviderControl>)> {
    let provider: Provider = provider.parse().ok()?;
    Some((provider, controls.get(&provider)?.clone()))
}

async fn token_endpoint(
    State(controls): State<Controls>,
    Path(provider): Path<String>,
    Form(_form): Form<HashMap<String, String>>,
) -> Response {
    let Some((provider, control)) = lookup(&controls, &provider) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let n = control.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = *control.token_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let behavior = control.token.lock().unwrap().clone();
    match behavior {
        TokenBehavior::Issue { expires_in } => Json(json!({
            "access_token": format!("{}-access-{}", provider, n),
            "refresh_token": format!("{}-refresh-{}", provider, n),
            "expires_in": expires_in,
            "token_type": "bearer",
            "scope": "read:recovery read:sleep"
        }))
        .into_response(),
        TokenBehavior::InvalidGrant => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Refresh token revoked"})),
        )
            .into_response(),
        TokenBehavior::Unavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response()
        }
    }
}

async fn revoke_endpoint(
    State(controls): State<Controls>,
    Path(provider): Path<String>,
) -> Response {
    let Some((_, control)) = lookup(&controls, &provider) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    control.revoke_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK.into_response()
}

async fn api_endpoint(
    State(controls): State<Controls>,
    Path((provider, path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some((provider, control)) = lookup(&controls, &provider) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    control.api_calls.fetch_add(1, Ordering::SeqCst);
    *control.last_bearer.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    // Next-page links point back at this server.
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("127.0.0.1")
        .to_string();
    let respond = |garbled| fixture(provider, &path, &query, &host, garbled);

    let behavior = control.data.lock().unwrap().clone();
    match behavior {
        DataBehavior::Fixtures => Json(respond(false)).into_response(),
        DataBehavior::Garbled => Json(respond(true)).into_response(),
        DataBehavior::Malformed => {
            (StatusCode::OK, "<html>down for maintenance</html>").into_response()
        }
        DataBehavior::Unavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response()
        }
        DataBehavior::UnavailableFor(fragment) if path.contains(fragment) => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response()
        }
        DataBehavior::UnavailableFor(_) => {
            Json(respond(false)).into_response()
        }
        DataBehavior::RateLimited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            "slow down",
        )
            .into_response(),
        DataBehavior::Unauthorized => (StatusCode::UNAUTHORIZED, "bad token").into_response(),
        DataBehavior::Delay(delay) => {
            tokio::time::sleep(delay).await;
            Json(respond(false)).into_response()
        }
    }
}

/// Canned responses for 2026-03-01..03. Whoop yields 4 records (two
/// recoveries over two pages, one sleep, two workouts on one day), Oura 3,
/// Fitbit 3 (activity over three pages, the last past the range) and
/// Garmin 5 (one upload window per day, with a re-uploaded daily summary).
fn fixture(
    provider: Provider,
    path: &str,
    query: &HashMap<String, String>,
    host: &str,
    garbled: bool,
) -> Value {
    match provider {
        Provider::Whoop => whoop_fixture(path, query, garbled),
        Provider::Oura => oura_fixture(path),
        Provider::Fitbit => fitbit_fixture(path, query, host),
        Provider::Garmin => garmin_fixture(path, query),
    }
}

fn whoop_fixture(path: &str, query: &HashMap<String, String>, garbled: bool) -> Value {
    match path {
        "recovery" if query.get("nextToken").map(String::as_str) == Some("page-2") => json!({
            "records": [{
                "cycle_id": 93846,
                "created_at": "2026-03-03T11:02:10.000Z",
                "score_state": "SCORED",
                "score": {"recovery_score": 71, "resting_heart_rate": 58, "hrv_rmssd_milli": 44.2}
            }],
            "next_token": null
        }),
        "recovery" if garbled => json!({
            "records": [{
                "cycle_id": 93845,
                "created_at": "2026-03-02T11:25:44.774Z",
                "score_state": "SCORED",
                "score": {
                    "recovery_score": "n/a",
                    "resting_heart_rate": null,
                    "hrv_rmssd_milli": {"value": 31.8},
                    "spo2_percentage": "95.6"
                }
            }],
            "next_token": "page-2"
        }),
        "recovery" => json!({
            "records": [{
                "cycle_id": 93845,
                "created_at": "2026-03-02T11:25:44.774Z",
                "score_state": "SCORED",
                "score": {
                    "recovery_score": 44,
                    "resting_heart_rate": 64,
                    "hrv_rmssd_milli": 31.813562,
                    "spo2_percentage": 95.6875,
                    "skin_temp_celsius": 33.7
                }
            }],
            "next_token": "page-2"
        }),
        "activity/sleep" => json!({
            "records": [{
                "id": "ecfc6a15-4661-442f-a9a4-f160dd7afae8",
                "start": "2026-03-01T23:10:00.000Z",
                "end": "2026-03-02T06:40:00.000Z",
                "score": {
                    "stage_summary": {
                        "total_in_bed_time_milli": 27_000_000,
                        "total_awake_time_milli": 1_800_000,
                        "total_light_sleep_time_milli": 14_400_000,
                        "total_slow_wave_sleep_time_milli": 5_400_000,
                        "total_rem_sleep_time_milli": 5_400_000
                    },
                    "respiratory_rate": 16.11,
                    "sleep_efficiency_percentage": 91.7
                }
            }],
            "next_token": null
        }),
        "activity/workout" => json!({
            "records": [
                {
                    "id": "w-1",
                    "start": "2026-03-02T07:00:00.000Z",
                    "end": "2026-03-02T07:45:00.000Z",
                    "sport_name": "running",
                    "score": {"strain": 8.2, "average_heart_rate": 140, "max_heart_rate": 171, "kilojoule": 1673.6}
                },
                {
                    "id": "w-2",
                    "start": "2026-03-02T17:00:00.000Z",
                    "end": "2026-03-02T18:00:00.000Z",
                    "sport_name": "cycling",
                    "score": {"strain": 10.1, "average_heart_rate": 132, "max_heart_rate": 165, "kilojoule": 2092.0}
                }
            ],
            "next_token": null
        }),
        _ => json!({"records": [], "next_token": null}),
    }
}

fn oura_fixture(path: &str) -> Value {
    match path {
        "daily_readiness" => json!({
            "data": [{"id": "r-1", "day": "2026-03-02", "score": 82}],
            "next_token": null
        }),
        "sleep" => json!({
            "data": [{
                "id": "s-1",
                "day": "2026-03-02",
                "total_sleep_duration": 26_100,
                "time_in_bed": 28_800,
                "deep_sleep_duration": 5_400,
                "light_sleep_duration": 14_400,
                "rem_sleep_duration": 6_300,
                "awake_time": 2_700,
                "efficiency": 91,
                "average_breath": 14.875
            }],
            "next_token": null
        }),
        "daily_activity" => json!({
            "data": [{
                "id": "a-1",
                "day": "2026-03-02",
                "active_calories": 512,
                "steps": 9312,
                "high_activity_time": 600,
                "medium_activity_time": 1_800,
                "low_activity_time": 3_600
            }],
            "next_token": null
        }),
        _ => json!({"data": [], "next_token": null}),
    }
}

fn fitbit_fixture(path: &str, query: &HashMap<String, String>, host: &str) -> Value {
    if path.contains("hrv/date") {
        return json!({"hrv": [{"dateTime": "2026-03-02", "value": {"dailyRmssd": 38.2}}]});
    }
    if path.contains("activities/heart") {
        return json!({"activities-heart": [{"dateTime": "2026-03-02", "value": {"restingHeartRate": 58}}]});
    }
    if path.contains("sleep/date") {
        return json!({"sleep": []});
    }

    let next = |offset: u32| {
        format!(
            "http://{}/fitbit/api/1/user/-/activities/list.json?afterDate=2026-03-01T00:00:00&sort=asc&offset={}&limit=100",
            host, offset
        )
    };
    let log = |id: u64, start: &str, calories: u32, minutes: u64, steps: u32| {
        json!({
            "logId": id,
            "activityName": "Walk",
            "startTime": start,
            "calories": calories,
            "activeDuration": minutes * 60_000,
            "averageHeartRate": 110,
            "steps": steps
        })
    };

    match query.get("offset").map(String::as_str) {
        Some("2") => json!({
            // Sorted ascending: the first log past the range ends the walk.
            "activities": [log(104, "2026-03-05T08:00:00.000-08:00", 150, 20, 2000)],
            "pagination": {"next": next(3)}
        }),
        Some("1") => json!({
            "activities": [
                log(102, "2026-03-02T07:00:00.000-08:00", 200, 30, 3000),
                log(103, "2026-03-02T18:00:00.000-08:00", 100, 15, 1500)
            ],
            "pagination": {"next": next(2)}
        }),
        _ => json!({
            "activities": [log(101, "2026-03-01T23:30:00.000-08:00", 250, 40, 4000)],
            "pagination": {"next": next(1)}
        }),
    }
}

/// Garmin summaries by upload window. The window starting 2026-03-03
/// re-uploads the 2026-03-02 daily with updated totals.
fn garmin_fixture(path: &str, query: &HashMap<String, String>) -> Value {
    let window = query
        .get("uploadStartTimeInSeconds")
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|t| t.date_naive());
    let daily = |date: &str, steps: u32, kcal: u32, rhr: u32| {
        json!({
            "summaryId": format!("sd-{}", date),
            "calendarDate": date,
            "steps": steps,
            "activeKilocalories": kcal,
            "activeTimeInSeconds": 3600,
            "averageHeartRateInBeatsPerMinute": 72,
            "maxHeartRateInBeatsPerMinute": 150,
            "restingHeartRateInBeatsPerMinute": rhr
        })
    };

    match (path, window) {
        ("dailies", Some(w)) if w == day(1) => json!([
            // Uploaded late for a day before the range.
            daily("2026-02-28", 12000, 700, 55),
            daily("2026-03-01", 6000, 400, 54)
        ]),
        ("dailies", Some(w)) if w == day(2) => json!([daily("2026-03-02", 8000, 500, 52)]),
        ("dailies", Some(w)) if w == day(3) => json!([
            daily("2026-03-02", 9000, 550, 51),
            daily("2026-03-03", 4000, 250, 53)
        ]),
        ("hrv", Some(w)) if w == day(2) => json!([{
            "summaryId": "hrv-2026-03-02",
            "calendarDate": "2026-03-02",
            "lastNightAvg": 41
        }]),
        ("sleeps", Some(w)) if w == day(2) => json!([{
            "summaryId": "sl-2026-03-02",
            "calendarDate": "2026-03-02",
            "durationInSeconds": 28_800,
            "deepSleepDurationInSeconds": 5_400,
            "lightSleepDurationInSeconds": 14_400,
            "remSleepInSeconds": 6_000,
            "awakeDurationInSeconds": 3_000
        }]),
        _ => json!([]),
    }
}

// ─── App harness ─────────────────────────────────────────────

pub struct TestHarness {
    pub mock: MockProviders,
    pub db: MemoryDb,
    pub kms: KmsService,
    pub clock: Arc<ManualClock>,
    pub registry: ProviderRegistry,
    pub state: Arc<AppState>,
}

pub async fn harness() -> TestHarness {
    harness_with(|_| {}).await
}

pub async fn harness_with(configure: impl FnOnce(&mut Config)) -> TestHarness {
    let mock = MockProviders::start().await;

    let mut config = Config::test_default();
    config.provider_base_url = Some(mock.base_url.clone());
    config.frontend_url = "https://app.example.com".to_string();
    configure(&mut config);

    let db = MemoryDb::new();
    let kms = KmsService::new_mock();
    let clock = Arc::new(ManualClock::new(test_now()));
    let registry = ProviderRegistry::from_config(&config).expect("registry");
    let state = Arc::new(AppState::new(
        config,
        Arc::new(db.clone()),
        kms.clone(),
        registry.clone(),
        clock.clone(),
    ));

    TestHarness {
        mock,
        db,
        kms,
        clock,
        registry,
        state,
    }
}

impl TestHarness {
    /// Store an active credential whose tokens are `{provider}-seed-access`
    /// and `{provider}-seed-refresh`.
    pub async fn seed_credential(
        &self,
        user_id: &str,
        provider: Provider,
        expires_at: DateTime<Utc>,
    ) {
        let access = self
            .kms
            .encrypt(&format!("{}-seed-access", provider))
            .await
            .unwrap();
        let refresh = self
            .kms
            .encrypt(&format!("{}-seed-refresh", provider))
            .await
            .unwrap();

        self.db
            .put_credential(&IntegrationCredential {
                user_id: user_id.to_string(),
                provider,
                access_token_encrypted: access,
                refresh_token_encrypted: Some(refresh),
                expires_at,
                connected_at: test_now() - Duration::days(30),
                last_sync_at: None,
                active: true,
                grant_rejected: false,
                scopes: vec!["read".to_string()],
            })
            .await
            .unwrap();
    }

    /// Store a credential valid for another hour.
    pub async fn seed_valid(&self, user_id: &str, provider: Provider) {
        self.seed_credential(user_id, provider, test_now() + Duration::hours(1))
            .await;
    }

    pub async fn credential(&self, user_id: &str, provider: Provider) -> IntegrationCredential {
        self.db
            .get_credential(user_id, provider)
            .await
            .unwrap()
            .expect("credential stored")
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn bearer(&self, user_id: &str) -> String {
        let jwt = create_jwt(user_id, &self.state.config.jwt_signing_key).unwrap();
        format!("Bearer {}", jwt)
    }
}
