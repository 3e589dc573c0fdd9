use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use diagnosis_common::llm::LlmClient;

use crate::analyzer::{Analyzer, NextQuestion};
use crate::auth;
use crate::catalog::{self, ServiceEntry};
use crate::config::Config;
use crate::error::AppError;
use crate::model::{AnswerSet, DiagnosisRecord, DiagnosisResult};
use crate::questionnaire::{Question, Version};
use crate::rate_limit::RateLimiter;
use crate::store::{self, RecordStore, Stats};

const DEFAULT_ADMIN_LIMIT: usize = 50;
const MAX_ADMIN_LIMIT: usize = 500;

/// Product events the front end reports. Counters exist only for these names.
const KNOWN_EVENTS: &[&str] = &[
    "questionnaire_started",
    "question_answered",
    "partial_diagnosis_viewed",
    "diagnosis_completed",
    "result_shared",
    "recommendation_viewed",
    "recommendation_clicked",
];

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Analyzer,
    pub store: RecordStore,
    pub config: Arc<Config>,
    pub limiter: Option<RateLimiter>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        llm: Arc<LlmClient>,
        store: RecordStore,
        limiter: Option<RateLimiter>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build analytics http client: {e}")))?;
        Ok(Self {
            analyzer: Analyzer::new(llm, &config),
            store,
            config: Arc::new(config),
            limiter,
            http,
        })
    }

    async fn check_rate(&self) -> Result<(), AppError> {
        match &self.limiter {
            Some(limiter) => limiter.check().await,
            None => Ok(()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/records", get(admin_records))
        .route("/admin/stats", get(admin_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/api/questionnaires/{version}", get(questionnaire))
        .route("/api/services", get(services))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/answers", put(sync_answers))
        .route("/api/sessions/{id}/clicks", post(record_click))
        .route("/api/questions/next", post(next_question))
        .route("/api/diagnose/partial", post(diagnose_partial))
        .route("/api/diagnose", post(diagnose))
        .route("/api/events", post(track_event))
        .route("/go/{service_id}", get(go))
        .merge(admin)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store_available": state.store.is_available().await,
    }))
}

#[derive(Debug, Serialize)]
struct QuestionnaireBody {
    version: Version,
    conversational: bool,
    questions: &'static [Question],
}

async fn questionnaire(Path(version): Path<String>) -> Result<Json<QuestionnaireBody>, AppError> {
    let version: Version = version.parse()?;
    Ok(Json(QuestionnaireBody {
        version,
        conversational: version.is_conversational(),
        questions: version.questions(),
    }))
}

async fn services() -> Json<&'static [ServiceEntry]> {
    Json(catalog::all())
}

#[derive(Debug, Deserialize)]
struct CreateSessionParams {
    version: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(params): Json<CreateSessionParams>,
) -> Result<(StatusCode, Json<DiagnosisRecord>), AppError> {
    let version: Version = params.version.parse()?;
    let record = state.store.create(version).await?;
    info!(session_id = %record.session_id, %version, "session created");
    Ok((StatusCode::CREATED, Json(record)))
}

fn session_id(raw: &str) -> Result<&str, AppError> {
    if store::is_valid_session_id(raw) {
        Ok(raw)
    } else {
        Err(AppError::BadRequest(format!("malformed session id {raw:?}")))
    }
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DiagnosisRecord>, AppError> {
    let id = session_id(&id)?;
    let record = state
        .store
        .load(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct SyncAnswersParams {
    answers: AnswerSet,
}

async fn sync_answers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<SyncAnswersParams>,
) -> Result<Json<DiagnosisRecord>, AppError> {
    let id = session_id(&id)?;
    let record = state
        .store
        .update_answers(id, params.answers)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct ClickParams {
    service_id: String,
}

async fn record_click(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<ClickParams>,
) -> Result<Json<Value>, AppError> {
    let id = session_id(&id)?;
    if catalog::find(&params.service_id).is_none() {
        return Err(AppError::NotFound(format!("service {}", params.service_id)));
    }
    let record = state
        .store
        .record_click(id, &params.service_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    Ok(Json(json!({ "recorded": true, "clicks": record.clicks.len() })))
}

#[derive(Debug, Deserialize)]
struct AnswersParams {
    version: String,
    #[serde(default)]
    answers: AnswerSet,
    /// Persist the final result onto this session when given.
    #[serde(default)]
    session_id: Option<String>,
}

async fn next_question(
    State(state): State<AppState>,
    Json(params): Json<AnswersParams>,
) -> Result<Json<NextQuestion>, AppError> {
    let version: Version = params.version.parse()?;
    state.check_rate().await?;
    Ok(Json(state.analyzer.next_question(version, &params.answers).await))
}

async fn diagnose_partial(
    State(state): State<AppState>,
    Json(params): Json<AnswersParams>,
) -> Result<Json<DiagnosisResult>, AppError> {
    let version: Version = params.version.parse()?;
    state.check_rate().await?;
    Ok(Json(state.analyzer.diagnose_partial(version, &params.answers).await))
}

async fn diagnose(
    State(state): State<AppState>,
    Json(params): Json<AnswersParams>,
) -> Result<Json<DiagnosisResult>, AppError> {
    let version: Version = params.version.parse()?;
    state.check_rate().await?;
    let result = state.analyzer.diagnose(version, &params.answers).await;

    if let Some(id) = params.session_id.as_deref() {
        persist_result(&state.store, id, &params.answers, &result).await;
    }
    Ok(Json(result))
}

/// Failures are logged and never reach the caller.
async fn persist_result(
    store: &RecordStore,
    id: &str,
    answers: &AnswerSet,
    result: &DiagnosisResult,
) {
    if !store::is_valid_session_id(id) {
        warn!(session_id = id, "not persisting result for malformed session id");
        return;
    }
    match store.attach_result(id, answers, result).await {
        Ok(Some(_)) => info!(session_id = id, "diagnosis persisted"),
        Ok(None) => warn!(session_id = id, "diagnosis not persisted, session not found"),
        Err(e) => warn!(session_id = id, error = %e, "diagnosis not persisted"),
    }
}

#[derive(Debug, Deserialize)]
struct GoParams {
    session_id: Option<String>,
}

/// Affiliate redirect. Click recording runs detached so the redirect never waits on the store.
async fn go(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(params): Query<GoParams>,
) -> Result<Redirect, AppError> {
    let entry = catalog::find(&service_id)
        .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;

    let store = state.store.clone();
    let session_id = params.session_id.filter(|id| store::is_valid_session_id(id));
    tokio::spawn(async move {
        match session_id {
            Some(id) => match store.record_click(&id, entry.id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(session_id = %id, service_id = entry.id, "click for unknown session");
                    store.count_click(entry.id).await;
                }
                Err(e) => {
                    warn!(session_id = %id, service_id = entry.id, error = %e, "click not recorded")
                }
            },
            None => store.count_click(entry.id).await,
        }
    });

    Ok(Redirect::to(entry.url))
}

#[derive(Debug, Deserialize)]
struct EventParams {
    name: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    properties: Value,
}

async fn track_event(
    State(state): State<AppState>,
    Json(params): Json<EventParams>,
) -> Result<StatusCode, AppError> {
    if !KNOWN_EVENTS.contains(&params.name.as_str()) {
        return Err(AppError::BadRequest(format!("unknown event {:?}", params.name)));
    }
    state.store.count_event(&params.name).await;

    if let Some(url) = state.config.analytics_forward_url.clone() {
        let http = state.http.clone();
        let payload = json!({
            "name": params.name,
            "session_id": params.session_id,
            "properties": params.properties,
            "timestamp_ms": store::now_ms(),
        });
        tokio::spawn(async move {
            match http.post(&url).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = resp.status().as_u16(), "analytics forward rejected")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "analytics forward failed"),
            }
        });
    }
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct RecordsParams {
    limit: Option<usize>,
}

async fn admin_records(
    State(state): State<AppState>,
    Query(params): Query<RecordsParams>,
) -> Result<Json<Vec<DiagnosisRecord>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_ADMIN_LIMIT).min(MAX_ADMIN_LIMIT);
    Ok(Json(state.store.recent(limit).await?))
}

async fn admin_stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.store.stats().await)
}
