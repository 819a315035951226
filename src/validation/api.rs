use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::broadcast::{ProgressBroadcaster, RunFeed};
use super::capability::AnalysisCapability;
use super::db::DbHandle;
use super::models::{PassMode, RunInput, Stage, StageArtifact, Verdict};
use super::pipeline::PipelineExecutor;
use super::registry::RunRegistry;
use super::report::ReportStore;
use super::revision::RevisionController;
use super::store::ArtifactStore;
use super::{sse, ws};
use crate::config::AppConfig;
use crate::errors::{RegistryError, ReportError};
use crate::pregate::{PregateChecker, PregateReport};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub executor: PipelineExecutor,
    pub pregate: Arc<PregateChecker>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire registry, stores and executor from configuration.
    pub fn new(
        config: &AppConfig,
        db: DbHandle,
        capability: Arc<dyn AnalysisCapability>,
    ) -> anyhow::Result<Self> {
        let pregate =
            Arc::new(PregateChecker::new(&config.pregate).context("Invalid pregate policy")?);
        let registry = RunRegistry::new(
            db.clone(),
            ProgressBroadcaster::new(config.pipeline.event_buffer),
        );
        let executor = PipelineExecutor::new(
            registry,
            ReportStore::new(db),
            ArtifactStore::new(config.server.data_dir.join("runs")),
            capability,
            config.pipeline.clone(),
            pregate.clone(),
            RevisionController::new(config.revision.clone()),
        );
        Ok(Self { executor, pregate })
    }

    pub fn registry(&self) -> &RunRegistry {
        self.executor.registry()
    }

    pub fn reports(&self) -> &ReportStore {
        self.executor.reports()
    }

    /// Subscribe, then snapshot. See [`RunFeed`].
    pub(crate) async fn open_feed(&self, run_id: &str) -> Result<RunFeed, ApiError> {
        let subscription = self.registry().broadcaster().subscribe(run_id);
        let run = self.registry().get(run_id).await?;
        Ok(RunFeed::new(subscription, &run))
    }
}

// ── Request / response payloads ───────────────────────────────────────

#[derive(Deserialize)]
pub struct PregateRequest {
    pub idea_one_liner: String,
    pub target_customer: String,
    pub problem_statement: String,
    #[serde(default)]
    pub current_alternatives: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct ValidateResponse {
    run_id: String,
    status: &'static str,
    pregate: PregateReport,
}

#[derive(Serialize)]
struct ArtifactView {
    stage: Stage,
    ordinal: u8,
    pass: PassMode,
    verdict: Option<Verdict>,
    content: String,
    created_at: String,
}

impl From<StageArtifact> for ArtifactView {
    fn from(a: StageArtifact) -> Self {
        Self {
            stage: a.stage,
            ordinal: a.ordinal,
            pass: a.pass,
            verdict: a.verdict,
            content: a.content,
            created_at: a.created_at,
        }
    }
}

#[derive(Serialize)]
struct ReportResponse {
    run_id: String,
    verdict: Option<Verdict>,
    initial_verdict: Option<Verdict>,
    report_markdown: String,
    created_at: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Input refused by the specificity gate; carries the full report.
    Rejected(PregateReport),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg})),
            ApiError::Rejected(report) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "Input is not specific enough to validate",
                    "pregate": report,
                }),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({"error": msg}))
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::RunNotFound { .. } => ApiError::NotFound(e.to_string()),
            other => {
                tracing::error!(error = %other, "Registry error in request");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            ReportError::NotReady { .. } => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "Report error in request");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/pregate", post(pregate_check))
        .route("/api/validate", post(start_validation))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/artifacts", get(list_artifacts))
        .route("/api/runs/{id}/usage", get(get_usage))
        .route("/api/runs/{id}/stream", get(sse::stream_handler))
        .route("/api/runs/{id}/ws", get(ws::ws_handler))
        .route("/api/runs/{id}/report", get(get_report))
        .route("/api/runs/{id}/report/download", get(download_report))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn pregate_check(
    State(state): State<SharedState>,
    Json(req): Json<PregateRequest>,
) -> Json<PregateReport> {
    Json(state.pregate.check(
        &req.idea_one_liner,
        &req.target_customer,
        &req.problem_statement,
        &req.current_alternatives,
    ))
}

async fn start_validation(
    State(state): State<SharedState>,
    Json(input): Json<RunInput>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.pregate.check(
        &input.idea_one_liner,
        &input.target_customer,
        &input.problem_statement,
        &input.current_alternatives,
    );
    if !report.is_valid {
        tracing::info!(score = report.score, reasons = ?report.fail_reasons, "Validation request rejected");
        return Err(ApiError::Rejected(report));
    }

    let run = state.registry().create(input).await?;
    state.executor.start(&run.run_id);

    Ok((
        StatusCode::CREATED,
        Json(ValidateResponse {
            run_id: run.run_id,
            status: run.status.as_str(),
            pregate: report,
        }),
    ))
}

async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry().list_recent(query.limit).await?))
}

async fn get_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry().get(&run_id).await?))
}

async fn list_artifacts(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let artifacts = state.registry().artifacts(&run_id).await?;
    Ok(Json(
        artifacts
            .into_iter()
            .map(ArtifactView::from)
            .collect::<Vec<_>>(),
    ))
}

async fn get_usage(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry().usage(&run_id).await?))
}

async fn get_report(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.registry().get(&run_id).await?;
    let report = state.reports().for_run(&run).await?;
    Ok(Json(ReportResponse {
        run_id: report.run_id,
        verdict: report.verdict,
        initial_verdict: report.initial_verdict,
        report_markdown: report.markdown,
        created_at: report.created_at,
    }))
}

async fn download_report(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.registry().get(&run_id).await?;
    state.reports().for_run(&run).await?;
    let bytes = state.reports().download(&run_id).await?;
    let disposition = format!("attachment; filename=\"gap_foundry_{}.md\"", run_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::capability::ScriptedCapability;
    use crate::validation::db::ValidationDb;
    use crate::validation::models::RunStatus;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(tmp: &tempfile::TempDir) -> SharedState {
        let mut config = AppConfig::default();
        config.server.data_dir = tmp.path().to_path_buf();
        let db = DbHandle::new(ValidationDb::new_in_memory().unwrap());
        Arc::new(AppState::new(&config, db, Arc::new(ScriptedCapability::new())).unwrap())
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn good_input() -> serde_json::Value {
        serde_json::json!({
            "idea_one_liner": "Automatically track subscription churn for indie SaaS founders",
            "target_customer": "Solo founders running SaaS under $10k MRR",
            "problem_statement": "They notice churn weeks late because billing data is scattered",
            "current_alternatives": "Stripe dashboard and manual spreadsheets",
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn completed_run(state: &SharedState) -> String {
        let input: RunInput = serde_json::from_value(good_input()).unwrap();
        let run = state.registry().create(input).await.unwrap();
        state.executor.drive(&run.run_id).await.unwrap();
        run.run_id
    }

    #[tokio::test]
    async fn test_health_check() {
        let tmp = tempfile::tempdir().unwrap();
        let app = api_router().with_state(test_state(&tmp));
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_pregate_endpoint_reports_without_creating_run() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let app = api_router().with_state(state.clone());
        let resp = app
            .oneshot(post_json(
                "/api/pregate",
                serde_json::json!({
                    "idea_one_liner": "app",
                    "target_customer": "everyone",
                    "problem_statement": "health is important",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["is_valid"], false);
        assert!(!json["fail_reasons"].as_array().unwrap().is_empty());
        assert!(state.registry().list_recent(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_rejects_short_idea() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let app = api_router().with_state(state.clone());
        let mut input = good_input();
        input["idea_one_liner"] = serde_json::json!("abc");

        let resp = app.oneshot(post_json("/api/validate", input)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp.into_body()).await;
        assert!(json["error"].is_string());
        assert_eq!(json["pregate"]["is_valid"], false);
        assert!(state.registry().list_recent(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_creates_queued_run() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let app = api_router().with_state(state.clone());

        let resp = app.oneshot(post_json("/api/validate", good_input())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "queued");
        assert_eq!(json["pregate"]["is_valid"], true);
        let run_id = json["run_id"].as_str().unwrap().to_string();
        assert!(run_id.starts_with("web_"));
        assert!(state.registry().get(&run_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_run_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let app = api_router().with_state(test_state(&tmp));
        let resp = app.oneshot(get("/api/runs/web_missing")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp.into_body()).await;
        assert!(json["error"].as_str().unwrap().contains("web_missing"));
    }

    #[tokio::test]
    async fn test_report_not_ready_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let input: RunInput = serde_json::from_value(good_input()).unwrap();
        let run = state.registry().create(input).await.unwrap();

        let app = api_router().with_state(state);
        let resp = app
            .oneshot(get(&format!("/api/runs/{}/report", run.run_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["error"], "Report not ready. Current status: queued");
    }

    #[tokio::test]
    async fn test_completed_run_endpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let run_id = completed_run(&state).await;
        let app = api_router().with_state(state);

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/runs/{}", run_id)))
            .await
            .unwrap();
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress"], 100);

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/runs/{}/report", run_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["verdict"], "GO");
        assert!(json["report_markdown"].as_str().unwrap().contains("## Idea Anchor"));

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/runs/{}/artifacts", run_id)))
            .await
            .unwrap();
        let json = body_json(resp.into_body()).await;
        let stages: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["stage"].as_str().unwrap())
            .collect();
        assert_eq!(stages.len(), 9);
        assert_eq!(stages[0], "discover_competitors");

        let resp = app
            .clone()
            .oneshot(get(&format!("/api/runs/{}/usage", run_id)))
            .await
            .unwrap();
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["successful_requests"], 9);

        let resp = app
            .oneshot(get(&format!("/api/runs/{}/report/download", run_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/markdown; charset=utf-8"
        );
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(&format!("gap_foundry_{}.md", run_id)));
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8(body.to_vec()).unwrap().starts_with("# Gap Foundry"));
    }

    #[tokio::test]
    async fn test_list_runs_honours_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        for _ in 0..3 {
            let input: RunInput = serde_json::from_value(good_input()).unwrap();
            state.registry().create(input).await.unwrap();
        }
        let app = api_router().with_state(state);
        let resp = app.oneshot(get("/api/runs?limit=2")).await.unwrap();
        let json = body_json(resp.into_body()).await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["status"], RunStatus::Queued.as_str());
        assert!(rows[0]["idea_preview"].as_str().unwrap().ends_with("..."));
    }

    #[tokio::test]
    async fn test_stream_for_terminal_run_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let run_id = completed_run(&state).await;
        let app = api_router().with_state(state);

        let resp = app
            .oneshot(get(&format!("/api/runs/{}/stream", run_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let events: Vec<serde_json::Value> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str(d).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "status");
        assert_eq!(events[0]["status"], "completed");
        assert_eq!(events[1]["type"], "done");
    }

    #[tokio::test]
    async fn test_stream_unknown_run_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let app = api_router().with_state(state.clone());
        let resp = app.oneshot(get("/api/runs/web_nope/stream")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(!state.registry().broadcaster().has_channel("web_nope"));
    }
}
