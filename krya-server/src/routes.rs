//! HTTP route handlers for the automation API.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use krya::coordinator::{StatusSummary, SubmitError};
use krya::core::types::{Job, JobId, JobStatus};
use krya::io::config::{ConfigSummary, ConfigUpdate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::sse;
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/run", post(run_job))
        .route("/stop", post(stop_job))
        .route("/status", get(status))
        .route("/jobs/{id}", get(get_job))
        .route("/config", get(get_config).post(update_config))
        .route("/logs", get(sse::logs_handler))
}

/// Error body in the `{"detail": ...}` shape clients expect.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn internal(err: &anyhow::Error) -> Self {
        error!(err = %format!("{err:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Cooldown => Self::new(StatusCode::TOO_MANY_REQUESTS, err.to_string()),
            SubmitError::Internal(inner) => Self::internal(&inner),
            SubmitError::EmptyPrompt
            | SubmitError::InvalidBudget(_)
            | SubmitError::MissingCredential => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
        }
    }
}

/// GET / - liveness.
async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "online", "service": "Krya API" }))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    prompt: String,
    #[serde(default)]
    max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    job_id: JobId,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

/// POST /run - submit a prompt; work continues in the background.
async fn run_job(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let submission = state
        .coordinator
        .submit(&request.prompt, request.max_retries)?;
    info!(job_id = %submission.job_id, duplicate = submission.duplicate, "job submitted");
    Ok(Json(RunResponse {
        job_id: submission.job_id,
        status: submission.status,
        message: submission
            .duplicate
            .then_some("This prompt is already being processed"),
    }))
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    job_id: String,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    status: JobStatus,
    job_id: JobId,
}

/// POST /stop - request a stop; finished jobs report their final status.
async fn stop_job(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> Result<Json<StopResponse>, ApiError> {
    let job_id = JobId::from(request.job_id);
    match state.coordinator.stop(&job_id) {
        Ok(Some(job)) => Ok(Json(StopResponse {
            status: job.status,
            job_id: job.id,
        })),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Job with ID {job_id} not found"),
        )),
        Err(err) => Err(ApiError::internal(&err)),
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(flatten)]
    summary: StatusSummary,
}

/// GET /status - job counts, active jobs and the most recent log entries.
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let summary = state
        .coordinator
        .status()
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(StatusResponse {
        status: "online",
        summary,
    }))
}

/// GET /jobs/{id} - one job with its last code and result text.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = JobId::from(id);
    state
        .coordinator
        .job(&job_id)
        .map_err(|err| ApiError::internal(&err))?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Job with ID {job_id} not found")))
}

/// GET /config - user-editable settings with the API key masked.
async fn get_config(State(state): State<AppState>) -> Json<ConfigSummary> {
    Json(state.config().snapshot().summary())
}

/// POST /config - partial update; omitted fields keep their value.
async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .config()
        .update(&update)
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("{err:#}")))?;
    Ok(Json(
        json!({ "status": "success", "message": "Configuration updated successfully" }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use krya::test_support::{
        CoordinatorFixture, ScriptedExecutor, ScriptedGenerator, ScriptedRun, test_config,
    };
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(fx: &CoordinatorFixture) -> Router {
        api_router().with_state(AppState::new(fx.coordinator.clone()))
    }

    fn fixture(run: ScriptedRun) -> CoordinatorFixture {
        CoordinatorFixture::new(ScriptedGenerator::default(), ScriptedExecutor::always(run))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    #[tokio::test]
    async fn root_reports_online() {
        let fx = fixture(ScriptedRun::success());
        let (status, body) = call(app(&fx), "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "online", "service": "Krya API" }));
    }

    #[tokio::test]
    async fn run_then_fetch_job() {
        let fx = fixture(ScriptedRun::success());
        let (status, body) = call(
            app(&fx),
            "POST",
            "/run",
            Some(json!({ "prompt": "open calculator", "max_retries": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert!(body.get("message").is_none());
        let job_id = JobId::from(body["job_id"].as_str().expect("job id"));

        tokio::time::timeout(Duration::from_secs(10), fx.coordinator.wait(&job_id))
            .await
            .expect("finish")
            .expect("wait");

        let (status, job) = call(app(&fx), "GET", &format!("/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "completed");
        assert_eq!(job["max_attempts"], 2);
        assert!(job["last_result"].as_str().expect("result").contains("Exit Code: 0"));
    }

    #[tokio::test]
    async fn run_rejections_map_to_status_codes() {
        let fx = fixture(ScriptedRun::success());
        let (status, body) = call(app(&fx), "POST", "/run", Some(json!({ "prompt": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "prompt must not be empty");

        let (status, _) = call(
            app(&fx),
            "POST",
            "/run",
            Some(json!({ "prompt": "open calculator", "max_retries": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(app(&fx), "POST", "/run", Some(json!({ "prompt": "open calculator" }))).await;
        assert_eq!(status, StatusCode::OK);
        let job_id = JobId::from(body["job_id"].as_str().expect("job id"));
        tokio::time::timeout(Duration::from_secs(10), fx.coordinator.wait(&job_id))
            .await
            .expect("finish")
            .expect("wait");

        let (status, body) =
            call(app(&fx), "POST", "/run", Some(json!({ "prompt": "open calculator" }))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["detail"].as_str().expect("detail").contains("too recently"));
    }

    #[tokio::test]
    async fn run_without_credential_is_bad_request() {
        let mut cfg = test_config();
        cfg.generation.api_key = None;
        cfg.generation.api_key_env = "KRYA_TEST_UNSET_KEY_VAR".to_string();
        let fx = CoordinatorFixture::with_config(
            cfg,
            ScriptedGenerator::default(),
            ScriptedExecutor::always(ScriptedRun::success()),
        );
        let (status, body) =
            call(app(&fx), "POST", "/run", Some(json!({ "prompt": "open calculator" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().expect("detail").contains("API key"));
    }

    #[tokio::test]
    async fn duplicate_submission_returns_running_job_with_message() {
        let fx = fixture(ScriptedRun::BlockUntilCancelled);
        let payload = json!({ "prompt": "open calculator" });
        let (_, first) = call(app(&fx), "POST", "/run", Some(payload.clone())).await;
        let (status, second) = call(app(&fx), "POST", "/run", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["job_id"], first["job_id"]);
        assert_eq!(second["message"], "This prompt is already being processed");

        let (status, stopped) = call(
            app(&fx),
            "POST",
            "/stop",
            Some(json!({ "job_id": first["job_id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stopped["status"], "stopped");
        assert_eq!(stopped["job_id"], first["job_id"]);
    }

    #[tokio::test]
    async fn stop_unknown_job_is_not_found() {
        let fx = fixture(ScriptedRun::success());
        let (status, body) =
            call(app(&fx), "POST", "/stop", Some(json!({ "job_id": "nope" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Job with ID nope not found");

        let (status, _) = call(app(&fx), "GET", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_includes_counts_and_logs() {
        let fx = fixture(ScriptedRun::success());
        let (_, body) =
            call(app(&fx), "POST", "/run", Some(json!({ "prompt": "open calculator" }))).await;
        let job_id = JobId::from(body["job_id"].as_str().expect("job id"));
        tokio::time::timeout(Duration::from_secs(10), fx.coordinator.wait(&job_id))
            .await
            .expect("finish")
            .expect("wait");

        let (status, body) = call(app(&fx), "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["job_counts"]["completed"], 1);
        assert_eq!(body["active_jobs"], json!([]));
        let logs = body["recent_logs"].as_array().expect("logs");
        assert!(!logs.is_empty());
        assert_eq!(logs[0]["level"], "INFO");
        assert!(logs[0]["message"].as_str().expect("message").starts_with("Starting automation job"));
    }

    #[tokio::test]
    async fn config_round_trip_masks_key() {
        let fx = fixture(ScriptedRun::success());
        let (status, body) = call(app(&fx), "GET", "/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api_key"], "••••••••1234");
        assert_eq!(body["api_key_set"], true);
        assert_eq!(body["model_name"], "gemini-2.5-flash");

        let (status, body) = call(
            app(&fx),
            "POST",
            "/config",
            Some(json!({ "model_name": "gemini-2.5-pro", "top_k": 16 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (_, body) = call(app(&fx), "GET", "/config", None).await;
        assert_eq!(body["model_name"], "gemini-2.5-pro");
        assert_eq!(body["top_k"], 16);
        assert_eq!(body["temperature"], 1.55);

        let (status, body) =
            call(app(&fx), "POST", "/config", Some(json!({ "top_p": 3.0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().expect("detail").contains("top_p"));
    }

    #[tokio::test]
    async fn logs_endpoint_streams_events() {
        let fx = fixture(ScriptedRun::success());
        let response = app(&fx)
            .oneshot(
                Request::builder()
                    .uri("/logs")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/event-stream"));
    }
}
