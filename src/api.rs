//! HTTP API for CredChain
//!
//! JSON endpoints for profiles, project hashing, submission and verification,
//! reviews, and badges. Handlers stay thin and delegate to [`Pipeline`].

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{self, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::contract::{ProjectRecord, ReviewRecord};
use crate::crypto::normalize_wallet;
use crate::error::CredError;
use crate::persistence::Persistence;
use crate::profiles::{
    list_freelancers, search_by_skill, ClientProfile, FreelancerProfile, FreelancerSummary,
    ProfileUpdate,
};
use crate::verification::{
    BadgeReport, ClientProject, PendingProject, Pipeline, PipelineStats, ProjectSubmission,
    ReviewSubmission, VerificationWorker, VerifyOutcome, VerifySummary,
};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    worker: Option<Arc<VerificationWorker>>,
    allowed_origins: Vec<String>,
    api_stats: Arc<RwLock<ApiStats>>,
}

/// API statistics and monitoring
#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            worker: None,
            allowed_origins: Vec::new(),
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    pub fn with_worker(mut self, worker: Arc<VerificationWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Browser origins allowed by CORS. Empty means no cross-origin access.
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    fn store(&self) -> &Arc<dyn Persistence> {
        self.pipeline.store()
    }

    pub async fn get_stats(&self) -> ApiStatsResponse {
        let stats = self.api_stats.read().await;
        let uptime = stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        ApiStatsResponse {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            uptime_seconds: uptime,
            contract_loaded: self.pipeline.has_contract(),
            worker_running: self.worker.as_ref().map(|w| w.is_running()).unwrap_or(false),
            pipeline: self.pipeline.stats(),
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Cred(CredError),
    InvalidInput(String),
    NotFound(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Cred(err) => match err {
                CredError::InvalidInput(msg) | CredError::FetchError(msg) => {
                    (StatusCode::BAD_REQUEST, msg)
                }
                CredError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                e @ (CredError::ContractUnavailable | CredError::SignerUnavailable) => {
                    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
                }
                e if e.is_chain_failure() => (StatusCode::BAD_GATEWAY, e.to_string()),
                e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::warn!(status = %status.as_u16(), error = %message, "api.error");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<CredError> for ApiError {
    fn from(err: CredError) -> Self {
        ApiError::Cred(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

/// [`Json`] body whose rejections use the API's `{"error": ...}` shape.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub uptime_seconds: u64,
    pub contract_loaded: bool,
    pub worker_running: bool,
    pub pipeline: PipelineStats,
}

#[derive(Deserialize)]
struct VerifyUserRequest {
    #[serde(default)]
    wallet: Option<String>,
    #[serde(default)]
    profile_link: Option<String>,
}

#[derive(Deserialize)]
struct HashProjectRequest {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    wallet: Option<String>,
}

#[derive(Deserialize)]
struct ClientProfileRequest {
    #[serde(default)]
    wallet: Option<String>,
    #[serde(flatten)]
    profile: ClientProfile,
}

#[derive(Deserialize)]
struct ReviewsQuery {
    builder: Option<String>,
    index: Option<String>,
}

#[derive(Deserialize)]
struct VerifyProjectRequest {
    builder: String,
    index: u64,
}

fn required_wallet(wallet: Option<String>, message: &str) -> Result<String, ApiError> {
    let wallet = normalize_wallet(wallet.as_deref().unwrap_or_default());
    if wallet.is_empty() {
        return Err(ApiError::InvalidInput(message.to_string()));
    }
    Ok(wallet)
}

// ============================================================================
// Middleware
// ============================================================================

async fn stats_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    let mut stats = state.api_stats.write().await;
    stats.record_request(success);

    response
}

/// Logs method, path, status, and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring malformed CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
}

// ============================================================================
// Router
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        // Profiles
        .route("/get_all_freelancers", get(get_all_freelancers))
        .route("/create_profile", post(create_profile))
        .route("/get_profile/:wallet", get(get_profile))
        .route("/search_freelancers/:lang", get(search_freelancers))
        .route("/save_client_profile", post(save_client_profile))
        .route("/get_client_profile/:wallet", get(get_client_profile))
        .route("/verifyuser", post(verify_user))
        .route("/verify_user", post(verify_user))
        // Hashing and builders
        .route("/hash_project", post(hash_project))
        .route("/builders.json", get(get_builders))
        // Pipeline
        .route("/submit_project", post(submit_project))
        .route("/pending_projects", get(get_pending_projects))
        .route("/verify_project", post(verify_project))
        .route("/verify_pending", post(verify_pending))
        // On-chain reads and reviews
        .route("/get_projects/:builder", get(get_projects))
        .route("/get_projects_for_client/:client", get(get_projects_for_client))
        .route("/get_project_reviews", get(get_project_reviews))
        .route("/submit_review", post(submit_review))
        .route("/user_verified/:wallet", get(user_verified))
        .route("/get_badges/:wallet", get(get_badges))
        // System
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), stats_middleware))
        .with_state(state)
        .layer(cors)
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn get_all_freelancers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FreelancerSummary>>, ApiError> {
    let profiles = state.store().load_profiles()?;
    Ok(Json(list_freelancers(&profiles)))
}

async fn verify_user(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<VerifyUserRequest>,
) -> Result<Response, ApiError> {
    let wallet = req.wallet.unwrap_or_default();
    let link = req.profile_link.unwrap_or_default();

    match state.pipeline.verify_profile_link(&wallet, &link).await {
        Ok(()) => Ok(Json(json!({ "valid": true })).into_response()),
        Err(CredError::InvalidInput(reason)) => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "reason": reason })),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn hash_project(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<HashProjectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let link = req.link.unwrap_or_default();
    let hash = state
        .pipeline
        .hash_project(&link, req.wallet.as_deref())
        .await?;
    Ok(Json(json!({ "hash": hash })))
}

async fn get_builders(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    let builders = state.store().load_builders()?;
    Ok(Json(builders.into_iter().collect()))
}

async fn create_profile(
    State(state): State<Arc<AppState>>,
    JsonBody(update): JsonBody<ProfileUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let wallet = required_wallet(update.wallet.clone(), "wallet required")?;
    state
        .store()
        .update_profile(&wallet, &mut |existing| update.clone().apply(existing))?;

    tracing::info!(wallet = %wallet, "profile.saved");
    Ok(Json(json!({ "status": "Profile saved", "wallet": wallet })))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<FreelancerProfile>, ApiError> {
    state
        .store()
        .get_profile(&normalize_wallet(&wallet))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Profile not found".to_string()))
}

async fn search_freelancers(
    State(state): State<Arc<AppState>>,
    Path(lang): Path<String>,
) -> Result<Json<Vec<FreelancerSummary>>, ApiError> {
    let profiles = state.store().load_profiles()?;
    Ok(Json(search_by_skill(&profiles, &lang)))
}

async fn save_client_profile(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<ClientProfileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let wallet = required_wallet(req.wallet, "Wallet required")?;
    state.store().save_client(&wallet, &req.profile)?;
    Ok(Json(json!({ "success": true })))
}

async fn get_client_profile(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.store().get_client(&normalize_wallet(&wallet))? {
        Some(profile) => Ok(Json(json!({ "exists": true, "profile": profile }))),
        None => Ok(Json(json!({ "exists": false }))),
    }
}

async fn submit_project(
    State(state): State<Arc<AppState>>,
    JsonBody(submission): JsonBody<ProjectSubmission>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let submitted = state.pipeline.submit_project(submission).await?;
    Ok(Json(json!({
        "status": "pending",
        "hash": submitted.hash,
        "tx_hash": submitted.tx_hash,
        "index": submitted.index,
    })))
}

async fn get_pending_projects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PendingProject>>, ApiError> {
    Ok(Json(state.pipeline.pending()?))
}

async fn verify_project(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<VerifyProjectRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.pipeline.verify_project(&req.builder, req.index).await?;

    let response = match outcome {
        VerifyOutcome::Verified { tx_hash } => {
            Json(json!({ "verified": true, "tx_hash": tx_hash })).into_response()
        }
        VerifyOutcome::AlreadyVerified => {
            Json(json!({ "verified": true, "already_verified": true })).into_response()
        }
        VerifyOutcome::Mismatch { expected, actual } => (
            StatusCode::CONFLICT,
            Json(json!({
                "verified": false,
                "error": "Content hash mismatch",
                "expected": expected,
                "actual": actual,
            })),
        )
            .into_response(),
        VerifyOutcome::Unreachable { reason } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "verified": false, "error": reason })),
        )
            .into_response(),
    };
    Ok(response)
}

async fn verify_pending(State(state): State<Arc<AppState>>) -> Result<Json<VerifySummary>, ApiError> {
    Ok(Json(state.pipeline.verify_all_pending().await?))
}

async fn get_projects(
    State(state): State<Arc<AppState>>,
    Path(builder): Path<String>,
) -> Result<Json<Vec<ProjectRecord>>, ApiError> {
    Ok(Json(state.pipeline.projects_of(&builder).await?))
}

async fn get_projects_for_client(
    State(state): State<Arc<AppState>>,
    Path(client): Path<String>,
) -> Result<Json<Vec<ClientProject>>, ApiError> {
    if !state.pipeline.has_contract() {
        return Ok(Json(Vec::new()));
    }
    match state.pipeline.projects_for_client(&client).await {
        Ok(projects) => Ok(Json(projects)),
        Err(e @ CredError::InvalidInput(_)) => Err(e.into()),
        Err(e) => Err(ApiError::InternalError(e.to_string())),
    }
}

/// Reviews are best-effort: anything missing or failing yields an empty list.
async fn get_project_reviews(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReviewsQuery>,
) -> Json<Vec<ReviewRecord>> {
    let (Some(builder), Some(index)) = (query.builder, query.index) else {
        return Json(Vec::new());
    };
    let Ok(index) = index.trim().parse::<u64>() else {
        return Json(Vec::new());
    };
    if !state.pipeline.has_contract() {
        return Json(Vec::new());
    }

    match state.pipeline.project_reviews(&builder, index).await {
        Ok(reviews) => Json(reviews),
        Err(e) => {
            tracing::warn!(builder = %builder, index, error = %e, "Failed to read reviews");
            Json(Vec::new())
        }
    }
}

async fn submit_review(
    State(state): State<Arc<AppState>>,
    JsonBody(review): JsonBody<ReviewSubmission>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let submitted = state.pipeline.submit_review(review).await?;
    Ok(Json(json!({
        "status": "success",
        "tx_hash": submitted.tx_hash,
        "comment_hash": submitted.comment_hash,
    })))
}

async fn user_verified(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verified = state.pipeline.is_user_verified(&wallet).await?;
    Ok(Json(json!({ "wallet": normalize_wallet(&wallet), "verified": verified })))
}

async fn get_badges(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<BadgeReport>, ApiError> {
    Ok(Json(state.pipeline.badges(&wallet).await?))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "contract_loaded": state.pipeline.has_contract(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.get_stats().await)
}
