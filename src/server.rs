//! HTTP API for the practice tracker.
//!
//! Thin JSON layer over [`Tracker`]: each handler decodes a request, calls
//! one tracker operation and maps its error to a status code. Signals are
//! returned as an array in derivation order.
//!
//! ```text
//! browser ──→ axum router ──→ Tracker ──→ Store
//!                                 │
//!                                 └──→ CodeRunner (child process)
//! ```

use crate::activity::ActivityStats;
use crate::core::{RecordId, Signal};
use crate::tracker::{ExecutionResult, Tracker, TrackerError};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, allowed_origins: Vec<String>) -> Self {
        Self {
            port,
            allowed_origins,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub email: String,
    pub message: String,
    /// Echoed only in development, where no email is sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub id: RecordId,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: RecordId,
    pub prompt_text: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: RecordId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: RecordId,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub session_id: RecordId,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: RecordId,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SignalsResponse {
    pub session_id: RecordId,
    pub signals: Vec<Signal>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map a tracker error to a status code and error body.
fn error_response(e: TrackerError) -> ApiError {
    let (status, code) = match &e {
        TrackerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        TrackerError::EmailTaken => (StatusCode::BAD_REQUEST, "EMAIL_TAKEN"),
        TrackerError::InvalidOtp => (StatusCode::BAD_REQUEST, "INVALID_OTP"),
        TrackerError::OtpExpired => (StatusCode::BAD_REQUEST, "OTP_EXPIRED"),
        TrackerError::SessionAlreadyEnded(_) => (StatusCode::BAD_REQUEST, "SESSION_ALREADY_ENDED"),
        TrackerError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
        TrackerError::EmailNotVerified => (StatusCode::FORBIDDEN, "EMAIL_NOT_VERIFIED"),
        TrackerError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
        TrackerError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
        TrackerError::NoPrompts => (StatusCode::NOT_FOUND, "NO_PROMPTS"),
        TrackerError::Store(_) | TrackerError::Auth(_) => {
            tracing::error!("Request failed: {}", e);
            return internal_error("Internal server error");
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
}

fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "INTERNAL_ERROR".to_string(),
        }),
    )
}

/// Malformed or incomplete request bodies, in the same shape as other errors.
fn invalid_request(rejection: JsonRejection) -> ApiError {
    (
        rejection.status(),
        Json(ErrorResponse {
            error: rejection.body_text(),
            code: "INVALID_REQUEST".to_string(),
        }),
    )
}

/// `Json` extractor that rejects with an [`ErrorResponse`] body.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(invalid_request(rejection)),
        }
    }
}

/// Run CPU-heavy tracker work (password hashing) off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, TrackerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            tracing::error!("Blocking task failed: {}", e);
            internal_error("Internal server error")
        })?
        .map_err(error_response)
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /stats
async fn stats(State(tracker): State<Arc<Tracker>>) -> Json<ActivityStats> {
    Json(tracker.activity().stats())
}

/// POST /auth/signup
async fn signup(
    State(tracker): State<Arc<Tracker>>,
    JsonBody(req): JsonBody<SignupRequest>,
) -> ApiResult<SignupResponse> {
    let worker = tracker.clone();
    let outcome = run_blocking(move || worker.signup(&req.email, &req.password)).await?;

    Ok(Json(SignupResponse {
        email: outcome.email,
        message: "Signup successful. Check your email for verification code.".to_string(),
        otp: tracker.is_development().then_some(outcome.otp),
    }))
}

/// POST /auth/verify-email
async fn verify_email(
    State(tracker): State<Arc<Tracker>>,
    JsonBody(req): JsonBody<VerifyEmailRequest>,
) -> ApiResult<MessageResponse> {
    tracker
        .verify_email(&req.email, &req.otp)
        .map_err(error_response)?;

    Ok(Json(MessageResponse {
        message: "Email verified successfully".to_string(),
    }))
}

/// POST /auth/login
async fn login(
    State(tracker): State<Arc<Tracker>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let access_token = run_blocking(move || tracker.login(&req.email, &req.password)).await?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// GET /prompts/random
async fn random_prompt(State(tracker): State<Arc<Tracker>>) -> ApiResult<PromptResponse> {
    let prompt = tracker.random_prompt().map_err(error_response)?;

    Ok(Json(PromptResponse {
        id: prompt.id,
        text: prompt.text,
    }))
}

/// POST /sessions/start
async fn start_session(
    State(tracker): State<Arc<Tracker>>,
    JsonBody(req): JsonBody<StartSessionRequest>,
) -> ApiResult<StartSessionResponse> {
    let session = tracker
        .start_session(req.user_id, &req.prompt_text)
        .map_err(error_response)?;

    Ok(Json(StartSessionResponse {
        session_id: session.id,
        started_at: session.started_at,
    }))
}

/// POST /sessions/end
async fn end_session(
    State(tracker): State<Arc<Tracker>>,
    JsonBody(req): JsonBody<EndSessionRequest>,
) -> ApiResult<EndSessionResponse> {
    let session = tracker
        .end_session(req.session_id)
        .map_err(error_response)?;

    Ok(Json(EndSessionResponse {
        session_id: session.id,
        ended_at: session.ended_at,
    }))
}

/// POST /execute
async fn execute(
    State(tracker): State<Arc<Tracker>>,
    JsonBody(req): JsonBody<ExecuteRequest>,
) -> ApiResult<ExecutionResult> {
    let result = tracker
        .execute(req.session_id, &req.code)
        .await
        .map_err(error_response)?;

    Ok(Json(result))
}

/// GET /sessions/:session_id/signals
async fn session_signals(
    State(tracker): State<Arc<Tracker>>,
    Path(session_id): Path<RecordId>,
) -> ApiResult<SignalsResponse> {
    let result = tracker
        .session_signals(session_id)
        .map_err(error_response)?;

    Ok(Json(SignalsResponse {
        session_id: result.session_id,
        signals: result.signals,
    }))
}

/// Build the CORS layer from configured origins, skipping unparsable ones.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the router with all tracker routes.
pub fn router(tracker: Arc<Tracker>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/auth/signup", post(signup))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/login", post(login))
        .route("/prompts/random", get(random_prompt))
        .route("/sessions/start", post(start_session))
        .route("/sessions/end", post(end_session))
        .route("/sessions/:session_id/signals", get(session_signals))
        .route("/execute", post(execute))
        .layer(cors_layer(allowed_origins))
        .with_state(tracker)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    tracker: Arc<Tracker>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(tracker, &config.allowed_origins);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Practice tracker listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
