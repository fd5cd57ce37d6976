mod acl;
mod admin;
pub mod auth;
mod config;
mod events;
mod help;
mod records;

use crate::ai::{AiClient, AiError};
use crate::server::auth::AuthCtx;
use crate::storage::StorageError;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post, put},
};
use bcrypt::verify;
use classhelp_shared::api;
use classhelp_shared::auth::Role;
use classhelp_shared::domain::StudentId;
pub use config::{AiSettings, AppConfig, ConfigError, TeacherConfig};
pub use events::EventHub;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    pub ai: Option<AiClient>,
    events: EventHub,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store, ai: Option<AiClient>) -> Self {
        Self {
            config,
            store,
            ai,
            events: EventHub::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/auth/logout", post(api_auth_logout))
        .route(
            "/api/v1/students/{id}/help",
            get(help::api_get_my_help)
                .post(help::api_create_help)
                .delete(help::api_cancel_help),
        )
        .route(
            "/api/v1/students/{id}/help/complete",
            post(help::api_complete_help),
        )
        .route(
            "/api/v1/students/{id}/help/cooldown",
            get(help::api_help_cooldown),
        )
        .route(
            "/api/v1/students/{id}/help/thanks-count",
            get(help::api_thanks_count),
        )
        .route(
            "/api/v1/students/{id}/points",
            get(help::api_get_points).put(help::api_set_points),
        )
        .route(
            "/api/v1/students/{id}/records",
            get(records::api_student_records).post(records::api_submit_record),
        )
        .route(
            "/api/v1/students/{id}/messages",
            post(records::api_reply_message),
        )
        .route(
            "/api/v1/students/{id}/messages/unread",
            get(records::api_unread_message),
        )
        .route(
            "/api/v1/students/{id}/messages/{message_id}/read",
            post(records::api_mark_message_read),
        )
        .route("/api/v1/class/{class}/board", get(help::api_class_board))
        .route("/api/v1/class/{class}/helping", get(help::api_class_helping))
        .route(
            "/api/v1/class/{class}/students",
            get(help::api_class_students),
        )
        .route("/api/v1/class/{class}/points", get(help::api_class_points))
        .route("/api/v1/class/{class}/events", get(events::api_class_events))
        .route("/api/v1/admin/roster", put(admin::api_upsert_roster))
        .route("/api/v1/admin/students", get(admin::api_list_students))
        .route(
            "/api/v1/admin/students/{id}",
            delete(admin::api_delete_student),
        )
        .route("/api/v1/admin/points", get(admin::api_all_points_today))
        .route(
            "/api/v1/admin/settings",
            get(admin::api_get_settings).put(admin::api_save_setting),
        )
        .route(
            "/api/v1/admin/settings/batch",
            put(admin::api_save_settings_batch),
        )
        .route(
            "/api/v1/admin/settings/{grade}/{class_number}",
            delete(admin::api_delete_setting),
        )
        .route(
            "/api/v1/admin/transactions",
            get(admin::api_list_transactions),
        )
        .route(
            "/api/v1/admin/transactions/{id}/rewrite",
            post(admin::api_rewrite_transaction),
        )
        .route(
            "/api/v1/admin/transactions/{id}/approve",
            post(admin::api_approve_transaction),
        )
        .route("/api/v1/admin/records", get(admin::api_latest_records))
        .route(
            "/api/v1/admin/records/{id}/rewrite",
            post(admin::api_rewrite_record),
        )
        .route(
            "/api/v1/admin/records/{id}/approve",
            post(admin::api_approve_record),
        )
        .route("/api/v1/admin/records/{id}", delete(admin::api_delete_record))
        .route("/api/v1/admin/export", get(admin::api_export_rows))
        .route("/api/v1/admin/messages", post(admin::api_send_message))
        .route(
            "/api/v1/admin/class/{class}/goal",
            put(admin::api_set_class_goal),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            role = tracing::field::Empty,
            student_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/auth/login", post(api_auth_login))
        .route("/api/v1/auth/student-login", post(api_auth_student_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    // Put into request extensions for trace layer & handlers
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    // Disable caching for API and health endpoints
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            HeaderName::from_static("expires"),
            HeaderValue::from_static("0"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(sid) = &auth.claims.student_id {
            span.record("student_id", tracing::field::display(sid));
        }
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let teacher = state
        .config
        .teachers
        .iter()
        .find(|t| t.username == body.username)
        .ok_or_else(|| {
            tracing::warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &teacher.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_jwt_for_user(&state, &teacher.username, Role::Teacher, None).await?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_auth_student_login(
    State(state): State<AppState>,
    Json(body): Json<api::StudentAuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let student_id =
        StudentId::parse(&body.student_id).map_err(|e| AppError::bad_request(e.to_string()))?;
    if body.name.trim().is_empty() || body.name.trim().chars().count() > 10 {
        return Err(AppError::bad_request("invalid name"));
    }
    let found = state
        .store
        .find_student_by_id_and_name(student_id.as_str(), &body.name)
        .await
        .map_err(AppError::from_storage)?;
    if found.is_none() {
        tracing::warn!(student_id=%student_id, "student-login: id/name mismatch");
        return Err(AppError::unauthorized());
    }
    // One login per student: a new login evicts any previous session.
    state
        .store
        .delete_sessions_for_user(student_id.as_str())
        .await
        .map_err(AppError::from_storage)?;
    let token = auth::issue_jwt_for_user(
        &state,
        student_id.as_str(),
        Role::Student,
        Some(student_id.as_str().to_string()),
    )
    .await?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_auth_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .delete_session(&auth.claims.jti)
        .await
        .map_err(AppError::from_storage)?;
    // A student leaving the room should not stay on the board.
    if let Some(student_id) = &auth.claims.student_id {
        let cancelled = state
            .store
            .cancel_help_request(student_id)
            .await
            .map_err(AppError::from_storage)?;
        if cancelled && let Ok(id) = StudentId::parse(student_id) {
            state
                .events
                .publish(
                    id.class_ref(),
                    api::ServerEvent::HelpBoardChanged {
                        student_id: student_id.clone(),
                    },
                )
                .await;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn rfc3339(dt: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    fn from_storage(e: StorageError) -> Self {
        match e {
            StorageError::InvalidInput(msg) => Self::BadRequest(msg),
            StorageError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }

    fn from_ai(e: AiError) -> Self {
        match e {
            AiError::MissingKey => Self::Internal(e.to_string()),
            AiError::EmptyInput => Self::BadRequest(e.to_string()),
            AiError::Http(_) | AiError::Upstream { .. } | AiError::EmptyCandidate => {
                Self::BadGateway(e.to_string())
            }
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Upstream AI failures: surface a stable summary, log the detail
            AppError::BadGateway(m) => (
                StatusCode::BAD_GATEWAY,
                "upstream AI request failed".into(),
                "bad_gateway",
                Some(m),
            ),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
