use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use classhelp_shared::auth::Role;
use classhelp_shared::domain::StudentId;
use classhelp_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};

/// A student session idles out after the classroom's 40-minute window;
/// afterwards the student logs in again from the shared device.
pub(super) const STUDENT_SESSION_IDLE_MINUTES: i64 = 40;
/// Student tokens are good for one school day at most.
const STUDENT_TOKEN_TTL_HOURS: i64 = 12;
/// How many days of inactivity before a teacher session is considered expired.
const TEACHER_SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login for teachers.
const TEACHER_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return unauthorized();
    }
    let token = &header_str[prefix.len()..];

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    validate_claims(&state, &claims).map_err(|e| {
        tracing::warn!(error=?e, username=%claims.sub, "auth: validate_claims failed");
        // Invalid token, log out the user
        AppError::unauthorized()
    })?;

    let jti = claims.jti.clone();
    let cutoff = match claims.role {
        Role::Student => Utc::now() - Duration::minutes(STUDENT_SESSION_IDLE_MINUTES),
        Role::Teacher => Utc::now() - Duration::days(TEACHER_SESSION_IDLE_DAYS),
    };
    match state
        .store
        .touch_session_with_cutoff(&jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                jti = %jti,
                username = %claims.sub,
                cutoff = %cutoff,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    let auth = AuthCtx { claims };
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

pub async fn issue_jwt_for_user(
    state: &AppState,
    username: &str,
    role: Role,
    student_id: Option<String>,
) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = match role {
        Role::Student => (Utc::now() + Duration::hours(STUDENT_TOKEN_TTL_HOURS)).timestamp(),
        Role::Teacher => (Utc::now() + Duration::days(TEACHER_TOKEN_TTL_DAYS)).timestamp(),
    };
    let claims = JwtClaims {
        sub: username.to_string(),
        jti: jti.clone(),
        exp,
        role,
        student_id,
    };

    validate_claims(state, &claims)?;

    state
        .store
        .create_session(&jti, username)
        .await
        .map_err(|e| {
            error!(username, error=%e, "login: create_session failed");
            AppError::internal(e)
        })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(username, error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}

fn validate_claims(state: &AppState, claims: &JwtClaims) -> Result<(), AppError> {
    match claims.role {
        Role::Teacher => {
            if !state
                .config
                .teachers
                .iter()
                .any(|t| t.username == claims.sub)
            {
                warn!(username = %claims.sub, "issue_jwt: unknown teacher");
                return Err(AppError::forbidden());
            }
            if claims.student_id.is_some() {
                warn!(
                    username = %claims.sub,
                    "issue_jwt: teacher token must not carry a student binding"
                );
                return Err(AppError::forbidden());
            }
        }
        Role::Student => {
            let student_id = claims.student_id.as_deref().ok_or_else(|| {
                warn!(username = %claims.sub, "issue_jwt: student token missing student_id");
                AppError::forbidden()
            })?;
            if student_id != claims.sub {
                warn!(
                    username = %claims.sub,
                    student_id,
                    "issue_jwt: student binding mismatch"
                );
                return Err(AppError::forbidden());
            }
            if StudentId::parse(student_id).is_err() {
                warn!(student_id, "issue_jwt: malformed student id");
                return Err(AppError::forbidden());
            }
        }
    }

    Ok(())
}
