//! Minimal REST client helpers for consumers (boards, kiosks, tests).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(180)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        .timeout(Duration::from_secs(180))
        .build()
        .expect("failed to build HTTP client")
});

fn mk_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let res = mk_client()
        .post(ep::auth_login(base))
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn student_login(base: &str, req: &StudentAuthReq) -> Result<AuthResp, RestError> {
    let res = mk_client()
        .post(ep::auth_student_login(base))
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn my_help(
    base: &str,
    student_id: &str,
    bearer: &str,
) -> Result<Option<HelpRequestDto>, RestError> {
    let res = mk_client()
        .get(ep::student_help(base, student_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn create_help(
    base: &str,
    student_id: &str,
    bearer: &str,
    req: &CreateHelpReq,
) -> Result<HelpRequestDto, RestError> {
    let res = mk_client()
        .post(ep::student_help(base, student_id))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn cancel_help(base: &str, student_id: &str, bearer: &str) -> Result<(), RestError> {
    let res = mk_client()
        .delete(ep::student_help(base, student_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

pub async fn complete_help(
    base: &str,
    student_id: &str,
    bearer: &str,
    req: &CompleteHelpReq,
) -> Result<CompleteHelpResp, RestError> {
    let res = mk_client()
        .post(ep::student_help_complete(base, student_id))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn help_cooldown(
    base: &str,
    student_id: &str,
    bearer: &str,
) -> Result<CooldownDto, RestError> {
    let res = mk_client()
        .get(ep::student_help_cooldown(base, student_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn daily_points(
    base: &str,
    student_id: &str,
    bearer: &str,
) -> Result<DailyPointsDto, RestError> {
    let res = mk_client()
        .get(ep::student_points(base, student_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn class_board(
    base: &str,
    class: &str,
    bearer: &str,
) -> Result<Vec<BoardEntryDto>, RestError> {
    let res = mk_client()
        .get(ep::class_board(base, class))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn class_helping(
    base: &str,
    class: &str,
    bearer: &str,
) -> Result<Vec<HelpingStudentDto>, RestError> {
    let res = mk_client()
        .get(ep::class_helping(base, class))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}
