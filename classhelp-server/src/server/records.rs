use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use classhelp_shared::api::{LearningRecordDto, MessageDto, ReplyMessageReq, SubmitRecordReq};

use super::{AppError, AppState, auth::AuthCtx, rfc3339};
use crate::storage::models::{LearningRecord, Message};

pub(super) fn record_dto(row: LearningRecord, student_name: Option<String>) -> LearningRecordDto {
    let learning_process = row
        .learning_process
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default();
    LearningRecordDto {
        id: row.id,
        student_id: row.student_id,
        student_name,
        record_date: row.record_date.to_string(),
        core_learning: row.core_learning,
        learning_process,
        ai_converted: row.ai_converted,
        is_submitted: row.is_submitted,
        is_approved: row.is_approved,
        approved_at: row.approved_at.map(rfc3339),
    }
}

pub(super) fn message_dto(row: Message) -> MessageDto {
    MessageDto {
        id: row.id,
        from_role: row.from_role,
        from_id: row.from_id,
        to_id: row.to_id,
        content: row.content,
        is_read: row.is_read,
        created_at: rfc3339(row.created_at),
    }
}

pub async fn api_student_records(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LearningRecordDto>>, AppError> {
    let rows = state
        .store
        .student_records(&id)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(
        rows.into_iter().map(|r| record_dto(r, None)).collect(),
    ))
}

pub async fn api_submit_record(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<SubmitRecordReq>,
) -> Result<Json<LearningRecordDto>, AppError> {
    let exists = state
        .store
        .get_student(&id)
        .await
        .map_err(AppError::from_storage)?
        .is_some();
    if !exists {
        return Err(AppError::not_found(format!("student not found: {id}")));
    }
    let row = state
        .store
        .submit_learning_record(&id, &body.core_learning, &body.learning_process)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(record_dto(row, None)))
}

pub async fn api_unread_message(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<Option<MessageDto>>, AppError> {
    let row = state
        .store
        .latest_unread_message(&id)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(row.map(message_dto)))
}

pub async fn api_reply_message(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<ReplyMessageReq>,
) -> Result<Json<MessageDto>, AppError> {
    let row = state
        .store
        .send_student_reply(&id, &body.content)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(message_dto(row)))
}

pub async fn api_mark_message_read(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path((id, message_id)): Path<(String, i32)>,
) -> Result<StatusCode, AppError> {
    let updated = state
        .store
        .mark_message_read(message_id, &id)
        .await
        .map_err(AppError::from_storage)?;
    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!(
            "message not found: {message_id}"
        )))
    }
}
