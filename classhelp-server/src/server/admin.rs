use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use chrono::{NaiveDate, Utc};
use classhelp_shared::api::{
    BatchSettingsReq, BatchSettingsResp, ClassGoalReq, ClassSettingDto, DailyPointsDto,
    ExportRowDto, LearningRecordDto, MessageDto, PointTransactionDto, RewriteResp,
    RosterUpsertResp, SaveSettingReq, SendMessageReq, StudentDto, StudentWithLoginDto,
};
use classhelp_shared::domain::{ClassRef, SettingsScope, StudentId, school_day};
use serde::Deserialize;

use super::records::{message_dto, record_dto};
use super::{AppError, AppState, auth::AuthCtx, rfc3339};
use crate::ai::AiClient;
use crate::storage::models::{PointTransaction, Student};

pub(super) fn student_dto(row: Student) -> StudentDto {
    StudentDto {
        student_id: row.student_id,
        name: row.name,
        grade: row.grade,
        class_number: row.class_number,
        student_number: row.student_number,
    }
}

fn ai_client(state: &AppState) -> Result<&AiClient, AppError> {
    state
        .ai
        .as_ref()
        .ok_or_else(|| AppError::internal("AI API key not configured"))
}

// Roster

pub async fn api_upsert_roster(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<Vec<StudentDto>>,
) -> Result<Json<RosterUpsertResp>, AppError> {
    for entry in &body {
        let id = StudentId::parse(&entry.student_id)
            .map_err(|e| AppError::bad_request(e.to_string()))?;
        if id.grade() != entry.grade
            || id.class_number() != entry.class_number
            || id.student_number() != entry.student_number
        {
            return Err(AppError::bad_request(format!(
                "student {} does not match its grade/class/number fields",
                entry.student_id
            )));
        }
        if entry.name.trim().is_empty() || entry.name.trim().chars().count() > 10 {
            return Err(AppError::bad_request(format!(
                "invalid name for student {}",
                entry.student_id
            )));
        }
    }
    let count = state
        .store
        .upsert_students(&body)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(RosterUpsertResp { count }))
}

pub async fn api_list_students(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
) -> Result<Json<Vec<StudentWithLoginDto>>, AppError> {
    let cutoff =
        Utc::now().naive_utc() - chrono::Duration::minutes(super::auth::STUDENT_SESSION_IDLE_MINUTES);
    let rows = state
        .store
        .list_students_with_last_seen()
        .await
        .map_err(AppError::from_storage)?;
    let items = rows
        .into_iter()
        .map(|(student, last_seen)| StudentWithLoginDto {
            student: student_dto(student),
            is_logged_in: last_seen.is_some_and(|at| at >= cutoff),
            last_seen_at: last_seen.map(rfc3339),
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_delete_student(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_student(&id)
        .await
        .map_err(AppError::from_storage)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("student not found: {id}")))
    }
}

pub async fn api_all_points_today(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
) -> Result<Json<Vec<DailyPointsDto>>, AppError> {
    let rows = state
        .store
        .list_today_points()
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(rows.into_iter().map(super::help::points_dto).collect()))
}

// Help settings

#[derive(Deserialize)]
pub struct ScopeQuery {
    scope: Option<String>,
}

pub async fn api_get_settings(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<ClassSettingDto>>, AppError> {
    let scope: SettingsScope = query
        .scope
        .as_deref()
        .unwrap_or("all")
        .parse()
        .map_err(AppError::bad_request)?;
    let rows = state
        .store
        .settings_for_scope(scope)
        .await
        .map_err(AppError::from_storage)?;
    let items = rows
        .into_iter()
        .map(|(grade, class_number, resolved)| ClassSettingDto {
            grade,
            class_number,
            cooldown_seconds: resolved.values.cooldown_seconds,
            daily_limit: resolved.values.daily_limit,
            source: resolved.source,
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_save_setting(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<SaveSettingReq>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .save_help_setting(
            body.grade,
            body.class_number,
            body.cooldown_seconds,
            body.daily_limit,
        )
        .await
        .map_err(AppError::from_storage)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_save_settings_batch(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<BatchSettingsReq>,
) -> Result<Json<BatchSettingsResp>, AppError> {
    let scope: SettingsScope = body.scope.parse().map_err(AppError::bad_request)?;
    let classes = match scope {
        SettingsScope::All => state.store.list_classes(None).await,
        SettingsScope::Grade(g) => state.store.list_classes(Some(g)).await,
        SettingsScope::Class(c) => Ok(vec![(c.grade, c.class_number)]),
    }
    .map_err(AppError::from_storage)?;
    let count = state
        .store
        .save_help_settings_batch(&classes, body.cooldown_seconds, body.daily_limit)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(BatchSettingsResp { count }))
}

pub async fn api_delete_setting(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path((grade, class_number)): Path<(i32, i32)>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_help_setting(grade, class_number)
        .await
        .map_err(AppError::from_storage)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!(
            "no setting for {grade}-{class_number}"
        )))
    }
}

// Point transactions (help records review)

#[derive(Deserialize)]
pub struct DayQuery {
    date: Option<NaiveDate>,
}

fn transaction_dto(
    row: PointTransaction,
    helper_name: Option<String>,
    helped_name: Option<String>,
) -> PointTransactionDto {
    PointTransactionDto {
        id: row.id,
        helper_student_id: row.helper_student_id,
        helper_name,
        helped_student_id: row.helped_student_id,
        helped_name,
        points: row.points,
        help_description: row.help_description,
        ai_description: row.ai_description,
        is_approved: row.is_approved,
        transaction_time: rfc3339(row.transaction_time),
    }
}

pub async fn api_list_transactions(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Query(query): Query<DayQuery>,
) -> Result<Json<Vec<PointTransactionDto>>, AppError> {
    let day = query.date.unwrap_or_else(|| school_day(Utc::now()));
    let rows = state
        .store
        .transactions_for_day(day)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(
        rows.into_iter()
            .map(|(tx, helper, helped)| transaction_dto(tx, helper, helped))
            .collect(),
    ))
}

pub async fn api_rewrite_transaction(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<RewriteResp>, AppError> {
    let tx = state
        .store
        .get_point_transaction(id)
        .await
        .map_err(AppError::from_storage)?
        .ok_or_else(|| AppError::not_found(format!("transaction not found: {id}")))?;
    let description = tx
        .help_description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("transaction has no help description"))?;
    let rewrite = ai_client(&state)?
        .rewrite_help_description(description)
        .await
        .map_err(AppError::from_ai)?;
    state
        .store
        .save_transaction_ai_text(id, &rewrite.text)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(RewriteResp {
        converted_text: rewrite.text,
        usage_metadata: rewrite.usage,
    }))
}

pub async fn api_approve_transaction(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let updated = state
        .store
        .approve_point_transaction(id)
        .await
        .map_err(AppError::from_storage)?;
    if updated.is_some() {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("transaction not found: {id}")))
    }
}

// Learning records review

#[derive(Deserialize)]
pub struct ClassQuery {
    class: String,
}

fn parse_class(raw: &str) -> Result<ClassRef, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("invalid class: {raw}")))
}

pub async fn api_latest_records(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Query(query): Query<ClassQuery>,
) -> Result<Json<Vec<LearningRecordDto>>, AppError> {
    let class = parse_class(&query.class)?;
    let rows = state
        .store
        .latest_records_for_class(class.grade, class.class_number)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(
        rows.into_iter()
            .map(|(record, name)| record_dto(record, Some(name)))
            .collect(),
    ))
}

pub async fn api_rewrite_record(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<RewriteResp>, AppError> {
    let record = state
        .store
        .get_learning_record(id)
        .await
        .map_err(AppError::from_storage)?
        .ok_or_else(|| AppError::not_found(format!("record not found: {id}")))?;
    let process: Vec<String> = record
        .learning_process
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let rewrite = ai_client(&state)?
        .rewrite_learning_record(&record.core_learning, &process)
        .await
        .map_err(AppError::from_ai)?;
    state
        .store
        .save_record_ai_text(id, &rewrite.text)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(RewriteResp {
        converted_text: rewrite.text,
        usage_metadata: rewrite.usage,
    }))
}

pub async fn api_approve_record(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let updated = state
        .store
        .approve_learning_record(id)
        .await
        .map_err(AppError::from_storage)?;
    if updated.is_some() {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("record not found: {id}")))
    }
}

pub async fn api_delete_record(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_learning_record(id)
        .await
        .map_err(AppError::from_storage)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("record not found: {id}")))
    }
}

pub async fn api_export_rows(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Query(query): Query<ClassQuery>,
) -> Result<Json<Vec<ExportRowDto>>, AppError> {
    let class = parse_class(&query.class)?;
    let rows = state
        .store
        .export_rows_for_class(class.grade, class.class_number)
        .await
        .map_err(AppError::from_storage)?;
    let items = rows
        .into_iter()
        .enumerate()
        .map(|(i, (student_name, ai_converted))| ExportRowDto {
            number: i + 1,
            student_name,
            ai_converted,
        })
        .collect();
    Ok(Json(items))
}

// Messages and goals

pub async fn api_send_message(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Json(body): Json<SendMessageReq>,
) -> Result<Json<MessageDto>, AppError> {
    let to = StudentId::parse(&body.to_student_id)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let row = state
        .store
        .send_teacher_message(to.as_str(), &body.content)
        .await
        .map_err(AppError::from_storage)?;
    state
        .events
        .publish(
            to.class_ref(),
            classhelp_shared::api::ServerEvent::MessageCreated {
                student_id: to.as_str().to_string(),
            },
        )
        .await;
    Ok(Json(message_dto(row)))
}

pub async fn api_set_class_goal(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(class): Path<String>,
    Json(body): Json<ClassGoalReq>,
) -> Result<StatusCode, AppError> {
    let class = parse_class(&class)?;
    state
        .store
        .set_class_goal(class.grade, class.class_number, body.goal_points)
        .await
        .map_err(AppError::from_storage)?;
    Ok(StatusCode::NO_CONTENT)
}
