use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use classhelp_shared::api::{
    self, BoardEntryDto, ClassPointsDto, CompleteHelpReq, CompleteHelpResp, CooldownDto,
    CreateHelpReq, DailyPointsDto, HelpRequestDto, HelpingStudentDto, SetPointsReq, ThanksCountDto,
};
use classhelp_shared::domain::{ClassRef, StudentId};

use super::{AppError, AppState, auth::AuthCtx, rfc3339};
use crate::storage::models::HelpRequest;

fn help_dto(row: HelpRequest) -> HelpRequestDto {
    HelpRequestDto {
        student_id: row.student_id,
        status: row
            .status
            .parse()
            .unwrap_or(classhelp_shared::domain::HelpStatus::Requesting),
        is_active: row.is_active,
        started_at: rfc3339(row.started_at),
        cooldown_until: row.cooldown_until.map(rfc3339),
    }
}

async fn require_student(state: &AppState, id: &str) -> Result<(), AppError> {
    let exists = state
        .store
        .get_student(id)
        .await
        .map_err(AppError::from_storage)?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(AppError::not_found(format!("student not found: {id}")))
    }
}

async fn publish_board_change(state: &AppState, student_id: &str) {
    if let Ok(id) = StudentId::parse(student_id) {
        state
            .events
            .publish(
                id.class_ref(),
                api::ServerEvent::HelpBoardChanged {
                    student_id: student_id.to_string(),
                },
            )
            .await;
    }
}

async fn publish_points_change(state: &AppState, student_id: &str) {
    if let Ok(id) = StudentId::parse(student_id) {
        state
            .events
            .publish(
                id.class_ref(),
                api::ServerEvent::PointsUpdated {
                    student_id: student_id.to_string(),
                },
            )
            .await;
    }
}

pub async fn api_get_my_help(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<Option<HelpRequestDto>>, AppError> {
    let row = state
        .store
        .get_active_help_request(&id)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(row.map(help_dto)))
}

pub async fn api_create_help(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<CreateHelpReq>,
) -> Result<Json<HelpRequestDto>, AppError> {
    require_student(&state, &id).await?;
    let row = state
        .store
        .create_help_request(&id, body.status)
        .await
        .map_err(AppError::from_storage)?;
    publish_board_change(&state, &id).await;
    Ok(Json(help_dto(row)))
}

pub async fn api_cancel_help(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let cancelled = state
        .store
        .cancel_help_request(&id)
        .await
        .map_err(AppError::from_storage)?;
    if !cancelled {
        return Err(AppError::not_found("no active help request"));
    }
    publish_board_change(&state, &id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_complete_help(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<CompleteHelpReq>,
) -> Result<Json<CompleteHelpResp>, AppError> {
    if body.helper_student_id == id {
        return Err(AppError::bad_request("cannot thank yourself"));
    }
    require_student(&state, &id).await?;
    let done = state
        .store
        .complete_help(&id, &body.helper_student_id, body.description.as_deref())
        .await
        .map_err(AppError::from_storage)?;
    publish_board_change(&state, &id).await;
    publish_points_change(&state, &body.helper_student_id).await;
    Ok(Json(CompleteHelpResp {
        helper_points: done.helper_points,
        cooldown_until: done.cooldown_until.map(rfc3339),
    }))
}

/// Degrades to "not in cooldown" on storage failure: blocking a student from
/// offering help over a read error is worse than letting one through early.
pub async fn api_help_cooldown(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Json<CooldownDto> {
    match state.store.help_cooldown(&id).await {
        Ok(status) => Json(CooldownDto {
            in_cooldown: status.in_cooldown,
            remaining_seconds: status.remaining_seconds,
        }),
        Err(e) => {
            tracing::error!(student_id = %id, error = %e, "cooldown check failed; reporting clear");
            Json(CooldownDto {
                in_cooldown: false,
                remaining_seconds: 0,
            })
        }
    }
}

pub async fn api_thanks_count(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<ThanksCountDto>, AppError> {
    let count = state
        .store
        .today_thanks_count(&id)
        .await
        .map_err(AppError::from_storage)?;
    let setting = state
        .store
        .help_settings_for_student(&id)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(ThanksCountDto {
        count,
        daily_limit: setting.values.daily_limit,
    }))
}

pub async fn api_get_points(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<DailyPointsDto>, AppError> {
    require_student(&state, &id).await?;
    let row = state
        .store
        .get_or_create_daily_points(&id)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(points_dto(row)))
}

pub async fn api_set_points(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<SetPointsReq>,
) -> Result<Json<DailyPointsDto>, AppError> {
    require_student(&state, &id).await?;
    let row = state
        .store
        .set_daily_points(&id, body.points)
        .await
        .map_err(AppError::from_storage)?;
    publish_points_change(&state, &id).await;
    Ok(Json(points_dto(row)))
}

pub(super) fn points_dto(row: crate::storage::models::DailyPoints) -> DailyPointsDto {
    DailyPointsDto {
        student_id: row.student_id,
        date: row.date.to_string(),
        current_points: row.current_points,
        max_points: row.max_points,
    }
}

fn parse_class(class: &str) -> Result<ClassRef, AppError> {
    class
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid class: {class}")))
}

pub async fn api_class_board(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(class): Path<String>,
) -> Result<Json<Vec<BoardEntryDto>>, AppError> {
    let class = parse_class(&class)?;
    let rows = state
        .store
        .class_help_board(class.grade, class.class_number)
        .await
        .map_err(AppError::from_storage)?;
    let items = rows
        .into_iter()
        .map(|(student, request)| BoardEntryDto {
            student_id: student.student_id,
            name: student.name,
            student_number: student.student_number,
            status: request.and_then(|r| r.status.parse().ok()),
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_class_helping(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(class): Path<String>,
) -> Result<Json<Vec<HelpingStudentDto>>, AppError> {
    let class = parse_class(&class)?;
    let rows = state
        .store
        .helping_students(class.grade, class.class_number)
        .await
        .map_err(AppError::from_storage)?;
    let items = rows
        .into_iter()
        .map(|s| HelpingStudentDto {
            student_id: s.student_id,
            name: s.name,
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_class_students(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(class): Path<String>,
) -> Result<Json<Vec<api::StudentDto>>, AppError> {
    let class = parse_class(&class)?;
    let rows = state
        .store
        .list_class_students(class.grade, class.class_number)
        .await
        .map_err(AppError::from_storage)?;
    let items = rows.into_iter().map(super::admin::student_dto).collect();
    Ok(Json(items))
}

pub async fn api_class_points(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(class): Path<String>,
) -> Result<Json<ClassPointsDto>, AppError> {
    let class = parse_class(&class)?;
    let (current_points, goal_points) = state
        .store
        .class_points_today(class.grade, class.class_number)
        .await
        .map_err(AppError::from_storage)?;
    Ok(Json(ClassPointsDto {
        current_points,
        goal_points,
    }))
}
