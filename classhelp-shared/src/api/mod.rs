use serde::{Deserialize, Serialize};

use crate::domain::{HelpStatus, SettingSource};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StudentAuthReq {
    pub student_id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

// Help requests
#[derive(Debug, Serialize, Deserialize)]
pub struct HelpRequestDto {
    pub student_id: String,
    pub status: HelpStatus,
    pub is_active: bool,
    pub started_at: String, // RFC3339 UTC
    pub cooldown_until: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateHelpReq {
    pub status: HelpStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteHelpReq {
    pub helper_student_id: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteHelpResp {
    pub helper_points: i32,
    pub cooldown_until: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CooldownDto {
    pub in_cooldown: bool,
    pub remaining_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThanksCountDto {
    pub count: i64,
    pub daily_limit: i32,
}

/// One row of the class help board: every student, with their current
/// (unexpired) help status if any.
#[derive(Debug, Serialize, Deserialize)]
pub struct BoardEntryDto {
    pub student_id: String,
    pub name: String,
    pub student_number: i32,
    pub status: Option<HelpStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HelpingStudentDto {
    pub student_id: String,
    pub name: String,
}

// Points
#[derive(Debug, Serialize, Deserialize)]
pub struct DailyPointsDto {
    pub student_id: String,
    pub date: String, // KST school day, YYYY-MM-DD
    pub current_points: i32,
    pub max_points: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetPointsReq {
    pub points: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassPointsDto {
    pub current_points: i64,
    pub goal_points: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassGoalReq {
    pub goal_points: i32,
}

// Help settings
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassSettingDto {
    pub grade: i32,
    pub class_number: i32,
    pub cooldown_seconds: i32,
    pub daily_limit: i32,
    pub source: SettingSource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveSettingReq {
    pub grade: i32,
    pub class_number: i32,
    pub cooldown_seconds: i32,
    pub daily_limit: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSettingsReq {
    pub scope: String,
    pub cooldown_seconds: i32,
    pub daily_limit: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSettingsResp {
    pub count: usize,
}

// Learning records
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRecordReq {
    pub core_learning: String,
    #[serde(default)]
    pub learning_process: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LearningRecordDto {
    pub id: i32,
    pub student_id: String,
    pub student_name: Option<String>,
    pub record_date: String,
    pub core_learning: String,
    pub learning_process: Vec<String>,
    pub ai_converted: Option<String>,
    pub is_submitted: bool,
    pub is_approved: bool,
    pub approved_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewriteResp {
    pub converted_text: String,
    pub usage_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportRowDto {
    pub number: usize,
    pub student_name: String,
    pub ai_converted: String,
}

// Point transactions (admin review)
#[derive(Debug, Serialize, Deserialize)]
pub struct PointTransactionDto {
    pub id: i32,
    pub helper_student_id: String,
    pub helper_name: Option<String>,
    pub helped_student_id: String,
    pub helped_name: Option<String>,
    pub points: i32,
    pub help_description: Option<String>,
    pub ai_description: Option<String>,
    pub is_approved: bool,
    pub transaction_time: String, // RFC3339 UTC
}

// Messages
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageReq {
    pub to_student_id: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyMessageReq {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: i32,
    pub from_role: String,
    pub from_id: Option<String>,
    pub to_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String, // RFC3339 UTC
}

// Roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDto {
    pub student_id: String,
    pub name: String,
    pub grade: i32,
    pub class_number: i32,
    pub student_number: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StudentWithLoginDto {
    #[serde(flatten)]
    pub student: StudentDto,
    pub is_logged_in: bool,
    pub last_seen_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RosterUpsertResp {
    pub count: usize,
}

/// Server-push notifications on the per-class SSE stream. Consumers re-query
/// the affected resource; events carry identifiers, not payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    HelpBoardChanged { student_id: String },
    PointsUpdated { student_id: String },
    MessageCreated { student_id: String },
}
