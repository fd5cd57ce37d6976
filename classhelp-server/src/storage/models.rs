use crate::storage::schema::{
    class_goals, daily_points, help_requests, help_settings, learning_records, messages,
    point_transactions, sessions, students,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = students)]
#[diesel(primary_key(student_id))]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub grade: i32,
    pub class_number: i32,
    pub student_number: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = students)]
pub struct NewStudent<'a> {
    pub student_id: &'a str,
    pub name: &'a str,
    pub grade: i32,
    pub class_number: i32,
    pub student_number: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = help_requests)]
#[diesel(primary_key(student_id))]
#[diesel(belongs_to(Student, foreign_key = student_id))]
pub struct HelpRequest {
    pub student_id: String,
    pub status: String,
    pub is_active: bool,
    pub started_at: NaiveDateTime,
    pub cooldown_until: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = help_settings)]
pub struct HelpSetting {
    pub grade: i32,
    pub class_number: i32,
    pub cooldown_seconds: i32,
    pub daily_limit: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = help_settings)]
pub struct NewHelpSetting {
    pub grade: i32,
    pub class_number: i32,
    pub cooldown_seconds: i32,
    pub daily_limit: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = daily_points)]
pub struct DailyPoints {
    pub student_id: String,
    pub date: NaiveDate,
    pub current_points: i32,
    pub max_points: i32,
}

#[derive(Insertable)]
#[diesel(table_name = daily_points)]
pub struct NewDailyPoints<'a> {
    pub student_id: &'a str,
    pub date: NaiveDate,
    pub current_points: i32,
    pub max_points: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = point_transactions)]
pub struct PointTransaction {
    pub id: i32,
    pub helper_student_id: String,
    pub helped_student_id: String,
    pub points: i32,
    pub help_description: Option<String>,
    pub ai_description: Option<String>,
    pub is_approved: bool,
    pub transaction_time: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = point_transactions)]
pub struct NewPointTransaction<'a> {
    pub helper_student_id: &'a str,
    pub helped_student_id: &'a str,
    pub points: i32,
    pub help_description: Option<&'a str>,
    pub transaction_time: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = learning_records)]
#[diesel(belongs_to(Student, foreign_key = student_id))]
pub struct LearningRecord {
    pub id: i32,
    pub student_id: String,
    pub record_date: NaiveDate,
    pub core_learning: String,
    pub learning_process: Option<String>,
    pub ai_converted: Option<String>,
    pub is_submitted: bool,
    pub is_approved: bool,
    pub approved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i32,
    pub from_role: String,
    pub from_id: Option<String>,
    pub to_role: String,
    pub to_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub from_role: &'a str,
    pub from_id: Option<&'a str>,
    pub to_role: &'a str,
    pub to_id: &'a str,
    pub content: &'a str,
    pub is_read: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = class_goals)]
pub struct ClassGoal {
    pub grade: i32,
    pub class_number: i32,
    pub goal_points: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = class_goals)]
pub struct NewClassGoal {
    pub grade: i32,
    pub class_number: i32,
    pub goal_points: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub username: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub username: &'a str,
}
