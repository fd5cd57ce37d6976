use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn auth_student_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/student-login", API_V1_PREFIX))
}
pub fn auth_logout(base: &str) -> String {
    base_join(base, &format!("{}/auth/logout", API_V1_PREFIX))
}

pub fn student_help(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!("{}/students/{}/help", API_V1_PREFIX, enc(student_id)),
    )
}
pub fn student_help_complete(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/students/{}/help/complete",
            API_V1_PREFIX,
            enc(student_id)
        ),
    )
}
pub fn student_help_cooldown(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/students/{}/help/cooldown",
            API_V1_PREFIX,
            enc(student_id)
        ),
    )
}
pub fn student_thanks_count(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/students/{}/help/thanks-count",
            API_V1_PREFIX,
            enc(student_id)
        ),
    )
}
pub fn student_points(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!("{}/students/{}/points", API_V1_PREFIX, enc(student_id)),
    )
}
pub fn student_records(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!("{}/students/{}/records", API_V1_PREFIX, enc(student_id)),
    )
}
pub fn student_unread_message(base: &str, student_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/students/{}/messages/unread",
            API_V1_PREFIX,
            enc(student_id)
        ),
    )
}

pub fn class_board(base: &str, class: &str) -> String {
    base_join(
        base,
        &format!("{}/class/{}/board", API_V1_PREFIX, enc(class)),
    )
}
pub fn class_helping(base: &str, class: &str) -> String {
    base_join(
        base,
        &format!("{}/class/{}/helping", API_V1_PREFIX, enc(class)),
    )
}
pub fn class_students(base: &str, class: &str) -> String {
    base_join(
        base,
        &format!("{}/class/{}/students", API_V1_PREFIX, enc(class)),
    )
}
pub fn class_points(base: &str, class: &str) -> String {
    base_join(
        base,
        &format!("{}/class/{}/points", API_V1_PREFIX, enc(class)),
    )
}
pub fn class_events(base: &str, class: &str) -> String {
    base_join(
        base,
        &format!("{}/class/{}/events", API_V1_PREFIX, enc(class)),
    )
}
