use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Asia::Seoul;
use serde::{Deserialize, Serialize};

/// 4-digit student code `GCNN`: grade, class, two-digit number.
///
/// Grades 3 and 4 run classes 1-3, grade 6 runs classes 1-7; other grades do
/// not use the app. Construction goes through [`StudentId::parse`] so a held
/// value is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid student id: {0}")]
pub struct StudentIdError(pub String);

impl StudentId {
    pub fn parse(raw: &str) -> Result<Self, StudentIdError> {
        let trimmed = raw.trim();
        if trimmed.len() != 4 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StudentIdError(format!("{raw:?} is not a 4-digit code")));
        }
        let grade = (trimmed.as_bytes()[0] - b'0') as i32;
        let class_number = (trimmed.as_bytes()[1] - b'0') as i32;
        let number: i32 = trimmed[2..].parse().expect("digits checked above");

        let class_max = match grade {
            3 | 4 => 3,
            6 => 7,
            other => {
                return Err(StudentIdError(format!("grade {other} is not in use")));
            }
        };
        if class_number < 1 || class_number > class_max {
            return Err(StudentIdError(format!(
                "class {class_number} out of range for grade {grade}"
            )));
        }
        if !(1..=99).contains(&number) {
            return Err(StudentIdError(format!("student number {number} out of range")));
        }
        Ok(StudentId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn grade(&self) -> i32 {
        (self.0.as_bytes()[0] - b'0') as i32
    }

    pub fn class_number(&self) -> i32 {
        (self.0.as_bytes()[1] - b'0') as i32
    }

    pub fn student_number(&self) -> i32 {
        self.0[2..].parse().expect("validated at construction")
    }

    pub fn class_ref(&self) -> ClassRef {
        ClassRef {
            grade: self.grade(),
            class_number: self.class_number(),
        }
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for StudentId {
    type Err = StudentIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StudentId::parse(s)
    }
}

/// A grade-class pair, rendered as `G-C` (e.g. `3-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassRef {
    pub grade: i32,
    pub class_number: i32,
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.grade, self.class_number)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid class reference: {0}")]
pub struct ClassRefError(pub String);

impl FromStr for ClassRef {
    type Err = ClassRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (g, c) = s
            .split_once('-')
            .ok_or_else(|| ClassRefError(s.to_string()))?;
        let grade: i32 = g.parse().map_err(|_| ClassRefError(s.to_string()))?;
        let class_number: i32 = c.parse().map_err(|_| ClassRefError(s.to_string()))?;
        if grade < 1 || class_number < 1 {
            return Err(ClassRefError(s.to_string()));
        }
        Ok(ClassRef {
            grade,
            class_number,
        })
    }
}

/// Which side of a help exchange a student is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HelpStatus {
    Requesting,
    Helping,
}

impl HelpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HelpStatus::Requesting => "requesting",
            HelpStatus::Helping => "helping",
        }
    }
}

impl FromStr for HelpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requesting" => Ok(HelpStatus::Requesting),
            "helping" => Ok(HelpStatus::Helping),
            other => Err(format!("unknown help status: {other}")),
        }
    }
}

/// Effective cooldown/limit values for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpSettingsValues {
    pub cooldown_seconds: i32,
    pub daily_limit: i32,
}

/// Fallback when no settings row matches at any level.
pub const DEFAULT_HELP_SETTINGS: HelpSettingsValues = HelpSettingsValues {
    cooldown_seconds: 600,
    daily_limit: 3,
};

/// Where a resolved setting came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    Individual,
    Grade,
    Global,
    Default,
}

/// Admin settings scope: every class, one grade, or one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsScope {
    All,
    Grade(i32),
    Class(ClassRef),
}

impl FromStr for SettingsScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "all" {
            return Ok(SettingsScope::All);
        }
        if let Ok(class) = trimmed.parse::<ClassRef>() {
            return Ok(SettingsScope::Class(class));
        }
        if let Ok(grade) = trimmed.parse::<i32>() {
            if grade >= 1 {
                return Ok(SettingsScope::Grade(grade));
            }
        }
        Err(format!("unknown settings scope: {trimmed}"))
    }
}

/// The school day for an instant, on the Korea Standard Time calendar.
/// Daily points and daily limits roll over at midnight in Seoul, not UTC.
pub fn school_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Seoul).date_naive()
}

/// UTC bounds `[start, end)` of a KST school day, for range queries over
/// timestamp columns stored in UTC.
pub fn school_day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_local = day
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_local_timezone(Seoul)
        .earliest()
        .expect("KST has no gaps");
    let start = start_local.with_timezone(&Utc);
    (start, start + chrono::Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn student_id_accepts_valid_codes() {
        for raw in ["3101", "3315", "4201", "6701", "4399"] {
            let id = StudentId::parse(raw).unwrap();
            assert_eq!(id.as_str(), raw);
        }
        let id = StudentId::parse("3121").unwrap();
        assert_eq!(id.grade(), 3);
        assert_eq!(id.class_number(), 1);
        assert_eq!(id.student_number(), 21);
        assert_eq!(id.class_ref().to_string(), "3-1");
    }

    #[test]
    fn student_id_rejects_bad_codes() {
        for raw in ["5101", "3401", "6801", "3100", "310", "31011", "3a01", ""] {
            assert!(StudentId::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn class_ref_round_trips() {
        let class: ClassRef = "6-7".parse().unwrap();
        assert_eq!(class.grade, 6);
        assert_eq!(class.class_number, 7);
        assert_eq!(class.to_string(), "6-7");
        assert!("6".parse::<ClassRef>().is_err());
        assert!("0-1".parse::<ClassRef>().is_err());
    }

    #[test]
    fn scope_grammar() {
        assert_eq!("all".parse::<SettingsScope>().unwrap(), SettingsScope::All);
        assert_eq!(
            "3".parse::<SettingsScope>().unwrap(),
            SettingsScope::Grade(3)
        );
        assert_eq!(
            "3-2".parse::<SettingsScope>().unwrap(),
            SettingsScope::Class(ClassRef {
                grade: 3,
                class_number: 2
            })
        );
        assert!("학년".parse::<SettingsScope>().is_err());
    }

    #[test]
    fn school_day_uses_seoul_calendar() {
        // 2026-03-02 16:30 UTC is already 01:30 on March 3rd in Seoul.
        let late_utc = Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 0).unwrap();
        assert_eq!(
            school_day(late_utc),
            NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
        );

        let day = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        let (start, end) = school_day_bounds(day);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
        assert_eq!(end - start, chrono::Duration::days(1));
        assert!(late_utc >= start && late_utc < end);
    }
}
