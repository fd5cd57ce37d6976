use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use classhelp_shared::domain::{
    DEFAULT_HELP_SETTINGS, HelpSettingsValues, HelpStatus, SettingSource, SettingsScope,
    school_day, school_day_bounds,
};
use diesel::prelude::*;

use super::models::{HelpRequest, HelpSetting, NewHelpSetting, NewPointTransaction, Student};
use super::{StorageError, Store, configure_sqlite_conn, schema};

/// A request older than this is treated as abandoned and lazily deactivated
/// on the next read that touches it.
const REQUEST_EXPIRY_MINUTES: i64 = 40;

#[derive(Debug, Clone, Copy)]
pub struct CooldownStatus {
    pub in_cooldown: bool,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSetting {
    pub values: HelpSettingsValues,
    pub source: SettingSource,
}

#[derive(Debug, Clone)]
pub struct HelpCompletion {
    pub helper_points: i32,
    pub cooldown_until: Option<NaiveDateTime>,
}

/// Settings priority cascade: exact class, then grade-wide (class 0), then
/// global (0, 0), then the hardcoded fallback. Pure over the loaded rows so
/// the order is testable without a database.
pub fn resolve_for_class(settings: &[HelpSetting], grade: i32, class_number: i32) -> ResolvedSetting {
    let pick = |s: &HelpSetting, source| ResolvedSetting {
        values: HelpSettingsValues {
            cooldown_seconds: s.cooldown_seconds,
            daily_limit: s.daily_limit,
        },
        source,
    };
    if let Some(s) = settings
        .iter()
        .find(|s| s.grade == grade && s.class_number == class_number)
    {
        return pick(s, SettingSource::Individual);
    }
    if let Some(s) = settings
        .iter()
        .find(|s| s.grade == grade && s.class_number == 0)
    {
        return pick(s, SettingSource::Grade);
    }
    if let Some(s) = settings.iter().find(|s| s.grade == 0 && s.class_number == 0) {
        return pick(s, SettingSource::Global);
    }
    ResolvedSetting {
        values: DEFAULT_HELP_SETTINGS,
        source: SettingSource::Default,
    }
}

impl Store {
    // Help requests

    /// The student's active request, or `None`. A row past the 40-minute
    /// expiry is deactivated here and reported as absent (lazy expiry, no
    /// background sweep).
    pub async fn get_active_help_request(
        &self,
        student: &str,
    ) -> Result<Option<HelpRequest>, StorageError> {
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<HelpRequest>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            active_request_with_expiry(&mut conn, &sid, Utc::now().naive_utc())
        })
        .await?
    }

    /// Opens a fresh active request. Any expired leftovers are cleared first.
    /// An unexpired active request is a conflict: the caller must cancel or
    /// complete before switching sides.
    pub async fn create_help_request(
        &self,
        student: &str,
        status: HelpStatus,
    ) -> Result<HelpRequest, StorageError> {
        use schema::help_requests::dsl as hr;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<HelpRequest, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            conn.immediate_transaction(|conn| -> Result<HelpRequest, StorageError> {
                if active_request_with_expiry(conn, &sid, now)?.is_some() {
                    return Err(StorageError::Conflict(
                        "an active help request already exists".into(),
                    ));
                }
                diesel::update(
                    hr::help_requests
                        .filter(hr::student_id.eq(&sid))
                        .filter(hr::is_active.eq(true)),
                )
                .set(hr::is_active.eq(false))
                .execute(conn)?;
                diesel::insert_into(hr::help_requests)
                    .values((
                        hr::student_id.eq(&sid),
                        hr::status.eq(status.as_str()),
                        hr::is_active.eq(true),
                        hr::started_at.eq(now),
                    ))
                    .on_conflict(hr::student_id)
                    .do_update()
                    .set((
                        hr::status.eq(status.as_str()),
                        hr::is_active.eq(true),
                        hr::started_at.eq(now),
                    ))
                    .execute(conn)?;
                Ok(hr::help_requests
                    .filter(hr::student_id.eq(&sid))
                    .first::<HelpRequest>(conn)?)
            })
        })
        .await?
    }

    /// Deactivates the student's active request. `false` when there was none.
    pub async fn cancel_help_request(&self, student: &str) -> Result<bool, StorageError> {
        use schema::help_requests::dsl as hr;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::update(
                hr::help_requests
                    .filter(hr::student_id.eq(&sid))
                    .filter(hr::is_active.eq(true)),
            )
            .set(hr::is_active.eq(false))
            .execute(&mut conn)?;
            Ok(n > 0)
        })
        .await?
    }

    /// Every student of the class with their current help status, for the
    /// class board. Expired requests found along the way are batch-cleared.
    pub async fn class_help_board(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<Vec<(Student, Option<HelpRequest>)>, StorageError> {
        use schema::help_requests::dsl as hr;
        use schema::students::dsl as st;
        let pool = self.pool();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(Student, Option<HelpRequest>)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                let now = Utc::now().naive_utc();
                let cutoff = now - Duration::minutes(REQUEST_EXPIRY_MINUTES);

                let rows: Vec<(Student, Option<HelpRequest>)> = st::students
                    .left_join(hr::help_requests.on(hr::student_id.eq(st::student_id)))
                    .filter(st::grade.eq(grade))
                    .filter(st::class_number.eq(class_number))
                    .order(st::student_number.asc())
                    .select((Student::as_select(), Option::<HelpRequest>::as_select()))
                    .load(&mut conn)?;

                let expired: Vec<String> = rows
                    .iter()
                    .filter_map(|(_, req)| req.as_ref())
                    .filter(|req| req.is_active && req.started_at < cutoff)
                    .map(|req| req.student_id.clone())
                    .collect();
                if !expired.is_empty() {
                    diesel::update(
                        hr::help_requests
                            .filter(hr::student_id.eq_any(&expired))
                            .filter(hr::is_active.eq(true)),
                    )
                    .set(hr::is_active.eq(false))
                    .execute(&mut conn)?;
                }

                Ok(rows
                    .into_iter()
                    .map(|(student, req)| {
                        let live = req.filter(|r| r.is_active && r.started_at >= cutoff);
                        (student, live)
                    })
                    .collect())
            },
        )
        .await?
    }

    /// Students of the class currently offering help ("thank you" modal).
    pub async fn helping_students(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<Vec<Student>, StorageError> {
        use schema::help_requests::dsl as hr;
        use schema::students::dsl as st;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Vec<Student>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(st::students
                .inner_join(hr::help_requests.on(hr::student_id.eq(st::student_id)))
                .filter(st::grade.eq(grade))
                .filter(st::class_number.eq(class_number))
                .filter(hr::status.eq(HelpStatus::Helping.as_str()))
                .filter(hr::is_active.eq(true))
                .order(st::student_number.asc())
                .select(Student::as_select())
                .load(&mut conn)?)
        })
        .await?
    }

    /// Cooldown state from the student's request row, active or not.
    pub async fn help_cooldown(&self, student: &str) -> Result<CooldownStatus, StorageError> {
        use schema::help_requests::dsl as hr;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<CooldownStatus, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = hr::help_requests
                .filter(hr::student_id.eq(&sid))
                .first::<HelpRequest>(&mut conn)
                .optional()?;
            let now = Utc::now().naive_utc();
            let remaining = row
                .and_then(|r| r.cooldown_until)
                .map(|until| (until - now).num_seconds())
                .unwrap_or(0);
            Ok(CooldownStatus {
                in_cooldown: remaining > 0,
                remaining_seconds: remaining.max(0),
            })
        })
        .await?
    }

    /// How many times the student's help was acknowledged today (KST).
    pub async fn today_thanks_count(&self, helper: &str) -> Result<i64, StorageError> {
        let pool = self.pool();
        let hid = helper.to_string();
        tokio::task::spawn_blocking(move || -> Result<i64, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            thanks_count_today(&mut conn, &hid, Utc::now())
        })
        .await?
    }

    /// Records an acknowledged help. One transaction covers the point
    /// transaction row, the helper's clamped daily increment, the requester's
    /// request closure, and the helper's cooldown stamp.
    pub async fn complete_help(
        &self,
        requester: &str,
        helper: &str,
        description: Option<&str>,
    ) -> Result<HelpCompletion, StorageError> {
        use schema::help_requests::dsl as hr;
        use schema::point_transactions::dsl as pt;
        let pool = self.pool();
        let requester = requester.to_string();
        let helper = helper.to_string();
        let description = description.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<HelpCompletion, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now_utc = Utc::now();
            let now = now_utc.naive_utc();
            conn.immediate_transaction(|conn| -> Result<HelpCompletion, StorageError> {
                let helper_row: Option<Student> = schema::students::dsl::students
                    .filter(schema::students::dsl::student_id.eq(&helper))
                    .first::<Student>(conn)
                    .optional()?;
                let Some(helper_row) = helper_row else {
                    return Err(StorageError::InvalidInput(format!(
                        "unknown helper: {helper}"
                    )));
                };

                let setting =
                    load_settings(conn, helper_row.grade, helper_row.class_number)?;
                let done = thanks_count_today(conn, &helper, now_utc)?;
                if done >= setting.values.daily_limit as i64 {
                    return Err(StorageError::Conflict(format!(
                        "daily help limit reached ({})",
                        setting.values.daily_limit
                    )));
                }

                let tx = NewPointTransaction {
                    helper_student_id: &helper,
                    helped_student_id: &requester,
                    points: 1,
                    help_description: description.as_deref(),
                    transaction_time: now,
                };
                diesel::insert_into(pt::point_transactions)
                    .values(&tx)
                    .execute(conn)?;

                let helper_points = super::points::increment_points(conn, &helper, 1, now_utc)?;

                diesel::update(
                    hr::help_requests
                        .filter(hr::student_id.eq(&requester))
                        .filter(hr::is_active.eq(true)),
                )
                .set(hr::is_active.eq(false))
                .execute(conn)?;

                let cooldown_until = if setting.values.cooldown_seconds > 0 {
                    Some(now + Duration::seconds(setting.values.cooldown_seconds as i64))
                } else {
                    None
                };
                diesel::insert_into(hr::help_requests)
                    .values((
                        hr::student_id.eq(&helper),
                        hr::status.eq(HelpStatus::Helping.as_str()),
                        hr::is_active.eq(false),
                        hr::started_at.eq(now),
                        hr::cooldown_until.eq(cooldown_until),
                    ))
                    .on_conflict(hr::student_id)
                    .do_update()
                    .set(hr::cooldown_until.eq(cooldown_until))
                    .execute(conn)?;

                Ok(HelpCompletion {
                    helper_points,
                    cooldown_until,
                })
            })
        })
        .await?
    }

    // Help settings

    /// Effective settings for a class (cascade applied).
    pub async fn help_settings_for_class(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<ResolvedSetting, StorageError> {
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<ResolvedSetting, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            load_settings(&mut conn, grade, class_number)
        })
        .await?
    }

    /// Effective settings for a student, via their roster row.
    pub async fn help_settings_for_student(
        &self,
        student: &str,
    ) -> Result<ResolvedSetting, StorageError> {
        let row = self.get_student(student).await?;
        match row {
            Some(s) => self.help_settings_for_class(s.grade, s.class_number).await,
            None => Ok(ResolvedSetting {
                values: DEFAULT_HELP_SETTINGS,
                source: SettingSource::Default,
            }),
        }
    }

    /// Expands an admin scope into the real classes found in the roster, each
    /// with its resolved setting attached.
    pub async fn settings_for_scope(
        &self,
        scope: SettingsScope,
    ) -> Result<Vec<(i32, i32, ResolvedSetting)>, StorageError> {
        use schema::help_settings::dsl as hs;
        let classes = match scope {
            SettingsScope::All => self.list_classes(None).await?,
            SettingsScope::Grade(g) => self.list_classes(Some(g)).await?,
            SettingsScope::Class(c) => vec![(c.grade, c.class_number)],
        };
        let pool = self.pool();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(i32, i32, ResolvedSetting)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                let settings = hs::help_settings.load::<HelpSetting>(&mut conn)?;
                Ok(classes
                    .into_iter()
                    .map(|(g, c)| (g, c, resolve_for_class(&settings, g, c)))
                    .collect())
            },
        )
        .await?
    }

    pub async fn save_help_setting(
        &self,
        grade: i32,
        class_number: i32,
        cooldown_seconds: i32,
        daily_limit: i32,
    ) -> Result<(), StorageError> {
        if grade < 0 || class_number < 0 {
            return Err(StorageError::InvalidInput(
                "grade and class must not be negative".into(),
            ));
        }
        if cooldown_seconds < 0 || daily_limit < 0 {
            return Err(StorageError::InvalidInput(
                "cooldown and daily limit must not be negative".into(),
            ));
        }
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            upsert_setting(&mut conn, grade, class_number, cooldown_seconds, daily_limit)
        })
        .await?
    }

    /// Applies one cooldown/limit pair to every class in the list.
    pub async fn save_help_settings_batch(
        &self,
        classes: &[(i32, i32)],
        cooldown_seconds: i32,
        daily_limit: i32,
    ) -> Result<usize, StorageError> {
        if cooldown_seconds < 0 || daily_limit < 0 {
            return Err(StorageError::InvalidInput(
                "cooldown and daily limit must not be negative".into(),
            ));
        }
        let pool = self.pool();
        let classes = classes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<usize, StorageError> {
                for (g, c) in &classes {
                    upsert_setting(conn, *g, *c, cooldown_seconds, daily_limit)?;
                }
                Ok(classes.len())
            })
        })
        .await?
    }

    /// Removes a class or grade setting so the next cascade level applies.
    /// The global default row (0, 0) is protected.
    pub async fn delete_help_setting(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<bool, StorageError> {
        use schema::help_settings::dsl as hs;
        if grade == 0 && class_number == 0 {
            return Err(StorageError::InvalidInput(
                "the global default setting cannot be deleted".into(),
            ));
        }
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::delete(
                hs::help_settings
                    .filter(hs::grade.eq(grade))
                    .filter(hs::class_number.eq(class_number)),
            )
            .execute(&mut conn)?;
            Ok(n > 0)
        })
        .await?
    }
}

fn active_request_with_expiry(
    conn: &mut SqliteConnection,
    student: &str,
    now: NaiveDateTime,
) -> Result<Option<HelpRequest>, StorageError> {
    use schema::help_requests::dsl as hr;
    let row = hr::help_requests
        .filter(hr::student_id.eq(student))
        .filter(hr::is_active.eq(true))
        .first::<HelpRequest>(conn)
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };
    if now - row.started_at > Duration::minutes(REQUEST_EXPIRY_MINUTES) {
        diesel::update(
            hr::help_requests
                .filter(hr::student_id.eq(student))
                .filter(hr::is_active.eq(true)),
        )
        .set(hr::is_active.eq(false))
        .execute(conn)?;
        return Ok(None);
    }
    Ok(Some(row))
}

fn thanks_count_today(
    conn: &mut SqliteConnection,
    helper: &str,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    use schema::point_transactions::dsl as pt;
    let (start, end) = school_day_bounds(school_day(now));
    Ok(pt::point_transactions
        .filter(pt::helper_student_id.eq(helper))
        .filter(pt::transaction_time.ge(start.naive_utc()))
        .filter(pt::transaction_time.lt(end.naive_utc()))
        .count()
        .get_result::<i64>(conn)?)
}

fn load_settings(
    conn: &mut SqliteConnection,
    grade: i32,
    class_number: i32,
) -> Result<ResolvedSetting, StorageError> {
    use schema::help_settings::dsl as hs;
    let rows = hs::help_settings
        .filter(
            hs::grade
                .eq(grade)
                .and(hs::class_number.eq(class_number))
                .or(hs::grade.eq(grade).and(hs::class_number.eq(0)))
                .or(hs::grade.eq(0).and(hs::class_number.eq(0))),
        )
        .load::<HelpSetting>(conn)?;
    Ok(resolve_for_class(&rows, grade, class_number))
}

fn upsert_setting(
    conn: &mut SqliteConnection,
    grade: i32,
    class_number: i32,
    cooldown_seconds: i32,
    daily_limit: i32,
) -> Result<(), StorageError> {
    use schema::help_settings::dsl as hs;
    let now = Utc::now().naive_utc();
    let row = NewHelpSetting {
        grade,
        class_number,
        cooldown_seconds,
        daily_limit,
        updated_at: now,
    };
    diesel::insert_into(hs::help_settings)
        .values(&row)
        .on_conflict((hs::grade, hs::class_number))
        .do_update()
        .set((
            hs::cooldown_seconds.eq(cooldown_seconds),
            hs::daily_limit.eq(daily_limit),
            hs::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}
