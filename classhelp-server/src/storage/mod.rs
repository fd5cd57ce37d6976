mod help;
pub mod models;
mod points;
mod records;
pub mod schema;

pub use help::{CooldownStatus, HelpCompletion, ResolvedSetting, resolve_for_class};

use chrono::Utc;
use classhelp_shared::api::StudentDto;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{NewSession, NewStudent, Student};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation conflicts with current state (active request exists,
    /// daily limit reached, record already submitted).
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    pub(crate) fn pool(&self) -> Pool<ConnectionManager<SqliteConnection>> {
        self.pool.clone()
    }

    // Roster

    pub async fn upsert_students(&self, roster: &[StudentDto]) -> Result<usize, StorageError> {
        use schema::students;
        let pool = self.pool.clone();
        let roster_owned = roster.to_owned();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            for s in &roster_owned {
                let new_student = NewStudent {
                    student_id: &s.student_id,
                    name: &s.name,
                    grade: s.grade,
                    class_number: s.class_number,
                    student_number: s.student_number,
                };
                diesel::insert_into(students::table)
                    .values(&new_student)
                    .on_conflict(students::student_id)
                    .do_update()
                    .set((
                        students::name.eq(new_student.name),
                        students::grade.eq(new_student.grade),
                        students::class_number.eq(new_student.class_number),
                        students::student_number.eq(new_student.student_number),
                    ))
                    .execute(&mut conn)?;
            }
            Ok(roster_owned.len())
        })
        .await?
    }

    pub async fn get_student(&self, student: &str) -> Result<Option<Student>, StorageError> {
        use schema::students::dsl::*;
        let pool = self.pool.clone();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Student>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(students
                .filter(student_id.eq(&sid))
                .first::<Student>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Roster lookup used by student login: id plus exact (trimmed) name.
    pub async fn find_student_by_id_and_name(
        &self,
        student: &str,
        student_name: &str,
    ) -> Result<Option<Student>, StorageError> {
        use schema::students::dsl::*;
        let pool = self.pool.clone();
        let sid = student.to_string();
        let wanted = student_name.trim().to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Student>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(students
                .filter(student_id.eq(&sid))
                .filter(name.eq(&wanted))
                .first::<Student>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn list_class_students(
        &self,
        class_grade: i32,
        class_no: i32,
    ) -> Result<Vec<Student>, StorageError> {
        use schema::students::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Student>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(students
                .filter(grade.eq(class_grade))
                .filter(class_number.eq(class_no))
                .order(student_number.asc())
                .load::<Student>(&mut conn)?)
        })
        .await?
    }

    /// Removes a student and everything keyed to them. One transaction so a
    /// half-deleted student can never linger.
    pub async fn delete_student(&self, student: &str) -> Result<bool, StorageError> {
        let pool = self.pool.clone();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut deleted = false;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                use schema::{daily_points, help_requests, learning_records, sessions, students};
                diesel::delete(help_requests::table.filter(help_requests::student_id.eq(&sid)))
                    .execute(conn)?;
                diesel::delete(daily_points::table.filter(daily_points::student_id.eq(&sid)))
                    .execute(conn)?;
                diesel::delete(
                    learning_records::table.filter(learning_records::student_id.eq(&sid)),
                )
                .execute(conn)?;
                diesel::delete(sessions::table.filter(sessions::username.eq(&sid)))
                    .execute(conn)?;
                let n = diesel::delete(students::table.filter(students::student_id.eq(&sid)))
                    .execute(conn)?;
                deleted = n > 0;
                Ok(())
            })?;
            Ok(deleted)
        })
        .await?
    }

    /// Full roster with each student's most recent session activity, for the
    /// admin presence view. The caller decides what counts as "logged in".
    pub async fn list_students_with_last_seen(
        &self,
    ) -> Result<Vec<(Student, Option<chrono::NaiveDateTime>)>, StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(Student, Option<chrono::NaiveDateTime>)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                use diesel::dsl::max;
                use schema::sessions::dsl as se;
                use schema::students::dsl as st;

                let rows = st::students
                    .order(st::student_id.asc())
                    .load::<Student>(&mut conn)?;
                let seen: Vec<(String, Option<chrono::NaiveDateTime>)> = se::sessions
                    .group_by(se::username)
                    .select((se::username, max(se::last_used_at)))
                    .load::<(String, Option<chrono::NaiveDateTime>)>(&mut conn)?;
                let mut map = std::collections::HashMap::new();
                for (user, last) in seen {
                    map.insert(user, last);
                }
                Ok(rows
                    .into_iter()
                    .map(|s| {
                        let last = map.get(&s.student_id).cloned().unwrap_or(None);
                        (s, last)
                    })
                    .collect())
            },
        )
        .await?
    }

    /// Distinct (grade, class_number) pairs present in the roster.
    pub async fn list_classes(
        &self,
        grade_filter: Option<i32>,
    ) -> Result<Vec<(i32, i32)>, StorageError> {
        use schema::students::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(i32, i32)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut query = students
                .select((grade, class_number))
                .distinct()
                .order((grade.asc(), class_number.asc()))
                .into_boxed();
            if let Some(g) = grade_filter {
                query = query.filter(grade.eq(g));
            }
            Ok(query.load::<(i32, i32)>(&mut conn)?)
        })
        .await?
    }

    // Session helpers for JWT inactivity windows

    pub async fn create_session(&self, jti_: &str, username_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        let u = username_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession {
                jti: &j,
                username: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Drops every session held by a user. Student login calls this first so
    /// a student is logged in from at most one place.
    pub async fn delete_sessions_for_user(&self, user: &str) -> Result<usize, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let u = user.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(diesel::delete(sessions.filter(username.eq(&u))).execute(&mut conn)?)
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't idled out.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// Combines the idle timeout check and the `last_used_at` update into a
    /// single UPDATE, eliminating the race between checking and updating.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }
}

pub(crate) fn configure_sqlite_conn(
    conn: &mut SqliteConnection,
) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
