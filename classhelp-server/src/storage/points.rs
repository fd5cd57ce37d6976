use chrono::{DateTime, NaiveDate, Utc};
use classhelp_shared::domain::school_day;
use diesel::prelude::*;

use super::models::{DailyPoints, NewClassGoal, NewDailyPoints};
use super::{StorageError, Store, configure_sqlite_conn, schema};

/// Hard ceiling for a student's points within one school day.
pub const MAX_DAILY_POINTS: i32 = 20;

/// Class-wide target when no goal row exists yet.
pub const DEFAULT_CLASS_GOAL: i32 = 100;

impl Store {
    /// Today's points row, created zeroed on first read. Creation races are
    /// absorbed by the insert-ignore + re-read.
    pub async fn get_or_create_daily_points(
        &self,
        student: &str,
    ) -> Result<DailyPoints, StorageError> {
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<DailyPoints, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            get_or_create(&mut conn, &sid, school_day(Utc::now()))
        })
        .await?
    }

    /// Overwrites today's points, clamped to `[0, max_points]`. Creates the
    /// day row first when it is missing.
    pub async fn set_daily_points(
        &self,
        student: &str,
        points: i32,
    ) -> Result<DailyPoints, StorageError> {
        use schema::daily_points::dsl as dp;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<DailyPoints, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let day = school_day(Utc::now());
            conn.immediate_transaction(|conn| -> Result<DailyPoints, StorageError> {
                let row = get_or_create(conn, &sid, day)?;
                let clamped = points.clamp(0, row.max_points);
                diesel::update(
                    dp::daily_points
                        .filter(dp::student_id.eq(&sid))
                        .filter(dp::date.eq(day)),
                )
                .set(dp::current_points.eq(clamped))
                .execute(conn)?;
                Ok(DailyPoints {
                    current_points: clamped,
                    ..row
                })
            })
        })
        .await?
    }

    /// Today's rows for every student who has one (admin overview).
    pub async fn list_today_points(&self) -> Result<Vec<DailyPoints>, StorageError> {
        use schema::daily_points::dsl as dp;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Vec<DailyPoints>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(dp::daily_points
                .filter(dp::date.eq(school_day(Utc::now())))
                .order(dp::student_id.asc())
                .load::<DailyPoints>(&mut conn)?)
        })
        .await?
    }

    /// Class total for today plus the class goal (default 100).
    pub async fn class_points_today(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<(i64, i32), StorageError> {
        use diesel::dsl::sum;
        use schema::class_goals::dsl as cg;
        use schema::daily_points::dsl as dp;
        use schema::students::dsl as st;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<(i64, i32), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let total: Option<i64> = dp::daily_points
                .inner_join(st::students.on(st::student_id.eq(dp::student_id)))
                .filter(st::grade.eq(grade))
                .filter(st::class_number.eq(class_number))
                .filter(dp::date.eq(school_day(Utc::now())))
                .select(sum(dp::current_points))
                .first::<Option<i64>>(&mut conn)?;
            let goal: Option<i32> = cg::class_goals
                .filter(cg::grade.eq(grade))
                .filter(cg::class_number.eq(class_number))
                .select(cg::goal_points)
                .first::<i32>(&mut conn)
                .optional()?;
            Ok((total.unwrap_or(0), goal.unwrap_or(DEFAULT_CLASS_GOAL)))
        })
        .await?
    }

    pub async fn set_class_goal(
        &self,
        grade: i32,
        class_number: i32,
        goal_points: i32,
    ) -> Result<(), StorageError> {
        use schema::class_goals::dsl as cg;
        if goal_points < 0 {
            return Err(StorageError::InvalidInput(
                "goal must not be negative".into(),
            ));
        }
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewClassGoal {
                grade,
                class_number,
                goal_points,
                updated_at: Utc::now().naive_utc(),
            };
            diesel::insert_into(cg::class_goals)
                .values(&row)
                .on_conflict((cg::grade, cg::class_number))
                .do_update()
                .set((
                    cg::goal_points.eq(goal_points),
                    cg::updated_at.eq(row.updated_at),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }
}

fn get_or_create(
    conn: &mut SqliteConnection,
    student: &str,
    day: NaiveDate,
) -> Result<DailyPoints, StorageError> {
    use schema::daily_points::dsl as dp;
    let row = NewDailyPoints {
        student_id: student,
        date: day,
        current_points: 0,
        max_points: MAX_DAILY_POINTS,
    };
    diesel::insert_into(dp::daily_points)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(dp::daily_points
        .filter(dp::student_id.eq(student))
        .filter(dp::date.eq(day))
        .first::<DailyPoints>(conn)?)
}

/// Clamped read-modify-write; callers run it inside `immediate_transaction`
/// so concurrent completions serialize instead of losing updates.
pub(super) fn increment_points(
    conn: &mut SqliteConnection,
    student: &str,
    amount: i32,
    now: DateTime<Utc>,
) -> Result<i32, StorageError> {
    use schema::daily_points::dsl as dp;
    let day = school_day(now);
    let row = get_or_create(conn, student, day)?;
    let next = (row.current_points + amount).clamp(0, row.max_points);
    diesel::update(
        dp::daily_points
            .filter(dp::student_id.eq(student))
            .filter(dp::date.eq(day)),
    )
    .set(dp::current_points.eq(next))
    .execute(conn)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let store = Store::connect_sqlite(db.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn lazy_creation_is_idempotent() {
        let (store, _dir) = test_store().await;
        let first = store.get_or_create_daily_points("3101").await.unwrap();
        assert_eq!(first.current_points, 0);
        assert_eq!(first.max_points, MAX_DAILY_POINTS);
        let again = store.get_or_create_daily_points("3101").await.unwrap();
        assert_eq!(again.current_points, 0);
        assert_eq!(again.date, first.date);
    }

    #[tokio::test]
    async fn set_clamps_to_range() {
        let (store, _dir) = test_store().await;
        let row = store.set_daily_points("3101", 7).await.unwrap();
        assert_eq!(row.current_points, 7);
        let high = store.set_daily_points("3101", 99).await.unwrap();
        assert_eq!(high.current_points, MAX_DAILY_POINTS);
        let low = store.set_daily_points("3101", -5).await.unwrap();
        assert_eq!(low.current_points, 0);
    }

    #[tokio::test]
    async fn increment_clamps_at_the_ceiling() {
        let (store, _dir) = test_store().await;
        store.set_daily_points("3101", 19).await.unwrap();

        let pool = store.pool();
        let incremented = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().unwrap();
            increment_points(&mut conn, "3101", 1, Utc::now()).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(incremented, 20);

        let pool = store.pool();
        let again = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().unwrap();
            increment_points(&mut conn, "3101", 1, Utc::now()).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(again, 20, "ceiling holds, not 21");
    }

    #[tokio::test]
    async fn class_summary_sums_only_the_class() {
        use classhelp_shared::api::StudentDto;
        let (store, _dir) = test_store().await;
        let roster: Vec<StudentDto> = [("3101", 3, 1, 1), ("3102", 3, 1, 2), ("4101", 4, 1, 1)]
            .iter()
            .map(|(id, g, c, n)| StudentDto {
                student_id: id.to_string(),
                name: format!("학생{n}"),
                grade: *g,
                class_number: *c,
                student_number: *n,
            })
            .collect();
        store.upsert_students(&roster).await.unwrap();
        store.set_daily_points("3101", 5).await.unwrap();
        store.set_daily_points("3102", 3).await.unwrap();
        store.set_daily_points("4101", 9).await.unwrap();

        let (total, goal) = store.class_points_today(3, 1).await.unwrap();
        assert_eq!(total, 8);
        assert_eq!(goal, DEFAULT_CLASS_GOAL);

        store.set_class_goal(3, 1, 150).await.unwrap();
        let (_, goal) = store.class_points_today(3, 1).await.unwrap();
        assert_eq!(goal, 150);
    }
}
