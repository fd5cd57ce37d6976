use chrono::{NaiveDate, Utc};
use classhelp_shared::domain::{school_day, school_day_bounds};
use diesel::prelude::*;

use super::models::{LearningRecord, Message, NewMessage, PointTransaction, Student};
use super::{StorageError, Store, configure_sqlite_conn, schema};

/// Student replies are clamped to this many characters before storage.
pub const REPLY_MAX_CHARS: usize = 100;

pub const ROLE_TEACHER: &str = "teacher";
pub const ROLE_STUDENT: &str = "student";

impl Store {
    // Learning records

    /// Submits today's reflection. Submission locks the day: a second submit
    /// for the same school day is a conflict.
    pub async fn submit_learning_record(
        &self,
        student: &str,
        core_learning: &str,
        learning_process: &[String],
    ) -> Result<LearningRecord, StorageError> {
        use schema::learning_records::dsl as lr;
        if core_learning.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "core learning text is required".into(),
            ));
        }
        let pool = self.pool();
        let sid = student.to_string();
        let core = core_learning.trim().to_string();
        let process_json = if learning_process.is_empty() {
            None
        } else {
            Some(serde_json::to_string(learning_process).map_err(|e| {
                StorageError::InvalidInput(format!("unencodable learning process: {e}"))
            })?)
        };
        tokio::task::spawn_blocking(move || -> Result<LearningRecord, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let day = school_day(Utc::now());
            conn.immediate_transaction(|conn| -> Result<LearningRecord, StorageError> {
                let existing = lr::learning_records
                    .filter(lr::student_id.eq(&sid))
                    .filter(lr::record_date.eq(day))
                    .first::<LearningRecord>(conn)
                    .optional()?;
                if let Some(row) = existing
                    && row.is_submitted
                {
                    return Err(StorageError::Conflict(
                        "today's record is already submitted".into(),
                    ));
                }
                diesel::insert_into(lr::learning_records)
                    .values((
                        lr::student_id.eq(&sid),
                        lr::record_date.eq(day),
                        lr::core_learning.eq(&core),
                        lr::learning_process.eq(process_json.as_deref()),
                        lr::is_submitted.eq(true),
                    ))
                    .on_conflict((lr::student_id, lr::record_date))
                    .do_update()
                    .set((
                        lr::core_learning.eq(&core),
                        lr::learning_process.eq(process_json.as_deref()),
                        lr::is_submitted.eq(true),
                    ))
                    .execute(conn)?;
                Ok(lr::learning_records
                    .filter(lr::student_id.eq(&sid))
                    .filter(lr::record_date.eq(day))
                    .first::<LearningRecord>(conn)?)
            })
        })
        .await?
    }

    pub async fn student_records(
        &self,
        student: &str,
    ) -> Result<Vec<LearningRecord>, StorageError> {
        use schema::learning_records::dsl as lr;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<LearningRecord>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(lr::learning_records
                .filter(lr::student_id.eq(&sid))
                .order(lr::record_date.desc())
                .load::<LearningRecord>(&mut conn)?)
        })
        .await?
    }

    /// Newest record per student of the class, with the student's name.
    pub async fn latest_records_for_class(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<Vec<(LearningRecord, String)>, StorageError> {
        use schema::learning_records::dsl as lr;
        use schema::students::dsl as st;
        let pool = self.pool();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(LearningRecord, String)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                let rows: Vec<(LearningRecord, Student)> = lr::learning_records
                    .inner_join(st::students.on(st::student_id.eq(lr::student_id)))
                    .filter(st::grade.eq(grade))
                    .filter(st::class_number.eq(class_number))
                    .order((lr::student_id.asc(), lr::record_date.desc()))
                    .select((LearningRecord::as_select(), Student::as_select()))
                    .load(&mut conn)?;
                let mut seen = std::collections::HashSet::new();
                Ok(rows
                    .into_iter()
                    .filter(|(record, _)| seen.insert(record.student_id.clone()))
                    .map(|(record, student)| (record, student.name))
                    .collect())
            },
        )
        .await?
    }

    pub async fn get_learning_record(
        &self,
        record_id: i32,
    ) -> Result<Option<LearningRecord>, StorageError> {
        use schema::learning_records::dsl as lr;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Option<LearningRecord>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(lr::learning_records
                .filter(lr::id.eq(record_id))
                .first::<LearningRecord>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn save_record_ai_text(
        &self,
        record_id: i32,
        text: &str,
    ) -> Result<Option<LearningRecord>, StorageError> {
        use schema::learning_records::dsl as lr;
        let pool = self.pool();
        let converted = text.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<LearningRecord>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::update(lr::learning_records.filter(lr::id.eq(record_id)))
                .set(lr::ai_converted.eq(&converted))
                .execute(&mut conn)?;
            if n == 0 {
                return Ok(None);
            }
            Ok(lr::learning_records
                .filter(lr::id.eq(record_id))
                .first::<LearningRecord>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn approve_learning_record(
        &self,
        record_id: i32,
    ) -> Result<Option<LearningRecord>, StorageError> {
        use schema::learning_records::dsl as lr;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Option<LearningRecord>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::update(lr::learning_records.filter(lr::id.eq(record_id)))
                .set((
                    lr::is_approved.eq(true),
                    lr::approved_at.eq(Utc::now().naive_utc()),
                ))
                .execute(&mut conn)?;
            if n == 0 {
                return Ok(None);
            }
            Ok(lr::learning_records
                .filter(lr::id.eq(record_id))
                .first::<LearningRecord>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn delete_learning_record(&self, record_id: i32) -> Result<bool, StorageError> {
        use schema::learning_records::dsl as lr;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::delete(lr::learning_records.filter(lr::id.eq(record_id)))
                .execute(&mut conn)?;
            Ok(n > 0)
        })
        .await?
    }

    /// AI-converted rows of a class for the teacher's export, name attached.
    pub async fn export_rows_for_class(
        &self,
        grade: i32,
        class_number: i32,
    ) -> Result<Vec<(String, String)>, StorageError> {
        use schema::learning_records::dsl as lr;
        use schema::students::dsl as st;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let rows: Vec<(Option<String>, String)> = lr::learning_records
                .inner_join(st::students.on(st::student_id.eq(lr::student_id)))
                .filter(st::grade.eq(grade))
                .filter(st::class_number.eq(class_number))
                .filter(lr::ai_converted.is_not_null())
                .order((lr::student_id.asc(), lr::record_date.asc()))
                .select((lr::ai_converted, st::name))
                .load(&mut conn)?;
            Ok(rows
                .into_iter()
                .filter_map(|(text, name)| text.map(|t| (name, t)))
                .collect())
        })
        .await?
    }

    // Point transactions (teacher review)

    /// A school day's transactions, newest first, with both names attached.
    pub async fn transactions_for_day(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<(PointTransaction, Option<String>, Option<String>)>, StorageError> {
        use schema::point_transactions::dsl as pt;
        use schema::students::dsl as st;
        let pool = self.pool();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(PointTransaction, Option<String>, Option<String>)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                let (start, end) = school_day_bounds(day);
                let rows = pt::point_transactions
                    .filter(pt::transaction_time.ge(start.naive_utc()))
                    .filter(pt::transaction_time.lt(end.naive_utc()))
                    .order(pt::transaction_time.desc())
                    .load::<PointTransaction>(&mut conn)?;

                let mut ids: Vec<String> = rows
                    .iter()
                    .flat_map(|t| {
                        [t.helper_student_id.clone(), t.helped_student_id.clone()]
                    })
                    .collect();
                ids.sort();
                ids.dedup();
                let names: std::collections::HashMap<String, String> = st::students
                    .filter(st::student_id.eq_any(&ids))
                    .select((st::student_id, st::name))
                    .load::<(String, String)>(&mut conn)?
                    .into_iter()
                    .collect();

                Ok(rows
                    .into_iter()
                    .map(|t| {
                        let helper = names.get(&t.helper_student_id).cloned();
                        let helped = names.get(&t.helped_student_id).cloned();
                        (t, helper, helped)
                    })
                    .collect())
            },
        )
        .await?
    }

    pub async fn get_point_transaction(
        &self,
        tx_id: i32,
    ) -> Result<Option<PointTransaction>, StorageError> {
        use schema::point_transactions::dsl as pt;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Option<PointTransaction>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(pt::point_transactions
                .filter(pt::id.eq(tx_id))
                .first::<PointTransaction>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn save_transaction_ai_text(
        &self,
        tx_id: i32,
        text: &str,
    ) -> Result<Option<PointTransaction>, StorageError> {
        use schema::point_transactions::dsl as pt;
        let pool = self.pool();
        let converted = text.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<PointTransaction>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::update(pt::point_transactions.filter(pt::id.eq(tx_id)))
                .set(pt::ai_description.eq(&converted))
                .execute(&mut conn)?;
            if n == 0 {
                return Ok(None);
            }
            Ok(pt::point_transactions
                .filter(pt::id.eq(tx_id))
                .first::<PointTransaction>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn approve_point_transaction(
        &self,
        tx_id: i32,
    ) -> Result<Option<PointTransaction>, StorageError> {
        use schema::point_transactions::dsl as pt;
        let pool = self.pool();
        tokio::task::spawn_blocking(move || -> Result<Option<PointTransaction>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::update(pt::point_transactions.filter(pt::id.eq(tx_id)))
                .set(pt::is_approved.eq(true))
                .execute(&mut conn)?;
            if n == 0 {
                return Ok(None);
            }
            Ok(pt::point_transactions
                .filter(pt::id.eq(tx_id))
                .first::<PointTransaction>(&mut conn)
                .optional()?)
        })
        .await?
    }

    // Messages

    pub async fn send_teacher_message(
        &self,
        to_student: &str,
        content: &str,
    ) -> Result<Message, StorageError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(StorageError::InvalidInput("empty message".into()));
        }
        self.insert_message(ROLE_TEACHER, None, ROLE_STUDENT, to_student, trimmed)
            .await
    }

    /// Student reply to the teacher, trimmed and clamped to 100 characters.
    pub async fn send_student_reply(
        &self,
        from_student: &str,
        content: &str,
    ) -> Result<Message, StorageError> {
        let clamped: String = content.trim().chars().take(REPLY_MAX_CHARS).collect();
        if clamped.is_empty() {
            return Err(StorageError::InvalidInput("empty message".into()));
        }
        self.insert_message(ROLE_STUDENT, Some(from_student), ROLE_TEACHER, "admin", &clamped)
            .await
    }

    async fn insert_message(
        &self,
        from_role: &str,
        from_id: Option<&str>,
        to_role: &str,
        to_id: &str,
        content: &str,
    ) -> Result<Message, StorageError> {
        use schema::messages::dsl as msg;
        let pool = self.pool();
        let from_role = from_role.to_string();
        let from_id = from_id.map(|s| s.to_string());
        let to_role = to_role.to_string();
        let to_id = to_id.to_string();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || -> Result<Message, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewMessage {
                from_role: &from_role,
                from_id: from_id.as_deref(),
                to_role: &to_role,
                to_id: &to_id,
                content: &content,
                is_read: false,
            };
            Ok(diesel::insert_into(msg::messages)
                .values(&row)
                .get_result::<Message>(&mut conn)?)
        })
        .await?
    }

    /// Most recent unread note for the student, if any.
    pub async fn latest_unread_message(
        &self,
        student: &str,
    ) -> Result<Option<Message>, StorageError> {
        use schema::messages::dsl as msg;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Message>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(msg::messages
                .filter(msg::to_role.eq(ROLE_STUDENT))
                .filter(msg::to_id.eq(&sid))
                .filter(msg::is_read.eq(false))
                .order(msg::created_at.desc())
                .first::<Message>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Marks one of the student's own messages read; scoping by recipient
    /// keeps students from acking someone else's note.
    pub async fn mark_message_read(
        &self,
        message_id: i32,
        student: &str,
    ) -> Result<bool, StorageError> {
        use schema::messages::dsl as msg;
        let pool = self.pool();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let n = diesel::update(
                msg::messages
                    .filter(msg::id.eq(message_id))
                    .filter(msg::to_role.eq(ROLE_STUDENT))
                    .filter(msg::to_id.eq(&sid)),
            )
            .set(msg::is_read.eq(true))
            .execute(&mut conn)?;
            Ok(n > 0)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classhelp_shared::api::StudentDto;

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let store = Store::connect_sqlite(db.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    async fn seed(store: &Store) {
        store
            .upsert_students(&[StudentDto {
                student_id: "3101".into(),
                name: "김하나".into(),
                grade: 3,
                class_number: 1,
                student_number: 1,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submission_locks_the_day() {
        let (store, _dir) = test_store().await;
        seed(&store).await;

        let record = store
            .submit_learning_record("3101", "분수의 통분", &["질문하기".into()])
            .await
            .unwrap();
        assert!(record.is_submitted);
        assert!(!record.is_approved);

        let err = store
            .submit_learning_record("3101", "다른 내용", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let records = store.student_records("3101").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].core_learning, "분수의 통분");
    }

    #[tokio::test]
    async fn ai_text_and_approval_are_persisted() {
        let (store, _dir) = test_store().await;
        seed(&store).await;
        let record = store
            .submit_learning_record("3101", "받아올림", &[])
            .await
            .unwrap();

        let updated = store
            .save_record_ai_text(record.id, "받아올림의 원리를 이해하였음.")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            updated.ai_converted.as_deref(),
            Some("받아올림의 원리를 이해하였음.")
        );

        let approved = store
            .approve_learning_record(record.id)
            .await
            .unwrap()
            .unwrap();
        assert!(approved.is_approved);
        assert!(approved.approved_at.is_some());

        let rows = store.export_rows_for_class(3, 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "김하나");

        assert!(store.save_record_ai_text(9999, "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reply_is_clamped_to_100_chars() {
        let (store, _dir) = test_store().await;
        let long: String = "감".repeat(150);
        let message = store.send_student_reply("3101", &long).await.unwrap();
        assert_eq!(message.content.chars().count(), REPLY_MAX_CHARS);
        assert_eq!(message.from_id.as_deref(), Some("3101"));

        let note = store
            .send_teacher_message("3101", "  내일 준비물 확인하세요  ")
            .await
            .unwrap();
        assert_eq!(note.content, "내일 준비물 확인하세요");

        let unread = store.latest_unread_message("3101").await.unwrap().unwrap();
        assert_eq!(unread.id, note.id);
        assert!(store.mark_message_read(note.id, "3101").await.unwrap());
        assert!(store.latest_unread_message("3101").await.unwrap().is_none());
        assert!(!store.mark_message_read(note.id, "3102").await.unwrap());
    }
}
