use axum::http::StatusCode;
use classhelp_server::{server, storage};
use classhelp_shared::api::{self, rest};
use classhelp_shared::domain::HelpStatus;
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const LOGIN_PATH: &str = "/api/v1/auth/login";
const STUDENT_LOGIN_PATH: &str = "/api/v1/auth/student-login";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    async fn teacher_login(&self) -> String {
        let body = self
            .request_expect(
                "POST",
                LOGIN_PATH,
                None,
                Some(json!({"username": "teacher", "password": "secret123"})),
                StatusCode::OK,
            )
            .await;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from auth response")
    }

    async fn student_login(&self, student_id: &str, name: &str) -> String {
        let body = self
            .request_expect(
                "POST",
                STUDENT_LOGIN_PATH,
                None,
                Some(json!({"student_id": student_id, "name": name})),
                StatusCode::OK,
            )
            .await;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from auth response")
    }

    async fn seed_roster(&self, teacher_token: &str) {
        let roster = json!([
            {"student_id": "3101", "name": "김하나", "grade": 3, "class_number": 1, "student_number": 1},
            {"student_id": "3102", "name": "이두리", "grade": 3, "class_number": 1, "student_number": 2},
            {"student_id": "3103", "name": "박세나", "grade": 3, "class_number": 1, "student_number": 3},
            {"student_id": "4101", "name": "최넷", "grade": 4, "class_number": 1, "student_number": 1},
        ]);
        let resp = self
            .request_expect(
                "PUT",
                "/api/v1/admin/roster",
                Some(teacher_token),
                Some(roster),
                StatusCode::OK,
            )
            .await;
        assert_eq!(resp.get("count").and_then(|v| v.as_u64()).unwrap(), 4);
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let teacher_hash = bcrypt::hash("secret123", bcrypt::DEFAULT_COST).unwrap();
    let config = server::AppConfig {
        jwt_secret: "testsecret".into(),
        teachers: vec![server::TeacherConfig {
            username: "teacher".into(),
            password_hash: teacher_hash,
        }],
        dev_cors_origin: None,
        listen_port: None,
        ai: server::AiSettings::default(),
    };

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");

    // No AI key in tests: rewrite endpoints must answer 500, everything else
    // must be unaffected.
    let state = server::AppState::new(config, store, None);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

#[tokio::test]
async fn public_endpoints_and_logins() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;

    let teacher_token = server.teacher_login().await;
    assert!(!teacher_token.is_empty());
    server.seed_roster(&teacher_token).await;

    // Wrong teacher password
    server
        .request_expect(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": "teacher", "password": "wrong"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;

    // Student logins: ok, name mismatch, malformed id
    let student_token = server.student_login("3101", "김하나").await;
    assert!(!student_token.is_empty());
    server
        .request_expect(
            "POST",
            STUDENT_LOGIN_PATH,
            None,
            Some(json!({"student_id": "3101", "name": "다른이름"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    server
        .request_expect(
            "POST",
            STUDENT_LOGIN_PATH,
            None,
            Some(json!({"student_id": "5101", "name": "김하나"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let cases: Vec<(&str, &str, Option<Value>)> = vec![
        ("GET", "/api/v1/students/3101/help", None),
        (
            "POST",
            "/api/v1/students/3101/help",
            Some(json!({"status": "helping"})),
        ),
        ("DELETE", "/api/v1/students/3101/help", None),
        (
            "POST",
            "/api/v1/students/3101/help/complete",
            Some(json!({"helper_student_id": "3102"})),
        ),
        ("GET", "/api/v1/students/3101/help/cooldown", None),
        ("GET", "/api/v1/students/3101/points", None),
        ("GET", "/api/v1/class/3-1/board", None),
        ("GET", "/api/v1/class/3-1/events", None),
        ("GET", "/api/v1/admin/students", None),
        ("GET", "/api/v1/admin/settings", None),
        ("POST", "/api/v1/auth/logout", None),
    ];

    for (method, path, body) in cases.iter() {
        server
            .request_expect(method, path, None, body.clone(), StatusCode::UNAUTHORIZED)
            .await;
    }
}

#[tokio::test]
async fn help_round_trip_completion_and_limits() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher_token = server.teacher_login().await;
    server.seed_roster(&teacher_token).await;

    // Use the shared REST client for the requester's side of the flow.
    let requester_token = rest::student_login(
        &server.base,
        &api::StudentAuthReq {
            student_id: "3101".into(),
            name: "김하나".into(),
        },
    )
    .await
    .unwrap()
    .token;
    let helper_token = server.student_login("3102", "이두리").await;

    assert!(
        rest::my_help(&server.base, "3101", &requester_token)
            .await
            .unwrap()
            .is_none()
    );

    let created = rest::create_help(
        &server.base,
        "3101",
        &requester_token,
        &api::CreateHelpReq {
            status: HelpStatus::Requesting,
        },
    )
    .await
    .unwrap();
    assert!(created.is_active);
    assert!(matches!(created.status, HelpStatus::Requesting));

    server
        .request_expect(
            "POST",
            "/api/v1/students/3102/help",
            Some(&helper_token),
            Some(json!({"status": "helping"})),
            StatusCode::OK,
        )
        .await;

    // Re-requesting while active is a conflict.
    server
        .request_expect(
            "POST",
            "/api/v1/students/3101/help",
            Some(&requester_token),
            Some(json!({"status": "helping"})),
            StatusCode::CONFLICT,
        )
        .await;

    // Board shows both sides; helping list has the helper only.
    let board = server
        .request_expect(
            "GET",
            "/api/v1/class/3-1/board",
            Some(&requester_token),
            None,
            StatusCode::OK,
        )
        .await;
    let board = board.as_array().unwrap();
    assert_eq!(board.len(), 3);
    assert_eq!(board[0].get("status").unwrap(), "requesting");
    assert_eq!(board[1].get("status").unwrap(), "helping");
    assert!(board[2].get("status").unwrap().is_null());

    let helping = rest::class_helping(&server.base, "3-1", &requester_token)
        .await
        .unwrap();
    assert_eq!(helping.len(), 1);
    assert_eq!(helping[0].student_id, "3102");

    // Thanks: one transaction, one point, request closed, cooldown stamped.
    let done = rest::complete_help(
        &server.base,
        "3101",
        &requester_token,
        &api::CompleteHelpReq {
            helper_student_id: "3102".into(),
            description: Some("받아올림을 알려줬어요".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(done.helper_points, 1);
    assert!(done.cooldown_until.is_some());

    assert!(
        rest::my_help(&server.base, "3101", &requester_token)
            .await
            .unwrap()
            .is_none()
    );

    let points = rest::daily_points(&server.base, "3102", &helper_token)
        .await
        .unwrap();
    assert_eq!(points.current_points, 1);
    assert_eq!(points.max_points, 20);

    let cooldown = rest::help_cooldown(&server.base, "3102", &helper_token)
        .await
        .unwrap();
    assert!(cooldown.in_cooldown);
    assert!(cooldown.remaining_seconds > 0 && cooldown.remaining_seconds <= 600);

    let count = server
        .request_expect(
            "GET",
            "/api/v1/students/3102/help/thanks-count",
            Some(&helper_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(count.get("count").unwrap().as_i64().unwrap(), 1);
    assert_eq!(count.get("daily_limit").unwrap().as_i64().unwrap(), 3);

    // Teacher's review list carries the day's transaction with names.
    let transactions = server
        .request_expect(
            "GET",
            "/api/v1/admin/transactions",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let transactions = transactions.as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].get("helper_student_id").unwrap(), "3102");
    assert_eq!(transactions[0].get("helped_student_id").unwrap(), "3101");
    assert_eq!(transactions[0].get("helper_name").unwrap(), "이두리");
    assert_eq!(transactions[0].get("points").unwrap().as_i64().unwrap(), 1);

    // Thanking yourself is rejected.
    server
        .request_expect(
            "POST",
            "/api/v1/students/3101/help/complete",
            Some(&requester_token),
            Some(json!({"helper_student_id": "3101"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn points_clamping_and_admin_writes() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher_token = server.teacher_login().await;
    server.seed_roster(&teacher_token).await;
    let student_token = server.student_login("3101", "김하나").await;

    // Lazy creation on first read.
    let points = server
        .request_expect(
            "GET",
            "/api/v1/students/3101/points",
            Some(&student_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(points.get("current_points").unwrap().as_i64().unwrap(), 0);

    // Students cannot write points; teachers can, clamped to the ceiling.
    server
        .request_expect(
            "PUT",
            "/api/v1/students/3101/points",
            Some(&student_token),
            Some(json!({"points": 5})),
            StatusCode::FORBIDDEN,
        )
        .await;
    let set = server
        .request_expect(
            "PUT",
            "/api/v1/students/3101/points",
            Some(&teacher_token),
            Some(json!({"points": 99})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(set.get("current_points").unwrap().as_i64().unwrap(), 20);

    let class_points = server
        .request_expect(
            "GET",
            "/api/v1/class/3-1/points",
            Some(&student_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        class_points.get("current_points").unwrap().as_i64().unwrap(),
        20
    );
    assert_eq!(
        class_points.get("goal_points").unwrap().as_i64().unwrap(),
        100
    );

    server
        .request_expect(
            "PUT",
            "/api/v1/admin/class/3-1/goal",
            Some(&teacher_token),
            Some(json!({"goal_points": 150})),
            StatusCode::NO_CONTENT,
        )
        .await;
    let class_points = server
        .request_expect(
            "GET",
            "/api/v1/class/3-1/points",
            Some(&student_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        class_points.get("goal_points").unwrap().as_i64().unwrap(),
        150
    );
}

#[tokio::test]
async fn settings_cascade_over_http() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher_token = server.teacher_login().await;
    server.seed_roster(&teacher_token).await;

    for (grade, class_number, cooldown, limit) in
        [(0, 0, 900, 2), (3, 0, 300, 4), (3, 1, 120, 5)]
    {
        server
            .request_expect(
                "PUT",
                "/api/v1/admin/settings",
                Some(&teacher_token),
                Some(json!({
                    "grade": grade,
                    "class_number": class_number,
                    "cooldown_seconds": cooldown,
                    "daily_limit": limit,
                })),
                StatusCode::NO_CONTENT,
            )
            .await;
    }

    let one = server
        .request_expect(
            "GET",
            "/api/v1/admin/settings?scope=3-1",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let one = &one.as_array().unwrap()[0];
    assert_eq!(one.get("cooldown_seconds").unwrap().as_i64().unwrap(), 120);
    assert_eq!(one.get("source").unwrap(), "individual");

    // 4-1 has no individual or grade row, so the global one applies.
    let all = server
        .request_expect(
            "GET",
            "/api/v1/admin/settings?scope=all",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 2); // 3-1 and 4-1 exist in the roster
    let four_one = all
        .iter()
        .find(|s| s.get("grade").unwrap() == 4)
        .unwrap();
    assert_eq!(four_one.get("source").unwrap(), "global");
    assert_eq!(
        four_one.get("cooldown_seconds").unwrap().as_i64().unwrap(),
        900
    );

    // Dropping the individual row falls back to the grade row.
    server
        .request_expect(
            "DELETE",
            "/api/v1/admin/settings/3/1",
            Some(&teacher_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let one = server
        .request_expect(
            "GET",
            "/api/v1/admin/settings?scope=3-1",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let one = &one.as_array().unwrap()[0];
    assert_eq!(one.get("source").unwrap(), "grade");
    assert_eq!(one.get("cooldown_seconds").unwrap().as_i64().unwrap(), 300);

    // The global default row cannot be deleted.
    server
        .request_expect(
            "DELETE",
            "/api/v1/admin/settings/0/0",
            Some(&teacher_token),
            None,
            StatusCode::BAD_REQUEST,
        )
        .await;

    // Batch apply to one grade.
    let batch = server
        .request_expect(
            "PUT",
            "/api/v1/admin/settings/batch",
            Some(&teacher_token),
            Some(json!({"scope": "3", "cooldown_seconds": 60, "daily_limit": 1})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(batch.get("count").unwrap().as_u64().unwrap(), 1);
}

#[tokio::test]
async fn records_messages_and_rewrite_without_key() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher_token = server.teacher_login().await;
    server.seed_roster(&teacher_token).await;
    let student_token = server.student_login("3101", "김하나").await;

    let record = server
        .request_expect(
            "POST",
            "/api/v1/students/3101/records",
            Some(&student_token),
            Some(json!({
                "core_learning": "분수의 통분",
                "learning_process": ["친구 돕기", "질문하기"],
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(record.get("is_submitted").unwrap(), true);
    let record_id = record.get("id").unwrap().as_i64().unwrap();

    // Submission locks the school day.
    server
        .request_expect(
            "POST",
            "/api/v1/students/3101/records",
            Some(&student_token),
            Some(json!({"core_learning": "다른 내용"})),
            StatusCode::CONFLICT,
        )
        .await;

    let latest = server
        .request_expect(
            "GET",
            "/api/v1/admin/records?class=3-1",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let latest = latest.as_array().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].get("student_name").unwrap(), "김하나");

    // No AI key configured: rewrite reports the server-side failure.
    server
        .request_expect(
            "POST",
            &format!("/api/v1/admin/records/{record_id}/rewrite"),
            Some(&teacher_token),
            None,
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .await;

    server
        .request_expect(
            "POST",
            &format!("/api/v1/admin/records/{record_id}/approve"),
            Some(&teacher_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;

    // Nothing AI-converted yet, so the export is empty.
    let export = server
        .request_expect(
            "GET",
            "/api/v1/admin/export?class=3-1",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(export.as_array().unwrap().is_empty());

    // Teacher note reaches the student; read receipt clears it.
    server
        .request_expect(
            "POST",
            "/api/v1/admin/messages",
            Some(&teacher_token),
            Some(json!({"to_student_id": "3101", "content": "내일 준비물 확인"})),
            StatusCode::OK,
        )
        .await;
    let unread = server
        .request_expect(
            "GET",
            "/api/v1/students/3101/messages/unread",
            Some(&student_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(unread.get("content").unwrap(), "내일 준비물 확인");
    let message_id = unread.get("id").unwrap().as_i64().unwrap();
    server
        .request_expect(
            "POST",
            &format!("/api/v1/students/3101/messages/{message_id}/read"),
            Some(&student_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let unread = server
        .request_expect(
            "GET",
            "/api/v1/students/3101/messages/unread",
            Some(&student_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(unread.is_null());

    // Student replies are clamped to 100 characters.
    let long: String = "감".repeat(150);
    let reply = server
        .request_expect(
            "POST",
            "/api/v1/students/3101/messages",
            Some(&student_token),
            Some(json!({"content": long})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        reply
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap()
            .chars()
            .count(),
        100
    );
}

#[tokio::test]
async fn student_access_control() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher_token = server.teacher_login().await;
    server.seed_roster(&teacher_token).await;
    let student_token = server.student_login("3101", "김하나").await;
    let other_class_token = server.student_login("4101", "최넷").await;

    let negative_cases: Vec<(&str, &str, Option<Value>, &str)> = vec![
        // Another student's resources
        ("GET", "/api/v1/students/3102/points", None, &student_token),
        ("GET", "/api/v1/students/3102/help", None, &student_token),
        (
            "POST",
            "/api/v1/students/3102/help",
            Some(json!({"status": "helping"})),
            &student_token,
        ),
        (
            "GET",
            "/api/v1/students/3102/records",
            None,
            &student_token,
        ),
        // Writing own points is a teacher action
        (
            "PUT",
            "/api/v1/students/3101/points",
            Some(json!({"points": 20})),
            &student_token,
        ),
        // Admin surface
        ("GET", "/api/v1/admin/students", None, &student_token),
        ("GET", "/api/v1/admin/settings", None, &student_token),
        (
            "PUT",
            "/api/v1/admin/roster",
            Some(json!([])),
            &student_token,
        ),
        ("GET", "/api/v1/admin/transactions", None, &student_token),
        // Another class's board
        ("GET", "/api/v1/class/3-1/board", None, &other_class_token),
        ("GET", "/api/v1/class/4-1/board", None, &student_token),
        ("GET", "/api/v1/class/4-1/events", None, &student_token),
    ];

    for (method, path, body, token) in negative_cases.iter() {
        server
            .request_expect(method, path, Some(token), body.clone(), StatusCode::FORBIDDEN)
            .await;
    }

    // The teacher sees every class.
    server
        .request_expect(
            "GET",
            "/api/v1/class/4-1/board",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let students = server
        .request_expect(
            "GET",
            "/api/v1/admin/students",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    let students = students.as_array().unwrap();
    assert_eq!(students.len(), 4);
    let first = &students[0];
    assert_eq!(first.get("student_id").unwrap(), "3101");
    assert_eq!(first.get("is_logged_in").unwrap(), true);
}

#[tokio::test]
async fn logout_clears_board_and_session() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let teacher_token = server.teacher_login().await;
    server.seed_roster(&teacher_token).await;
    let student_token = server.student_login("3101", "김하나").await;

    server
        .request_expect(
            "POST",
            "/api/v1/students/3101/help",
            Some(&student_token),
            Some(json!({"status": "requesting"})),
            StatusCode::OK,
        )
        .await;

    server
        .request_expect(
            "POST",
            "/api/v1/auth/logout",
            Some(&student_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;

    // The token is dead after logout.
    server
        .request_expect(
            "GET",
            "/api/v1/students/3101/help",
            Some(&student_token),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;

    // And the board no longer shows the request.
    let board = server
        .request_expect(
            "GET",
            "/api/v1/class/3-1/board",
            Some(&teacher_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(board.as_array().unwrap()[0].get("status").unwrap().is_null());
}
