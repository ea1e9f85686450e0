use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/health";
pub const PATH_LOGIN: &str = "/api/v1/student/auth/login";
pub const PATH_BRANCHES: &str = "/api/v1/student/branches";
pub const PATH_COURSES: &str = "/api/v1/student/courses";
pub const PATH_COURSE: &str = "/api/v1/student/courses/{id}";
pub const PATH_COURSE_PROGRESS: &str = "/api/v1/student/courses/{id}/progress";
pub const PATH_COURSE_COMMENTS: &str = "/api/v1/courses/{id}/comments";

/// Application error code returned with 403 when a student is not enrolled in a course.
pub const CODE_NOT_ENROLLED: u64 = 6001;

/// Knobs for simulating an unhealthy or failing backend.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Status answered by the health endpoint.
    pub health_status: u16,
    /// When set, every login attempt fails with this status.
    pub login_status: Option<u16>,
    /// Artificial delay added to every API response.
    pub latency: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            health_status: 200,
            login_status: None,
            latency: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    health_checks: Arc<AtomicU64>,
    login_attempts: Arc<AtomicU64>,
    authorized_requests: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_health_checks(&self) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_login_attempts(&self) {
        self.login_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_authorized_requests(&self) {
        self.authorized_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn health_checks(&self) -> u64 {
        self.health_checks.load(Ordering::Relaxed)
    }

    pub fn login_attempts(&self) -> u64 {
        self.login_attempts.load(Ordering::Relaxed)
    }

    /// Requests that carried a valid bearer token.
    pub fn authorized_requests(&self) -> u64 {
        self.authorized_requests.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct AppState {
    stats: TestServerStats,
    behavior: Arc<Behavior>,
}

impl AppState {
    async fn enter(&self) {
        self.stats.inc_requests_total();
        if !self.behavior.latency.is_zero() {
            sleep(self.behavior.latency).await;
        }
    }
}

struct Student {
    user_id: u64,
    email: &'static str,
    password: &'static str,
    enrolled: &'static [u64],
}

const STUDENTS: &[Student] = &[
    Student {
        user_id: 1,
        email: "user01@test.com",
        password: "user01@test.com",
        enrolled: &[1, 2],
    },
    Student {
        user_id: 2,
        email: "user02@test.com",
        password: "user02@test.com",
        enrolled: &[1],
    },
    Student {
        user_id: 3,
        email: "teacher@example.com",
        password: "teacher123",
        enrolled: &[],
    },
];

#[derive(Debug, Clone, Serialize)]
struct Course {
    course_id: u64,
    course_title: &'static str,
    description: &'static str,
    status: &'static str,
}

const COURSES: &[Course] = &[
    Course {
        course_id: 1,
        course_title: "Rust Fundamentals",
        description: "Ownership, borrowing and the type system.",
        status: "active",
    },
    Course {
        course_id: 2,
        course_title: "Async Rust",
        description: "Futures, executors and structured concurrency.",
        status: "active",
    },
    Course {
        course_id: 3,
        course_title: "Distributed Systems",
        description: "Replication, consensus and sharding.",
        status: "active",
    },
];

fn error_body(code: u64, message: &str) -> Json<Value> {
    Json(json!({ "code": code, "message": message }))
}

fn bearer_student(headers: &HeaderMap) -> Option<&'static Student> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?;
    let id: u64 = token.strip_prefix("token-")?.parse().ok()?;
    STUDENTS.iter().find(|s| s.user_id == id)
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    state.stats.inc_requests_total();
    state.stats.inc_health_checks();
    let status =
        StatusCode::from_u16(state.behavior.health_status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    let label = if status.is_success() { "ok" } else { "unavailable" };
    (status, Json(json!({ "status": label })))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn handle_login(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    state.enter().await;
    state.stats.inc_login_attempts();

    if let Some(status) = state.behavior.login_status {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, error_body(1000, "login unavailable"));
    }

    let req: LoginRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return (StatusCode::BAD_REQUEST, error_body(1001, &err.to_string())),
    };

    match STUDENTS
        .iter()
        .find(|s| s.email == req.email && s.password == req.password)
    {
        Some(s) => (
            StatusCode::OK,
            Json(json!({
                "token": format!("token-{}", s.user_id),
                "user": { "user_id": s.user_id, "email": s.email },
            })),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            error_body(2003, "invalid email or password"),
        ),
    }
}

async fn handle_branches(State(state): State<AppState>) -> Json<Value> {
    state.enter().await;
    Json(json!([
        { "branch_id": 1, "branch_name": "north" },
        { "branch_id": 2, "branch_name": "south" },
    ]))
}

async fn handle_courses(State(state): State<AppState>) -> Json<Value> {
    state.enter().await;
    Json(json!({ "courses": COURSES, "total": COURSES.len() }))
}

async fn handle_course(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.enter().await;
    if bearer_student(&headers).is_some() {
        state.stats.inc_authorized_requests();
    }

    match COURSES.iter().find(|c| c.course_id == id) {
        Some(c) => (StatusCode::OK, Json(json!(c))),
        None => (StatusCode::NOT_FOUND, error_body(3001, "course not found")),
    }
}

async fn handle_progress(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.enter().await;

    let Some(student) = bearer_student(&headers) else {
        return (StatusCode::UNAUTHORIZED, error_body(1003, "unauthorized"));
    };
    state.stats.inc_authorized_requests();

    if student.enrolled.contains(&id) {
        let progress = (student.user_id * 37 + id * 11) % 100;
        (
            StatusCode::OK,
            Json(json!({ "course_id": id, "user_id": student.user_id, "progress": progress })),
        )
    } else {
        (
            StatusCode::FORBIDDEN,
            error_body(CODE_NOT_ENROLLED, "not enrolled in course"),
        )
    }
}

async fn handle_comments(State(state): State<AppState>, Path(id): Path<u64>) -> Json<Value> {
    state.enter().await;
    Json(json!([
        { "comment_id": id * 10 + 1, "course_id": id, "user_id": 1, "comment_content": "great course" },
        { "comment_id": id * 10 + 2, "course_id": id, "user_id": 2, "comment_content": "thanks" },
    ]))
}

pub fn router(stats: TestServerStats, behavior: Behavior) -> Router {
    let state = AppState {
        stats,
        behavior: Arc::new(behavior),
    };

    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_LOGIN, post(handle_login))
        .route(PATH_BRANCHES, get(handle_branches))
        .route(PATH_COURSES, get(handle_courses))
        .route(PATH_COURSE, get(handle_course))
        .route(PATH_COURSE_PROGRESS, get(handle_progress))
        .route(PATH_COURSE_COMMENTS, get(handle_comments))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();

        let app = router(stats.clone(), behavior);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
