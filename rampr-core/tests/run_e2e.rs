use std::time::Duration;

use rampr_core::metrics::{MetricValue, Snapshot};
use rampr_core::{
    FieldType, HealthCheck, NoHooks, Report, RequestStep, ResponseSchema, RunOptions, RunPlan,
    Stage, StepScenario, ThinkTime, Threshold, ThresholdStatus, Tolerate, Verdict, run,
};
use rampr_testserver::{Behavior, TestServer};
use serde_json::json;

fn step(r: rampr_core::Result<RequestStep>) -> RequestStep {
    r.unwrap_or_else(|e| panic!("{e}"))
}

fn threshold(metric: &str, expr: &str) -> Threshold {
    Threshold::parse(metric, expr).unwrap_or_else(|e| panic!("{e}"))
}

fn rate(snapshot: &Snapshot, name: &str) -> (u64, u64, Option<f64>) {
    match snapshot.get(name).map(|s| &s.values) {
        Some(MetricValue::Rate {
            total,
            failures,
            rate,
        }) => (*total, *failures, *rate),
        other => panic!("{name} is not a rate: {other:?}"),
    }
}

fn samples(report: &Report, name: &str) -> u64 {
    report
        .metrics
        .get(name)
        .map(|s| s.sample_count())
        .unwrap_or_else(|| panic!("metric {name} missing"))
}

fn plan(base_url: &str, stages: Vec<Stage>) -> RunPlan {
    RunPlan::new(base_url, stages)
        .with_tick(Duration::from_millis(20))
        .with_graceful_stop(Duration::from_secs(5))
        .with_seed(7)
}

fn login_step(email: &str, password: &str) -> RequestStep {
    let body = json!({ "email": email, "password": password });
    step(RequestStep::post("login", "/api/v1/student/auth/login", &body))
        .with_schema(ResponseSchema::new().field("token", "/token", FieldType::String))
        .with_trend("login_duration")
}

fn browse_scenario() -> StepScenario {
    StepScenario::new("browse")
        .step(
            step(RequestStep::get("course_list", "/api/v1/student/courses"))
                .with_schema(ResponseSchema::new().field("courses", "/courses", FieldType::Array))
                .with_trend("course_list_duration"),
        )
        .pause(ThinkTime::Fixed(Duration::from_millis(20)))
        .step(
            step(RequestStep::get(
                "course_detail",
                "/api/v1/student/courses/{{course.course_id}}",
            ))
            .requires("courses")
            .pick("courses", "course")
            .with_trend("course_detail_duration"),
        )
        .pause(ThinkTime::Uniform {
            min: Duration::from_millis(10),
            max: Duration::from_millis(30),
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ramp_up_and_down_against_a_healthy_server_passes() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let plan = plan(
        server.base_url(),
        vec![
            Stage::new(Duration::from_millis(1000), 10),
            Stage::new(Duration::from_millis(1000), 0),
        ],
    )
    .with_threshold(threshold("http_req_duration", "p(95)<500"))
    .with_threshold(threshold("http_req_failed", "rate<0.05"))
    .with_threshold(threshold("errors", "rate<0.05"));

    let report = run(
        &plan,
        browse_scenario(),
        &HealthCheck::default(),
        RunOptions::default(),
    )
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Pass, "{report:#?}");
    assert!(report.iterations > 0);
    assert!((1..=10).contains(&report.vus_max));
    assert_eq!(report.seed, 7);
    assert!(samples(&report, "http_req_duration") >= 1);
    assert!(samples(&report, "course_detail_duration") >= 1);

    let Some(MetricValue::Trend(trend)) = report.metrics.get("http_req_duration").map(|s| &s.values)
    else {
        panic!("http_req_duration is not a trend");
    };
    assert!(trend.p95.is_some_and(|p| p < 500.0));
    assert!(
        report
            .thresholds
            .iter()
            .all(|t| t.status == ThresholdStatus::Pass)
    );
    assert!(server.stats().health_checks() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_call_failing_at_transport_level_fails_the_run() {
    let unused = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
        l.local_addr().unwrap_or_else(|e| panic!("{e}"))
    };
    let base_url = format!("http://{unused}");

    let plan = plan(
        &base_url,
        vec![Stage::new(Duration::from_millis(500), 2)],
    )
    .with_start_vus(2)
    .with_threshold(threshold("http_req_failed", "rate<0.05"));

    let scenario = StepScenario::new("down")
        .step(step(RequestStep::get("course_list", "/api/v1/student/courses")))
        .pause(ThinkTime::Fixed(Duration::from_millis(20)));

    let report = run(&plan, scenario, &NoHooks, RunOptions::default())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let (total, failures, ratio) = rate(&report.metrics, "http_req_failed");
    assert!(total > 0);
    assert_eq!(total, failures);
    assert_eq!(ratio, Some(1.0));
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.thresholds[0].status, ThresholdStatus::Fail);
    assert_eq!(report.thresholds[0].observed, Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_login_skips_the_authenticated_step_without_samples() {
    let server = TestServer::start_with(Behavior {
        login_status: Some(500),
        ..Behavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    let scenario = StepScenario::new("auth")
        .step(login_step("user01@test.com", "user01@test.com"))
        .step(
            step(RequestStep::get(
                "course_auth",
                "/api/v1/student/courses/1",
            ))
            .requires("token")
            .with_header("authorization", "Bearer {{token}}")
            .map(|s| s.with_trend("auth_course_duration"))
            .unwrap_or_else(|e| panic!("{e}")),
        )
        .pause(ThinkTime::Fixed(Duration::from_millis(20)));

    let plan = plan(
        server.base_url(),
        vec![Stage::new(Duration::from_millis(400), 2)],
    )
    .with_start_vus(2);

    let report = run(&plan, scenario, &HealthCheck::default(), RunOptions::default())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert!(report.iterations > 0);
    assert_eq!(samples(&report, "auth_course_duration"), 0);
    assert_eq!(samples(&report, "checks{step:course_auth}"), 0);

    let (total, failures, _) = rate(&report.metrics, "checks{step:login}");
    assert!(total > 0);
    assert_eq!(total, failures);
    assert_eq!(server.stats().authorized_requests(), 0);
    assert!(server.stats().login_attempts() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_health_check_aborts_before_any_load() {
    let server = TestServer::start_with(Behavior {
        health_status: 503,
        ..Behavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    let plan = plan(
        server.base_url(),
        vec![Stage::new(Duration::from_secs(5), 5)],
    )
    .with_threshold(threshold("http_req_duration", "p(95)<500"));

    let report = run(
        &plan,
        browse_scenario(),
        &HealthCheck::default(),
        RunOptions::default(),
    )
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Aborted);
    assert!(report.setup_error.as_deref().is_some_and(|e| e.contains("503")));
    assert_eq!(report.iterations, 0);
    assert_eq!(report.vus_max, 0);
    assert!(!report.metrics.is_empty());
    for series in report.metrics.iter() {
        assert_eq!(series.sample_count(), 0, "{} has samples", series.name);
    }
    assert_eq!(report.thresholds[0].status, ThresholdStatus::Indeterminate);
    assert_eq!(server.stats().health_checks(), 1);
    assert_eq!(server.stats().requests_total(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tolerated_not_enrolled_response_passes_the_check() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    // user02 is only enrolled in course 1.
    let scenario = StepScenario::new("progress")
        .step(login_step("user02@test.com", "user02@test.com"))
        .step(
            step(RequestStep::get(
                "progress",
                "/api/v1/student/courses/3/progress",
            ))
            .requires("token")
            .with_header("authorization", "Bearer {{token}}")
            .map(|s| {
                s.tolerate(Tolerate {
                    status: 403,
                    pointer: Some("/code".into()),
                    equals: Some(json!(6001)),
                })
            })
            .unwrap_or_else(|e| panic!("{e}")),
        )
        .pause(ThinkTime::Fixed(Duration::from_millis(20)));

    let plan = plan(
        server.base_url(),
        vec![Stage::new(Duration::from_millis(400), 1)],
    )
    .with_start_vus(1)
    .with_threshold(threshold("errors", "rate==0"));

    let report = run(&plan, scenario, &NoHooks, RunOptions::default())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let (total, failures, _) = rate(&report.metrics, "checks{step:progress}");
    assert!(total > 0);
    assert_eq!(failures, 0);

    let (_, http_failures, _) = rate(&report.metrics, "http_req_failed");
    assert_eq!(http_failures, total);

    assert_eq!(rate(&report.metrics, "errors").2, Some(0.0));
    assert_eq!(report.verdict, Verdict::Pass);
    assert!(report.checks.iter().any(|c| c.step == "progress" && c.failures == 0));
}
