use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn start_session_hides_the_answer() {
    let app = common::spawn_app();

    let (status, json) = app
        .post(
            "/api/v1/sessions",
            json!({ "operation": "addition", "difficulty": "Beginner" }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["operation"], "addition");
    assert_eq!(json["difficulty"], "Beginner");
    assert_eq!(json["time_limit_seconds"], 60);
    assert!(!json["problem_text"].as_str().unwrap().is_empty());
    assert!(!json["hint"].as_str().unwrap().is_empty());
    assert!(json.get("correct_answer").is_none());

    let session_id = json["session_id"].as_str().unwrap();
    let (status, view) = app.get(&format!("/api/v1/sessions/{}", session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "active");
    assert!(view.get("correct_answer").is_none());
    assert!(app.state.sessions.countdowns().is_running(session_id));
}

#[tokio::test]
async fn time_limit_follows_difficulty() {
    let app = common::spawn_app();

    for (difficulty, seconds) in [("Intermediate", 90), ("Advanced", 120), ("Expert", 180)] {
        let (status, json) = app
            .post(
                "/api/v1/sessions",
                json!({ "operation": "mixed", "difficulty": difficulty }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["time_limit_seconds"], seconds, "{}", difficulty);
    }
}

#[tokio::test]
async fn ai_problem_is_served_when_backend_answers() {
    let app = common::spawn_app_with(common::test_config(), Arc::new(common::pencils_ai()));

    let session_id = app
        .start(json!({ "operation": "multiplication", "difficulty": "Beginner" }))
        .await;

    let session = app.stored_session(&session_id).await;
    assert_eq!(session.problem.correct_answer, 36.0);
    assert!(session.problem.text.starts_with("Ali buys"));
}

#[tokio::test]
async fn unknown_operation_is_rejected() {
    let app = common::spawn_app();

    let (status, _) = app
        .post(
            "/api/v1/sessions",
            json!({ "operation": "exponent", "difficulty": "Beginner" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_session_returns_404() {
    let app = common::spawn_app();

    let (status, json) = app.get("/api/v1/sessions/does-not-exist").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn abandon_closes_session_without_submission() {
    let app = common::spawn_app();
    let session_id = app
        .start(json!({ "operation": "subtraction", "difficulty": "Beginner" }))
        .await;

    let (status, view) = app
        .post(&format!("/api/v1/sessions/{}/abandon", session_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "abandoned");
    assert!(view["correct_answer"].is_number());
    assert!(!app.state.sessions.countdowns().is_running(&session_id));

    let (status, _) = app.answer(&session_id, json!(1)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(&format!("/api/v1/sessions/{}/abandon", session_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, history) = app.get("/api/v1/history").await;
    assert_eq!(history.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn new_problem_in_run_abandons_the_previous_one() {
    let app = common::spawn_app();
    let first = app
        .start(json!({ "operation": "addition", "difficulty": "Beginner", "run_id": "run-a" }))
        .await;
    let other_run = app
        .start(json!({ "operation": "addition", "difficulty": "Beginner", "run_id": "run-b" }))
        .await;

    let second = app
        .start(json!({ "operation": "division", "difficulty": "Beginner", "run_id": "run-a" }))
        .await;

    let (_, first_view) = app.get(&format!("/api/v1/sessions/{}", first)).await;
    let (_, second_view) = app.get(&format!("/api/v1/sessions/{}", second)).await;
    let (_, other_view) = app.get(&format!("/api/v1/sessions/{}", other_run)).await;
    assert_eq!(first_view["status"], "abandoned");
    assert_eq!(second_view["status"], "active");
    assert_eq!(other_view["status"], "active");
}

#[tokio::test]
async fn blank_run_id_is_rejected() {
    let app = common::spawn_app();

    let (status, json) = app
        .post(
            "/api/v1/sessions",
            json!({ "operation": "addition", "difficulty": "Beginner", "run_id": "  " }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["message"].as_str().unwrap().contains("run_id"));
}

#[tokio::test]
async fn solution_fallback_states_the_answer() {
    let app = common::spawn_app();
    let session_id = app
        .start(json!({ "operation": "multiplication", "difficulty": "Intermediate" }))
        .await;
    let correct = app.correct_answer(&session_id).await;

    let (status, solution) = app
        .get(&format!("/api/v1/sessions/{}/solution", session_id))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(solution["source"], "fallback");
    assert_eq!(solution["final_answer"].as_f64().unwrap(), correct);
    let steps = solution["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 4);
    let last = steps.last().unwrap()["explanation"].as_str().unwrap();
    assert!(last.contains(&format!("{}", correct as i64)), "{}", last);
}

#[tokio::test]
async fn ai_solution_is_cached_per_session() {
    let ai = common::pencils_ai().reply(
        "step by step",
        r#"{"steps": [{"step_number": 1, "description": "Multiply", "calculation": "3 x 12 = 36", "explanation": "Three packs of twelve."}, {"description": "", "explanation": "dropped"}], "summary": "There are 36 pencils."}"#,
    );
    let app = common::spawn_app_with(common::test_config(), Arc::new(ai));
    let session_id = app
        .start(json!({ "operation": "multiplication", "difficulty": "Beginner" }))
        .await;
    let uri = format!("/api/v1/sessions/{}/solution", session_id);

    let (status, first) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["source"], "ai");
    assert_eq!(first["steps"].as_array().unwrap().len(), 1);

    let (_, second) = app.get(&uri).await;
    assert_eq!(second["source"], "cache");
    assert_eq!(second["steps"], first["steps"]);
    assert_eq!(second["final_answer"], 36.0);
}

#[tokio::test]
async fn stream_emits_timer_ticks() {
    let app = common::spawn_app();
    let session_id = app
        .start(json!({ "operation": "addition", "difficulty": "Beginner" }))
        .await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/sessions/{}/stream", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no SSE frame in time")
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&frame);
    assert!(text.contains("event: timer-tick"), "{}", text);
    assert!(text.contains(&session_id), "{}", text);
}

#[tokio::test]
async fn stream_for_unknown_session_returns_404() {
    let app = common::spawn_app();

    let (status, _) = app.get("/api/v1/sessions/missing/stream").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
