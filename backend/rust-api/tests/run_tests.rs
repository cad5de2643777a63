use axum::http::StatusCode;
use serde_json::json;

mod common;

async fn play(app: &common::TestApp, run_id: &str, difficulty: &str, right: bool) {
    let session_id = app
        .start(json!({ "operation": "addition", "difficulty": difficulty, "run_id": run_id }))
        .await;
    let correct = app.correct_answer(&session_id).await;
    let answer = if right { correct } else { correct + 1.0 };
    let (status, _) = app.answer(&session_id, json!(answer)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_run_has_empty_tally() {
    let app = common::spawn_app();

    let (status, tally) = app.get("/api/v1/runs/fresh/tally").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(tally["run_id"], "fresh");
    assert_eq!(tally["attempted_count"], 0);
    assert_eq!(tally["total_score"], 0.0);
    assert_eq!(tally["accuracy_percent"], 0);
}

#[tokio::test]
async fn reset_clears_the_tally() {
    let app = common::spawn_app();
    play(&app, "reset-me", "Beginner", true).await;

    let (status, _) = app.request("DELETE", "/api/v1/runs/reset-me/tally", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, tally) = app.get("/api/v1/runs/reset-me/tally").await;
    assert_eq!(tally["attempted_count"], 0);
}

#[tokio::test]
async fn finished_runs_rank_on_the_leaderboard() {
    let app = common::spawn_app();
    play(&app, "weak", "Beginner", true).await;
    play(&app, "strong", "Expert", true).await;
    play(&app, "strong", "Expert", true).await;

    let (status, entry) = app
        .post("/api/v1/runs/strong/finish", json!({ "user_id": "user-7" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["score"], 5.0);
    assert_eq!(entry["difficulty"], "Expert");
    assert_eq!(entry["correct_count"], 2);

    let (status, _) = app.request("POST", "/api/v1/runs/weak/finish", None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, board) = app.get("/api/v1/leaderboard").await;
    assert_eq!(status, StatusCode::OK);
    let board = board.as_array().unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0]["rank"], 1);
    assert_eq!(board[0]["score"], 5.0);
    assert_eq!(board[0]["user_id"], "user-7");
    assert_eq!(board[1]["rank"], 2);
    assert_eq!(board[1]["score"], 1.0);
    assert!(board[1].get("user_id").is_none());

    // Finishing clears the run.
    let (_, tally) = app.get("/api/v1/runs/strong/tally").await;
    assert_eq!(tally["attempted_count"], 0);
}

#[tokio::test]
async fn finishing_an_empty_run_is_rejected() {
    let app = common::spawn_app();

    let (status, json) = app.request("POST", "/api/v1/runs/idle/finish", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["message"].as_str().unwrap().contains("idle"));
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let app = common::spawn_app();
    for _ in 0..3 {
        play(&app, "hist", "Beginner", true).await;
    }
    play(&app, "hist", "Intermediate", false).await;

    let (status, history) = app.get("/api/v1/history?limit=2").await;

    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["difficulty"], "Intermediate");
    assert_eq!(history[0]["is_correct"], false);
    assert!(history[0]["date"].as_str().unwrap() >= history[1]["date"].as_str().unwrap());
}

#[tokio::test]
async fn users_are_found_by_name() {
    let app = common::spawn_app();

    let (status, first) = app.post("/api/v1/users", json!({ "name": "Mei Ling" })).await;
    assert_eq!(status, StatusCode::OK);
    let (_, again) = app.post("/api/v1/users", json!({ "name": "Mei Ling" })).await;
    assert_eq!(first["id"], again["id"]);

    let (_, other) = app.post("/api/v1/users", json!({ "name": "Arjun" })).await;
    assert_ne!(first["id"], other["id"]);
}

#[tokio::test]
async fn short_user_name_is_rejected() {
    let app = common::spawn_app();

    let (status, _) = app.post("/api/v1/users", json!({ "name": "A" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
