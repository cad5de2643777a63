#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use mathdrill_api::{
    config::Config,
    create_router,
    error::UpstreamError,
    models::ProblemSession,
    services::{
        ai_client::{DisabledTextGenerator, TextGenerator},
        cache::MemoryCache,
        session_store::{InMemorySessionStore, SessionStore},
        AppState,
    },
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<InMemorySessionStore>,
}

/// Answers prompts by the first rule whose needle occurs in the prompt;
/// anything unmatched behaves like a disabled backend.
pub struct PromptRouter {
    rules: Vec<(&'static str, String)>,
}

impl PromptRouter {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn reply(mut self, needle: &'static str, reply: impl Into<String>) -> Self {
        self.rules.push((needle, reply.into()));
        self
    }
}

#[async_trait]
impl TextGenerator for PromptRouter {
    async fn generate_text(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle))
            .map(|(_, reply)| Ok(reply.clone()))
            .unwrap_or(Err(UpstreamError::Disabled))
    }
}

/// A multiplication problem with a known answer of 36.
pub fn pencils_ai() -> PromptRouter {
    PromptRouter::new().reply(
        "math word problem",
        r#"{"problem_text": "Ali buys 3 packs of 12 pencils. How many pencils does he have?", "final_answer": 36, "hint": "Multiply the packs by the pencils in each pack."}"#,
    )
}

pub fn test_config() -> Config {
    Config {
        tick_interval_ms: 20,
        ..Config::default()
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config(), Arc::new(DisabledTextGenerator))
}

pub fn spawn_app_with(config: Config, ai: Arc<dyn TextGenerator>) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(InMemorySessionStore::new());
    let state = Arc::new(AppState::from_parts(
        config,
        store.clone(),
        Arc::new(MemoryCache::new()),
        ai,
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
    }
}

impl TestApp {
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                panic!("non-JSON body for {} {}: {}", method, uri, String::from_utf8_lossy(&bytes))
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    /// Starts a session and returns its id.
    pub async fn start(&self, body: Value) -> String {
        let (status, json) = self.post("/api/v1/sessions", body).await;
        assert_eq!(status, StatusCode::CREATED, "start failed: {}", json);
        json["session_id"].as_str().unwrap().to_string()
    }

    pub async fn stored_session(&self, session_id: &str) -> ProblemSession {
        self.store.get_session(session_id).await.unwrap().unwrap()
    }

    pub async fn correct_answer(&self, session_id: &str) -> f64 {
        self.stored_session(session_id).await.problem.correct_answer
    }

    pub async fn answer(&self, session_id: &str, answer: Value) -> (StatusCode, Value) {
        self.post(
            &format!("/api/v1/sessions/{}/answers", session_id),
            serde_json::json!({ "answer": answer }),
        )
        .await
    }
}
