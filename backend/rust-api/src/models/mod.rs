use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod answer;
pub mod difficulty;
pub mod history;
pub mod lifecycle;
pub mod solution;
pub mod tally;
pub mod timer;
pub mod user;

pub use difficulty::{Difficulty, DifficultyProfile, DifficultyTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Mixed,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Addition => "addition",
            OperationType::Subtraction => "subtraction",
            OperationType::Multiplication => "multiplication",
            OperationType::Division => "division",
            OperationType::Mixed => "mixed",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of generated content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Ai,
    Fallback,
    Cache,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSource::Ai => "ai",
            ContentSource::Fallback => "fallback",
            ContentSource::Cache => "cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub text: String,
    pub correct_answer: f64,
    pub operation: OperationType,
    pub difficulty: Difficulty,
    pub hint: String,
    pub source: ContentSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Archived => "archived",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSession {
    pub id: String,
    pub problem: Problem,
    pub status: SessionStatus,
    pub run_id: Option<String>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProblemSession {
    pub fn time_limit_seconds(&self) -> u32 {
        (self.expires_at - self.created_at).num_seconds().max(0) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub session_id: String,
    /// `None` when the countdown ran out before an answer arrived.
    pub user_answer: Option<f64>,
    pub is_correct: bool,
    pub feedback_text: String,
    pub difficulty: Difficulty,
    pub time_used_seconds: u32,
    pub score_delta: f64,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn expired(&self) -> bool {
        self.user_answer.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub session_id: String,
    pub user_answer: Option<f64>,
    pub is_correct: bool,
    pub feedback_text: String,
    pub difficulty: Difficulty,
    pub time_used_seconds: u32,
    pub score_delta: f64,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub operation: OperationType,
    pub difficulty: Difficulty,
    pub run_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub problem_text: String,
    pub hint: String,
    pub operation: OperationType,
    pub difficulty: Difficulty,
    pub time_limit_seconds: u32,
    pub expires_at: DateTime<Utc>,
}

/// Client view of a session. The answer stays hidden while the session is
/// still active.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub problem_text: String,
    pub hint: String,
    pub operation: OperationType,
    pub difficulty: Difficulty,
    pub status: SessionStatus,
    pub time_limit_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<f64>,
}

impl From<&ProblemSession> for SessionView {
    fn from(session: &ProblemSession) -> Self {
        let correct_answer = match session.status {
            SessionStatus::Active => None,
            SessionStatus::Archived | SessionStatus::Abandoned => {
                Some(session.problem.correct_answer)
            }
        };
        Self {
            session_id: session.id.clone(),
            problem_text: session.problem.text.clone(),
            hint: session.problem.hint.clone(),
            operation: session.problem.operation,
            difficulty: session.problem.difficulty,
            status: session.status,
            time_limit_seconds: session.time_limit_seconds(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            correct_answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(status: SessionStatus) -> ProblemSession {
        let now = Utc::now();
        ProblemSession {
            id: "s-1".to_string(),
            problem: Problem {
                text: "Ben has 4 marbles and finds 3 more.".to_string(),
                correct_answer: 7.0,
                operation: OperationType::Addition,
                difficulty: Difficulty::Beginner,
                hint: "Put the groups together.".to_string(),
                source: ContentSource::Fallback,
            },
            status,
            run_id: None,
            user_id: None,
            created_at: now,
            expires_at: now + Duration::seconds(60),
        }
    }

    #[test]
    fn active_view_hides_answer() {
        let view = SessionView::from(&session(SessionStatus::Active));
        assert!(view.correct_answer.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("correct_answer").is_none());
        assert_eq!(json["time_limit_seconds"], 60);
    }

    #[test]
    fn archived_view_reveals_answer() {
        let view = SessionView::from(&session(SessionStatus::Archived));
        assert_eq!(view.correct_answer, Some(7.0));
    }

    #[test]
    fn operation_uses_lowercase_names() {
        let op: OperationType = serde_json::from_str("\"multiplication\"").unwrap();
        assert_eq!(op, OperationType::Multiplication);
        assert_eq!(OperationType::Mixed.to_string(), "mixed");
    }
}
