use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Difficulty, OperationType, ProblemSession, Submission};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub problem_text: String,
    pub correct_answer: f64,
    pub operation: OperationType,
    pub difficulty: Difficulty,
    pub user_answer: Option<f64>,
    pub is_correct: bool,
    pub feedback_text: String,
    pub time_used_seconds: u32,
    pub score_delta: f64,
    pub date: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(session: &ProblemSession, submission: &Submission) -> Self {
        Self {
            session_id: session.id.clone(),
            problem_text: session.problem.text.clone(),
            correct_answer: session.problem.correct_answer,
            operation: session.problem.operation,
            difficulty: submission.difficulty,
            user_answer: submission.user_answer,
            is_correct: submission.is_correct,
            feedback_text: submission.feedback_text.clone(),
            time_used_seconds: submission.time_used_seconds,
            score_delta: submission.score_delta,
            date: submission.created_at,
        }
    }
}

/// Score recorded when a practice run is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighScoreEntry {
    pub id: String,
    pub run_id: String,
    pub user_id: Option<String>,
    pub score: f64,
    pub correct_count: u32,
    pub attempted_count: u32,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub score: f64,
    pub difficulty: Difficulty,
    pub date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

impl ListQuery {
    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 100;

    pub fn resolved_limit(&self) -> usize {
        match self.limit {
            Some(limit) if limit > 0 => (limit as usize).min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FinishRunRequest {
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_is_clamped() {
        assert_eq!(ListQuery { limit: None }.resolved_limit(), 10);
        assert_eq!(ListQuery { limit: Some(0) }.resolved_limit(), 10);
        assert_eq!(ListQuery { limit: Some(-4) }.resolved_limit(), 10);
        assert_eq!(ListQuery { limit: Some(25) }.resolved_limit(), 25);
        assert_eq!(ListQuery { limit: Some(5000) }.resolved_limit(), 100);
    }
}
