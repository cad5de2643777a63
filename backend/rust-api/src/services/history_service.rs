use std::sync::Arc;

use super::session_store::SessionStore;
use crate::error::QuizError;
use crate::models::history::{HistoryEntry, LeaderboardEntry};

/// Read-only projections over persisted submissions and high scores.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn SessionStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Most recent scored sessions, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, QuizError> {
        let rows = self
            .store
            .list_recent_sessions_with_submissions(limit)
            .await?;
        Ok(rows
            .iter()
            .map(|(session, submission)| HistoryEntry::new(session, submission))
            .collect())
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, QuizError> {
        let entries = self.store.top_scores(limit).await?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| LeaderboardEntry {
                rank: index as u32 + 1,
                score: entry.score,
                difficulty: entry.difficulty,
                date: entry.created_at,
                user_id: entry.user_id,
            })
            .collect())
    }
}
