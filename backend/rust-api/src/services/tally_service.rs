use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::cache::{get_json, set_json, CacheStore};
use super::scoring;
use super::session_store::SessionStore;
use crate::error::QuizError;
use crate::models::history::HighScoreEntry;
use crate::models::tally::RunningTally;
use crate::models::Difficulty;

const TALLY_TTL: u64 = 86_400; // 24 hours

fn tally_key(run_id: &str) -> String {
    format!("tally:{}", run_id)
}

/// Per-run running totals, kept in the cache and folded into a
/// [`HighScoreEntry`] when the run is finished.
#[derive(Clone)]
pub struct TallyService {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn SessionStore>,
}

impl TallyService {
    pub fn new(cache: Arc<dyn CacheStore>, store: Arc<dyn SessionStore>) -> Self {
        Self { cache, store }
    }

    pub async fn get(&self, run_id: &str) -> Result<RunningTally, QuizError> {
        let tally = get_json::<RunningTally>(self.cache.as_ref(), &tally_key(run_id))
            .await
            .map_err(QuizError::Persistence)?;
        Ok(tally.unwrap_or_default())
    }

    pub async fn record(
        &self,
        run_id: &str,
        difficulty: Difficulty,
        score_delta: f64,
        is_correct: bool,
    ) -> Result<RunningTally, QuizError> {
        let current = self.get(run_id).await?;
        let updated = scoring::accumulate(current, difficulty, score_delta, is_correct);
        set_json(self.cache.as_ref(), &tally_key(run_id), &updated, TALLY_TTL)
            .await
            .map_err(QuizError::Persistence)?;
        Ok(updated)
    }

    pub async fn reset(&self, run_id: &str) -> Result<(), QuizError> {
        self.cache
            .delete(&tally_key(run_id))
            .await
            .map_err(QuizError::Persistence)?;
        tracing::info!("Tally reset: run={}", run_id);
        Ok(())
    }

    /// Writes the run's score to the leaderboard and clears the tally.
    pub async fn finish(
        &self,
        run_id: &str,
        user_id: Option<String>,
    ) -> Result<HighScoreEntry, QuizError> {
        let tally = self.get(run_id).await?;
        if tally.attempted_count == 0 {
            return Err(QuizError::validation(format!(
                "Run {} has no scored answers",
                run_id
            )));
        }

        let entry = HighScoreEntry {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            user_id,
            score: tally.total_score,
            correct_count: tally.correct_count,
            attempted_count: tally.attempted_count,
            difficulty: tally.last_difficulty.unwrap_or(Difficulty::Beginner),
            created_at: Utc::now(),
        };
        self.store.save_high_score(&entry).await?;

        if let Err(e) = self.cache.delete(&tally_key(run_id)).await {
            tracing::warn!("Failed to clear tally for finished run={}: {}", run_id, e);
        }

        tracing::info!(
            "Run finished: run={}, score={}, correct={}/{}",
            run_id,
            entry.score,
            entry.correct_count,
            entry.attempted_count
        );
        Ok(entry)
    }
}
