use serde::{Deserialize, Serialize};

use super::Difficulty;

/// Running aggregate across one practice run. Derived from submissions and
/// never treated as the source of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningTally {
    pub correct_count: u32,
    pub attempted_count: u32,
    pub total_score: f64,
    #[serde(default)]
    pub last_difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyView {
    pub run_id: String,
    pub correct_count: u32,
    pub attempted_count: u32,
    pub total_score: f64,
    pub accuracy_percent: u32,
}

impl TallyView {
    pub fn new(run_id: &str, tally: &RunningTally) -> Self {
        Self {
            run_id: run_id.to_string(),
            correct_count: tally.correct_count,
            attempted_count: tally.attempted_count,
            total_score: tally.total_score,
            accuracy_percent: crate::services::scoring::accuracy_percent(tally),
        }
    }
}
