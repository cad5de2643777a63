use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
        Difficulty::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
            Difficulty::Expert => "Expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyProfile {
    pub time_limit_seconds: u32,
    pub score_multiplier: f64,
}

/// Timing and scoring policy per tier. Loaded once from configuration and
/// never persisted alongside sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyTable {
    #[serde(default = "default_beginner")]
    pub beginner: DifficultyProfile,
    #[serde(default = "default_intermediate")]
    pub intermediate: DifficultyProfile,
    #[serde(default = "default_advanced")]
    pub advanced: DifficultyProfile,
    #[serde(default = "default_expert")]
    pub expert: DifficultyProfile,
}

impl Default for DifficultyTable {
    fn default() -> Self {
        Self {
            beginner: default_beginner(),
            intermediate: default_intermediate(),
            advanced: default_advanced(),
            expert: default_expert(),
        }
    }
}

impl DifficultyTable {
    pub fn profile(&self, difficulty: Difficulty) -> DifficultyProfile {
        match difficulty {
            Difficulty::Beginner => self.beginner,
            Difficulty::Intermediate => self.intermediate,
            Difficulty::Advanced => self.advanced,
            Difficulty::Expert => self.expert,
        }
    }

    pub fn time_limit_seconds(&self, difficulty: Difficulty) -> u32 {
        self.profile(difficulty).time_limit_seconds
    }

    pub fn score_multiplier(&self, difficulty: Difficulty) -> f64 {
        self.profile(difficulty).score_multiplier
    }

    /// Multipliers must be positive and must not decrease as tiers get harder.
    pub fn validate(&self) -> Result<(), String> {
        let mut previous: Option<(Difficulty, f64)> = None;
        for difficulty in Difficulty::ALL {
            let profile = self.profile(difficulty);
            if profile.time_limit_seconds == 0 {
                return Err(format!("{} time limit must be positive", difficulty));
            }
            if !(profile.score_multiplier.is_finite() && profile.score_multiplier > 0.0) {
                return Err(format!("{} score multiplier must be positive", difficulty));
            }
            if let Some((prev, multiplier)) = previous {
                if profile.score_multiplier < multiplier {
                    return Err(format!(
                        "{} multiplier {} is lower than {} multiplier {}",
                        difficulty, profile.score_multiplier, prev, multiplier
                    ));
                }
            }
            previous = Some((difficulty, profile.score_multiplier));
        }
        Ok(())
    }
}

fn default_beginner() -> DifficultyProfile {
    DifficultyProfile {
        time_limit_seconds: 60,
        score_multiplier: 1.0,
    }
}

fn default_intermediate() -> DifficultyProfile {
    DifficultyProfile {
        time_limit_seconds: 90,
        score_multiplier: 1.5,
    }
}

fn default_advanced() -> DifficultyProfile {
    DifficultyProfile {
        time_limit_seconds: 120,
        score_multiplier: 2.0,
    }
}

fn default_expert() -> DifficultyProfile {
    DifficultyProfile {
        time_limit_seconds: 180,
        score_multiplier: 2.5,
    }
}
