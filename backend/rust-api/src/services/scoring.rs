use crate::models::answer::AnswerInput;
use crate::models::tally::RunningTally;
use crate::models::{Difficulty, DifficultyTable};

/// Exact comparison. Both sides are already finite numbers, so `15` and
/// `15.0` compare equal.
pub fn evaluate(correct_answer: f64, user_answer: f64) -> bool {
    correct_answer == user_answer
}

/// Parses a raw answer and evaluates it. Input that is not a finite number
/// is rejected before any comparison happens.
pub fn evaluate_input(correct_answer: f64, input: &AnswerInput) -> Result<(f64, bool), String> {
    let value = input.to_number()?;
    Ok((value, evaluate(correct_answer, value)))
}

pub fn score_delta(table: &DifficultyTable, difficulty: Difficulty, is_correct: bool) -> f64 {
    if is_correct {
        table.score_multiplier(difficulty)
    } else {
        0.0
    }
}

pub fn accumulate(
    mut tally: RunningTally,
    difficulty: Difficulty,
    score_delta: f64,
    is_correct: bool,
) -> RunningTally {
    tally.attempted_count += 1;
    if is_correct {
        tally.correct_count += 1;
        tally.total_score += score_delta;
    }
    tally.last_difficulty = Some(difficulty);
    tally
}

pub fn accuracy_percent(tally: &RunningTally) -> u32 {
    if tally.attempted_count == 0 {
        return 0;
    }
    (100.0 * f64::from(tally.correct_count) / f64::from(tally.attempted_count)).round() as u32
}
