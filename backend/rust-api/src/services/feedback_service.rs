use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::ai_client::{coerce_number, generate_structured, TextGenerator};
use super::cache::{get_json, set_json, CacheStore};
use crate::error::UpstreamError;
use crate::metrics::{record_ai_outcome, record_cache_hit, record_cache_miss, SOLUTIONS_SERVED_TOTAL};
use crate::models::solution::{Solution, SolutionStep};
use crate::models::{ContentSource, Difficulty};

const SOLUTION_CACHE_TTL: u64 = 300; // 5 minutes

#[derive(Debug, Deserialize)]
struct GeneratedFeedback {
    feedback: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedSolution {
    #[serde(default)]
    steps: Vec<Value>,
    #[serde(default)]
    summary: Option<String>,
}

pub struct FeedbackService {
    ai: Arc<dyn TextGenerator>,
    cache: Arc<dyn CacheStore>,
}

impl FeedbackService {
    pub fn new(ai: Arc<dyn TextGenerator>, cache: Arc<dyn CacheStore>) -> Self {
        Self { ai, cache }
    }

    /// Encouraging text for a scored answer. `user_answer` is `None` when
    /// the session expired. Never fails.
    pub async fn feedback(
        &self,
        problem_text: &str,
        correct_answer: f64,
        user_answer: Option<f64>,
        is_correct: bool,
    ) -> String {
        let prompt = build_feedback_prompt(problem_text, correct_answer, user_answer, is_correct);
        let result: Result<GeneratedFeedback, UpstreamError> =
            generate_structured(self.ai.as_ref(), &prompt).await;

        match result {
            Ok(generated) if !generated.feedback.trim().is_empty() => {
                record_ai_outcome("feedback", None);
                generated.feedback.trim().to_string()
            }
            Ok(_) => {
                let err = UpstreamError::Malformed("empty feedback".into());
                record_ai_outcome("feedback", Some(&err));
                tracing::warn!("AI feedback unusable ({}), using fallback", err);
                fallback_feedback(correct_answer, user_answer, is_correct)
            }
            Err(e) => {
                record_ai_outcome("feedback", Some(&e));
                if !matches!(e, UpstreamError::Disabled) {
                    tracing::warn!("AI feedback failed ({}), using fallback", e);
                }
                fallback_feedback(correct_answer, user_answer, is_correct)
            }
        }
    }

    /// Step-by-step solution for a session. AI results are cached per
    /// session; fallbacks are not, so a later call may still reach the AI.
    pub async fn solution(
        &self,
        session_id: &str,
        problem_text: &str,
        correct_answer: f64,
        difficulty: Difficulty,
    ) -> Solution {
        let cache_key = format!("solution:cache:{}", session_id);

        match get_json::<Solution>(self.cache.as_ref(), &cache_key).await {
            Ok(Some(mut cached)) => {
                record_cache_hit();
                tracing::debug!("Solution found in cache for session={}", session_id);
                cached.source = ContentSource::Cache;
                cached.final_answer = correct_answer;
                SOLUTIONS_SERVED_TOTAL
                    .with_label_values(&[ContentSource::Cache.as_str()])
                    .inc();
                return cached;
            }
            Ok(None) => record_cache_miss(),
            Err(e) => {
                record_cache_miss();
                tracing::warn!("Solution cache read failed for session={}: {}", session_id, e);
            }
        }

        let prompt = build_solution_prompt(problem_text, correct_answer, difficulty);
        let result: Result<GeneratedSolution, UpstreamError> =
            generate_structured(self.ai.as_ref(), &prompt).await;

        let solution = match result.and_then(|generated| assemble_solution(generated, correct_answer))
        {
            Ok(solution) => {
                record_ai_outcome("solution", None);
                if let Err(e) =
                    set_json(self.cache.as_ref(), &cache_key, &solution, SOLUTION_CACHE_TTL).await
                {
                    tracing::warn!("Failed to cache solution for session={}: {}", session_id, e);
                }
                solution
            }
            Err(e) => {
                record_ai_outcome("solution", Some(&e));
                if !matches!(e, UpstreamError::Disabled) {
                    tracing::warn!(
                        "AI solution failed for session={} ({}), using fallback",
                        session_id,
                        e
                    );
                }
                fallback_solution(correct_answer)
            }
        };

        SOLUTIONS_SERVED_TOTAL
            .with_label_values(&[solution.source.as_str()])
            .inc();
        solution
    }
}

fn assemble_solution(
    generated: GeneratedSolution,
    correct_answer: f64,
) -> Result<Solution, UpstreamError> {
    let steps: Vec<SolutionStep> = generated
        .steps
        .iter()
        .filter_map(parse_step)
        .enumerate()
        .map(|(index, step)| SolutionStep {
            step_number: index as u32 + 1,
            ..step
        })
        .collect();

    if steps.is_empty() {
        return Err(UpstreamError::Malformed("no well-formed solution steps".into()));
    }

    let summary = generated
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("The answer is {}.", format_number(correct_answer)));

    Ok(Solution {
        steps,
        final_answer: correct_answer,
        summary,
        source: ContentSource::Ai,
    })
}

/// A step needs a description and an explanation; anything else about it
/// is optional.
fn parse_step(value: &Value) -> Option<SolutionStep> {
    let object = value.as_object()?;
    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let description = text("description")?;
    let explanation = text("explanation")?;
    let calculation = text("calculation");
    let step_number = object
        .get("step_number")
        .and_then(coerce_number)
        .map(|n| n as u32)
        .unwrap_or(0);

    Some(SolutionStep {
        step_number,
        description,
        calculation,
        explanation,
    })
}

/// Prints the exact value: integers without a decimal point, fractions in
/// their shortest round-tripping form.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Avoids "-0".
        "0".to_string()
    } else {
        value.to_string()
    }
}

pub fn fallback_feedback(correct_answer: f64, user_answer: Option<f64>, is_correct: bool) -> String {
    let answer = format_number(correct_answer);
    match (is_correct, user_answer) {
        (true, _) => "Excellent work! Your answer is correct. Keep practising to stay sharp."
            .to_string(),
        (false, Some(_)) => format!(
            "Not quite. The correct answer is {}. Read the problem again step by step and check each calculation.",
            answer
        ),
        (false, None) => format!(
            "Time ran out before an answer was given. The correct answer is {}. Read the problem again step by step and try the next one.",
            answer
        ),
    }
}

/// Generic four-step strategy. The last step always states the answer.
pub fn fallback_solution(correct_answer: f64) -> Solution {
    let answer = format_number(correct_answer);
    let steps = vec![
        SolutionStep {
            step_number: 1,
            description: "Read the problem carefully".to_string(),
            calculation: None,
            explanation: "Find the quantities given and what the question asks for.".to_string(),
        },
        SolutionStep {
            step_number: 2,
            description: "Choose the operation".to_string(),
            calculation: None,
            explanation: "Decide whether the quantities are combined, compared, grouped or shared."
                .to_string(),
        },
        SolutionStep {
            step_number: 3,
            description: "Calculate".to_string(),
            calculation: None,
            explanation: "Work through the calculation one step at a time, lining up place values."
                .to_string(),
        },
        SolutionStep {
            step_number: 4,
            description: "Check the answer".to_string(),
            calculation: Some(format!("Answer = {}", answer)),
            explanation: format!("The correct answer is {}.", answer),
        },
    ];

    Solution {
        steps,
        final_answer: correct_answer,
        summary: format!(
            "Break the problem into small steps. The correct answer is {}.",
            answer
        ),
        source: ContentSource::Fallback,
    }
}

fn build_feedback_prompt(
    problem_text: &str,
    correct_answer: f64,
    user_answer: Option<f64>,
    is_correct: bool,
) -> String {
    let outcome = match (is_correct, user_answer) {
        (true, _) => "The pupil answered correctly.".to_string(),
        (false, Some(answer)) => format!(
            "The pupil answered {} but the correct answer is {}.",
            format_number(answer),
            format_number(correct_answer)
        ),
        (false, None) => format!(
            "The pupil ran out of time. The correct answer is {}.",
            format_number(correct_answer)
        ),
    };
    format!(
        "You are a kind Primary 5 math tutor.\n\
         Problem: {problem}\n\
         {outcome}\n\
         Write 2 to 4 short, encouraging sentences of feedback for the pupil.\n\
         Reply with JSON only: {{\"feedback\": \"...\"}}",
        problem = problem_text,
        outcome = outcome,
    )
}

fn build_solution_prompt(problem_text: &str, correct_answer: f64, difficulty: Difficulty) -> String {
    format!(
        "Explain how to solve this {difficulty} Primary 5 math word problem step by step.\n\
         Problem: {problem}\n\
         The correct answer is {answer}.\n\
         Reply with JSON only, in exactly this shape:\n\
         {{\"steps\": [{{\"step_number\": 1, \"description\": \"...\", \"calculation\": \"...\", \"explanation\": \"...\"}}], \"summary\": \"...\"}}",
        difficulty = difficulty,
        problem = problem_text,
        answer = format_number(correct_answer),
    )
}
