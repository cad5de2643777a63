use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::ai_client::{coerce_number, generate_structured, TextGenerator};
use super::fallback_generator;
use crate::error::UpstreamError;
use crate::metrics::{record_ai_outcome, PROBLEMS_GENERATED_TOTAL};
use crate::models::{ContentSource, Difficulty, OperationType, Problem};

lazy_static! {
    static ref NUMBER_TOKEN: Regex = Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid regex");
}

#[derive(Debug, Deserialize)]
struct GeneratedProblem {
    problem_text: String,
    final_answer: Value,
    hint: String,
}

/// Produces problems from the AI backend, falling back to the deterministic
/// generator on any failure. `generate` never fails.
#[derive(Clone)]
pub struct ProblemGenerator {
    ai: Arc<dyn TextGenerator>,
}

impl ProblemGenerator {
    pub fn new(ai: Arc<dyn TextGenerator>) -> Self {
        Self { ai }
    }

    pub async fn generate(&self, operation: OperationType, difficulty: Difficulty) -> Problem {
        match self.generate_with_ai(operation, difficulty).await {
            Ok(problem) => {
                record_ai_outcome("problem", None);
                PROBLEMS_GENERATED_TOTAL
                    .with_label_values(&[ContentSource::Ai.as_str()])
                    .inc();
                tracing::info!(
                    "Generated {} {} problem via AI",
                    difficulty,
                    operation
                );
                problem
            }
            Err(e) => {
                record_ai_outcome("problem", Some(&e));
                match e {
                    UpstreamError::Disabled => tracing::debug!(
                        "AI disabled; using fallback {} {} problem",
                        difficulty,
                        operation
                    ),
                    _ => tracing::warn!(
                        "AI problem generation failed ({}), using fallback for {} {}",
                        e,
                        difficulty,
                        operation
                    ),
                }
                PROBLEMS_GENERATED_TOTAL
                    .with_label_values(&[ContentSource::Fallback.as_str()])
                    .inc();
                fallback_generator::fallback(operation, difficulty, &mut rand::rng())
            }
        }
    }

    async fn generate_with_ai(
        &self,
        operation: OperationType,
        difficulty: Difficulty,
    ) -> Result<Problem, UpstreamError> {
        let prompt = build_problem_prompt(operation, difficulty);
        let generated: GeneratedProblem = generate_structured(self.ai.as_ref(), &prompt).await?;
        validate_generated(generated, operation, difficulty)
    }
}

fn validate_generated(
    generated: GeneratedProblem,
    operation: OperationType,
    difficulty: Difficulty,
) -> Result<Problem, UpstreamError> {
    let text = generated.problem_text.trim().to_string();
    let hint = generated.hint.trim().to_string();

    if text.is_empty() {
        return Err(UpstreamError::Malformed("empty problem_text".into()));
    }
    if hint.is_empty() {
        return Err(UpstreamError::Malformed("empty hint".into()));
    }

    let correct_answer = coerce_number(&generated.final_answer).ok_or_else(|| {
        UpstreamError::Malformed(format!(
            "final_answer {} is not numeric",
            generated.final_answer
        ))
    })?;

    if reveals_answer(&text, correct_answer) || reveals_answer(&hint, correct_answer) {
        return Err(UpstreamError::Malformed(
            "problem text or hint reveals the answer".into(),
        ));
    }

    Ok(Problem {
        text,
        correct_answer,
        operation,
        difficulty,
        hint,
        source: ContentSource::Ai,
    })
}

fn tier_constraints(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Beginner => "Use whole numbers no larger than 50 and 1 to 2 calculation steps.",
        Difficulty::Intermediate => {
            "Use whole numbers no larger than 100 and 2 to 3 calculation steps."
        }
        Difficulty::Advanced => {
            "Use numbers no larger than 500 and 3 to 4 calculation steps, including simple fractions or decimals."
        }
        Difficulty::Expert => {
            "Use numbers no larger than 1000 and several calculation steps, combining fractions, decimals or percentages."
        }
    }
}

fn operation_constraint(operation: OperationType) -> &'static str {
    match operation {
        OperationType::Addition => "The problem must be solved using addition.",
        OperationType::Subtraction => "The problem must be solved using subtraction.",
        OperationType::Multiplication => "The problem must be solved using multiplication.",
        OperationType::Division => {
            "The problem must be solved using division and the answer must divide exactly."
        }
        OperationType::Mixed => "The problem may combine any of the four operations.",
    }
}

pub fn build_problem_prompt(operation: OperationType, difficulty: Difficulty) -> String {
    format!(
        "Write one math word problem suitable for a Primary 5 pupil (about 11 years old).\n\
         Difficulty: {difficulty}. {tier}\n\
         {op}\n\
         Also write one hint that teaches the method without revealing the answer or any intermediate result.\n\
         Reply with JSON only, in exactly this shape:\n\
         {{\"problem_text\": \"...\", \"final_answer\": <number>, \"hint\": \"...\"}}",
        difficulty = difficulty,
        tier = tier_constraints(difficulty),
        op = operation_constraint(operation),
    )
}

/// Every number written in `text`, in order. Thousands separators are
/// ignored.
pub fn numbers_in(text: &str) -> Vec<f64> {
    NUMBER_TOKEN
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}

/// True if `answer` appears as a standalone number in `text`.
pub fn reveals_answer(text: &str, answer: f64) -> bool {
    numbers_in(text).into_iter().any(|value| value == answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, UpstreamError>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate_text(&self, _prompt: &str) -> Result<String, UpstreamError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(UpstreamError::Disabled))
        }
    }

    #[tokio::test]
    async fn ai_reply_wrapped_in_markup_is_used() {
        let reply = "Sure!\n```json\n{\"problem_text\": \"Ali buys 3 packs of 12 pencils. How many pencils does he have?\", \"final_answer\": \"36\", \"hint\": \"Multiply the packs by the pencils in each pack.\"}\n```";
        let generator = ProblemGenerator::new(Scripted::new(vec![Ok(reply.to_string())]));

        let problem = generator
            .generate(OperationType::Multiplication, Difficulty::Beginner)
            .await;

        assert_eq!(problem.source, ContentSource::Ai);
        assert_eq!(problem.correct_answer, 36.0);
        assert!(problem.text.starts_with("Ali buys"));
    }

    #[tokio::test]
    async fn transport_failure_falls_back() {
        let generator = ProblemGenerator::new(Scripted::new(vec![Err(UpstreamError::Timeout)]));

        let problem = generator
            .generate(OperationType::Division, Difficulty::Expert)
            .await;

        assert_eq!(problem.source, ContentSource::Fallback);
        assert_eq!(problem.operation, OperationType::Division);
        assert_eq!(problem.difficulty, Difficulty::Expert);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let replies = vec![
            Ok("I cannot help with that.".to_string()),
            Ok("{\"problem_text\": \"Sam has 4 pens.\", \"final_answer\": \"many\", \"hint\": \"Count.\"}".to_string()),
            Ok("{\"problem_text\": \"\", \"final_answer\": 3, \"hint\": \"Count.\"}".to_string()),
        ];
        let generator = ProblemGenerator::new(Scripted::new(replies));

        for _ in 0..3 {
            let problem = generator
                .generate(OperationType::Addition, Difficulty::Beginner)
                .await;
            assert_eq!(problem.source, ContentSource::Fallback);
        }
    }

    #[tokio::test]
    async fn hint_revealing_answer_is_rejected() {
        let reply = "{\"problem_text\": \"Tom has 9 apples and eats 4. How many are left?\", \"final_answer\": 5, \"hint\": \"The answer is 5.\"}";
        let generator = ProblemGenerator::new(Scripted::new(vec![Ok(reply.to_string())]));

        let problem = generator
            .generate(OperationType::Subtraction, Difficulty::Beginner)
            .await;

        assert_eq!(problem.source, ContentSource::Fallback);
    }

    #[test]
    fn prompt_carries_tier_and_operation_constraints() {
        let prompt = build_problem_prompt(OperationType::Division, Difficulty::Advanced);
        assert!(prompt.contains("Primary 5"));
        assert!(prompt.contains("no larger than 500"));
        assert!(prompt.contains("divide exactly"));
        assert!(prompt.contains("\"final_answer\""));
    }

    #[test]
    fn number_tokens_ignore_thousands_separators() {
        assert_eq!(numbers_in("He paid $1,250.50 for 15 chairs."), vec![1250.5, 15.0]);
        assert!(reveals_answer("There are 15 pupils.", 15.0));
        assert!(!reveals_answer("There are 115 pupils.", 15.0));
        assert!(!reveals_answer("There are 15.5 litres.", 15.0));
    }
}
