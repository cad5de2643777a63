use serde::{Deserialize, Serialize};

use super::tally::TallyView;

/// Raw answer as the client sent it: a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnswerInput {
    Number(f64),
    Text(String),
}

impl AnswerInput {
    /// Coerces the input to a finite number. Anything else is a validation
    /// failure, never an incorrect answer.
    pub fn to_number(&self) -> Result<f64, String> {
        let value = match self {
            AnswerInput::Number(value) => *value,
            AnswerInput::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err("Answer must not be empty".to_string());
                }
                trimmed
                    .parse::<f64>()
                    .map_err(|_| format!("Answer '{}' is not a number", trimmed))?
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err("Answer must be a finite number".to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub answer: AnswerInput,
    #[serde(default)]
    pub time_used_seconds: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub feedback_text: String,
    pub score_delta: f64,
    /// Set when the answer arrived after the deadline and the session was
    /// closed as expired instead.
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tally: Option<TallyView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpireSessionResponse {
    pub feedback_text: String,
    pub is_correct: bool,
    pub score_delta: f64,
}
