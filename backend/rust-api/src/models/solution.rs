use serde::{Deserialize, Serialize};

use super::ContentSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionStep {
    pub step_number: u32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub steps: Vec<SolutionStep>,
    pub final_answer: f64,
    pub summary: String,
    pub source: ContentSource,
}
