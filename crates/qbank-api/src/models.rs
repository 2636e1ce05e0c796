//! Wire types of the question API.

use serde::{Deserialize, Serialize};

/// A stored interview question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub competency: String,
    /// Creation timestamp as stored by the backend (field name is the API's).
    #[serde(default)]
    pub create_at: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub reference_answer: String,
}

/// Body for creating or replacing a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub category: String,
    pub competency: String,
    pub difficulty: String,
    pub question_text: String,
    pub reference_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Question text the answer responds to.
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competency_type: Option<String>,
}

/// Feedback from the answer evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub is_correct: bool,
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub marcus_comment: String,
}
