use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Open,
    Choice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

/// One question posed to the human. `request_id` is 16 hex chars, unique per
/// invocation; correlation with the eventual reply happens through the
/// provider's own message ids, never through text embedded in the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub request_id: String,
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub allow_other: bool,
    pub sent_at: DateTime<Utc>,
}

impl AskRequest {
    pub fn is_choice(&self) -> bool {
        self.question_type == QuestionType::Choice && !self.choices.is_empty()
    }
}

/// The human's answer as the provider saw it. `text` is trimmed, `raw` is the
/// untouched original, `received_at` comes from the upstream message
/// timestamp rather than local ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub request_id: String,
    pub text: String,
    #[serde(default)]
    pub from: String,
    pub provider_message_id: String,
    pub received_at: DateTime<Utc>,
    pub raw: String,
}

/// The machine-parseable payload emitted on stdout. Empty `selected_ids` /
/// `other_text` are omitted so open questions keep a minimal shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResult {
    pub request_id: String,
    pub provider: String,
    pub question_type: QuestionType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub other_text: String,
    pub raw_reply: String,
    pub received_at: DateTime<Utc>,
}
