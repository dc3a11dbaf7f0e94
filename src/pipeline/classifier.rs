//! LLM classifier — maps (rules, similar examples, email) to a triage label.
//!
//! The model must answer with one of the three categories. Anything else is
//! an `InvalidClassification`; labels are never coerced.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::UserProfile;
use crate::error::TriageError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::rules::RuleSet;
use crate::pipeline::types::{ClassificationResult, EmailRecord, LabeledExample, TriageLabel};

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 512;

/// Temperature for classification.
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Example bodies are cut to this many characters in the prompt.
pub const EXAMPLE_BODY_CHARS: usize = 500;

/// Maps an email to a triage label.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify `email` using `rules` and zero or more prior `examples`.
    async fn classify(
        &self,
        rules: &RuleSet,
        examples: &[LabeledExample],
        email: &EmailRecord,
    ) -> Result<ClassificationResult, TriageError>;
}

/// Classifier backed by an `LlmProvider`.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    profile: UserProfile,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, profile: UserProfile) -> Self {
        Self { llm, profile }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        rules: &RuleSet,
        examples: &[LabeledExample],
        email: &EmailRecord,
    ) -> Result<ClassificationResult, TriageError> {
        let system_prompt = build_triage_system_prompt(&self.profile, rules, examples);
        let user_prompt = build_triage_user_prompt(email);
        debug!(
            subject = %email.subject,
            examples = examples.len(),
            "Classifying email"
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;

        parse_classification(&response.content).inspect_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Classifier returned an invalid label"
            );
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the triage system prompt: role, profile, rules and few-shot examples.
pub fn build_triage_system_prompt(
    profile: &UserProfile,
    rules: &RuleSet,
    examples: &[LabeledExample],
) -> String {
    let name = &profile.name;
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(&format!(
        "You are {full_name}'s executive assistant. Triage incoming emails for {name}.\n\n\
         Background: {background}\n\n\
         Classify each email into exactly one category:\n\
         - \"ignore\": not worth {name}'s attention.\n\
         - \"notify\": {name} should know about it, but no reply is needed.\n\
         - \"respond\": needs a reply.\n\n",
        full_name = profile.full_name,
        background = profile.background,
    ));

    prompt.push_str("Rules:\n");
    prompt.push_str(&format!(
        "- Emails that are not worth responding to: {}\n",
        rules.get(TriageLabel::Ignore)
    ));
    prompt.push_str(&format!(
        "- Emails {name} should be notified about, without a reply: {}\n",
        rules.get(TriageLabel::Notify)
    ));
    prompt.push_str(&format!(
        "- Emails that are worth responding to: {}\n\n",
        rules.get(TriageLabel::Respond)
    ));

    if examples.is_empty() {
        prompt.push_str("There are no previous examples for this user. Use the rules alone.\n\n");
    } else {
        prompt.push_str(&format_few_shot_examples(examples));
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "Respond with ONLY a JSON object:\n\
         {\"classification\": \"ignore\" | \"notify\" | \"respond\", \"reasoning\": \"...\"}\n\
         Keep the reasoning to one sentence.",
    );
    prompt
}

/// Build the user prompt carrying the email itself.
pub fn build_triage_user_prompt(email: &EmailRecord) -> String {
    format!(
        "Please determine how to handle the email thread below.\n\n\
         From: {}\nTo: {}\nSubject: {}\n\n{}",
        email.author, email.recipient, email.subject, email.body
    )
}

/// Render prior examples for the prompt, bodies truncated to 500 chars.
pub fn format_few_shot_examples(examples: &[LabeledExample]) -> String {
    let mut parts = vec!["Here are some previous examples:".to_string()];
    for eg in examples {
        let content: String = eg.email.body.chars().take(EXAMPLE_BODY_CHARS).collect();
        parts.push(format!(
            "Email Subject: {}\nEmail From: {}\nEmail To: {}\nEmail Content:\n```\n{}\n```\n> Triage Result: {}",
            eg.email.subject, eg.email.author, eg.email.recipient, content, eg.label
        ));
    }
    parts.join("\n\n------------\n\n")
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ClassifierResponse {
    classification: String,
    #[serde(default, alias = "rationale")]
    reasoning: String,
}

/// Parse the model's JSON answer into a `ClassificationResult`.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult, TriageError> {
    let json_str = extract_json_object(raw);
    let response: ClassifierResponse = serde_json::from_str(&json_str).map_err(|e| {
        TriageError::InvalidClassification(format!("unparseable classifier output: {e}"))
    })?;

    let label = response.classification.parse::<TriageLabel>()?;
    Ok(ClassificationResult {
        label,
        rationale: response.reasoning,
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
