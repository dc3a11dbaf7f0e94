//! Feedback reconciler — turns a disagreement into a rule clause and a label.
//!
//! On agreement nothing happens beyond confirming the classifier's label.
//! On disagreement a second model call suggests which category should gain a
//! clause and what the corrected label is. The model is asked for JSON; the
//! older `add to <category>: <clause>` / `label: <label>` free-text markers are
//! still understood when it ignores that.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::TriageError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::memory::Namespace;
use crate::pipeline::classifier::extract_json_object;
use crate::pipeline::rules::{RuleBook, RuleUpdate};
use crate::pipeline::types::{EmailRecord, TriageLabel};

const RECONCILE_MAX_TOKENS: u32 = 256;
const RECONCILE_TEMPERATURE: f32 = 0.0;

/// `add to <category>: <clause>`. The clause stops at end of line, a quote,
/// or a following `label:` marker on the same line.
static ADD_TO_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?im)add to\s+\W?(ignore|notify|respond)\W?\s*:\s*([^\n"]+?)(?:\s*[.;,]?\s*(?:corrected\s+)?label["']?\s*:|\s*"|\s*$)"#,
    )
    .unwrap()
});

static LABEL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)label["']?\s*:\s*["'`*]*(ignore|notify|respond)\b"#).unwrap()
});

/// How a reconciliation went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Feedback matched the classifier. No model call.
    Agreed,
    /// The secondary model produced a usable suggestion.
    Suggested,
    /// The suggestion was unusable. Rules untouched, feedback stored verbatim.
    ParseFailure,
}

/// Result of reconciling one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Label to persist with the example.
    pub stored_label: TriageLabel,
    /// Clause that was appended, if any.
    pub rule_update: Option<RuleUpdate>,
    pub outcome: ReconcileOutcome,
}

/// Structured suggestion from the secondary model. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleSuggestion {
    #[serde(default)]
    pub rule_category: Option<String>,
    #[serde(default)]
    pub rule_addition: Option<String>,
    #[serde(default)]
    pub corrected_label: Option<String>,
}

impl RuleSuggestion {
    /// A rule update, when both category and a non-blank clause are valid.
    fn rule_update(&self) -> Option<RuleUpdate> {
        let category = self.rule_category.as_deref()?.parse::<TriageLabel>().ok()?;
        let addition = self.rule_addition.as_deref()?.trim();
        if addition.is_empty() {
            return None;
        }
        Some(RuleUpdate {
            category,
            addition: addition.to_string(),
        })
    }

    fn corrected_label(&self) -> Option<TriageLabel> {
        self.corrected_label.as_deref()?.parse().ok()
    }
}

/// Parse the secondary model's answer.
///
/// JSON is tried first, then the legacy markers. A JSON object without any
/// of the three fields counts as no JSON. `None` means neither form produced
/// anything.
pub fn parse_suggestion(raw: &str) -> Option<RuleSuggestion> {
    if let Ok(suggestion) = serde_json::from_str::<RuleSuggestion>(&extract_json_object(raw))
        && suggestion != RuleSuggestion::default()
    {
        return Some(suggestion);
    }

    let mut suggestion = RuleSuggestion::default();
    if let Some(caps) = ADD_TO_MARKER.captures(raw) {
        suggestion.rule_category = Some(caps[1].to_ascii_lowercase());
        suggestion.rule_addition = Some(caps[2].trim().to_string());
    }
    if let Some(caps) = LABEL_MARKER.captures(raw) {
        suggestion.corrected_label = Some(caps[1].to_ascii_lowercase());
    }

    (suggestion != RuleSuggestion::default()).then_some(suggestion)
}

/// Reconciles classifier output with human feedback.
pub struct FeedbackReconciler {
    llm: Arc<dyn LlmProvider>,
}

impl FeedbackReconciler {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Decide the stored label and grow the namespace's rules on disagreement.
    ///
    /// Never fails: an unusable suggestion leaves the rules alone and stores
    /// the feedback label.
    pub async fn reconcile(
        &self,
        namespace: &Namespace,
        feedback: TriageLabel,
        email: &EmailRecord,
        classifier_label: TriageLabel,
        rules: &RuleBook,
    ) -> Reconciliation {
        if feedback == classifier_label {
            debug!(label = %feedback, "Feedback agrees with classifier");
            return Reconciliation {
                stored_label: classifier_label,
                rule_update: None,
                outcome: ReconcileOutcome::Agreed,
            };
        }

        info!(
            namespace = %namespace,
            subject = %email.subject,
            classified = %classifier_label,
            feedback = %feedback,
            "Feedback disagrees with classifier, reconciling"
        );

        let suggestion = match self.suggest(email, classifier_label, feedback).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                warn!(subject = %email.subject, "Reconciliation response had no usable suggestion");
                return Self::parse_failure(feedback);
            }
            Err(e) => {
                warn!(subject = %email.subject, error = %e, "Reconciliation call failed");
                return Self::parse_failure(feedback);
            }
        };

        let mut rule_update = None;
        if let Some(update) = suggestion.rule_update()
            && rules.apply(namespace, &update).await
        {
            rule_update = Some(update);
        }

        let stored_label = suggestion.corrected_label().unwrap_or(feedback);
        Reconciliation {
            stored_label,
            rule_update,
            outcome: ReconcileOutcome::Suggested,
        }
    }

    fn parse_failure(feedback: TriageLabel) -> Reconciliation {
        Reconciliation {
            stored_label: feedback,
            rule_update: None,
            outcome: ReconcileOutcome::ParseFailure,
        }
    }

    async fn suggest(
        &self,
        email: &EmailRecord,
        classifier_label: TriageLabel,
        feedback: TriageLabel,
    ) -> Result<Option<RuleSuggestion>, TriageError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_reconcile_system_prompt()),
            ChatMessage::user(build_reconcile_user_prompt(email, classifier_label, feedback)),
        ])
        .with_temperature(RECONCILE_TEMPERATURE)
        .with_max_tokens(RECONCILE_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        debug!(raw_response = %response.content, "Reconciliation response");
        Ok(parse_suggestion(&response.content))
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_reconcile_system_prompt() -> String {
    "You maintain the rules of an email triage assistant. The categories are \
     \"ignore\", \"notify\" and \"respond\". The user disagreed with a classification. \
     Suggest one short clause to add to a category's rule so similar emails are \
     classified correctly, and give the corrected label.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"rule_category\": \"ignore\" | \"notify\" | \"respond\" | null, \
     \"rule_addition\": \"...\" | null, \
     \"corrected_label\": \"ignore\" | \"notify\" | \"respond\" | null}"
        .to_string()
}

fn build_reconcile_user_prompt(
    email: &EmailRecord,
    classifier_label: TriageLabel,
    feedback: TriageLabel,
) -> String {
    format!(
        "Email:\n{email}\n\nClassified as: {classifier_label}\nFeedback: {feedback}\n\
         Suggest rule update and corrected label:"
    )
}
