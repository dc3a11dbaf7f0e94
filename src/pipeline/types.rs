//! Shared types for the triage pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

use crate::error::TriageError;
use crate::llm::ChatMessage;

// ── Email record ────────────────────────────────────────────────────

/// One normalized inbound email.
///
/// Immutable once received: the orchestrator owns it for the duration of a
/// triage cycle and only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Sender in `Name <address>` form.
    pub author: String,
    /// Recipient in `Name <address>` form.
    pub recipient: String,
    pub subject: String,
    /// Full thread text. May carry metadata or urgency language.
    pub body: String,
}

impl EmailRecord {
    pub fn new(
        author: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Parse a raw RFC 822 message.
    ///
    /// Addresses render as `Name <address>` when a display name is present.
    /// The plain-text body wins over the HTML body.
    pub fn from_rfc822(raw: &[u8]) -> Result<Self, TriageError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| TriageError::InvalidEmail("unparseable message".to_string()))?;

        let author = render_address(parsed.from())
            .ok_or_else(|| TriageError::InvalidEmail("missing From header".to_string()))?;
        let recipient = render_address(parsed.to()).unwrap_or_default();
        let subject = parsed.subject().unwrap_or("(no subject)").to_string();
        let body = parsed
            .body_text(0)
            .or_else(|| parsed.body_html(0))
            .map(|b| b.trim().to_string())
            .unwrap_or_default();

        Ok(Self {
            author,
            recipient,
            subject,
            body,
        })
    }

    /// Stable identity of this email.
    ///
    /// Equal records always produce equal keys, so re-storing the same email
    /// overwrites its example entry.
    pub fn identity_key(&self) -> String {
        serde_json::json!([self.author, self.recipient, self.subject, self.body]).to_string()
    }

    /// Text used both for embedding stored examples and as the search query.
    pub fn search_text(&self) -> String {
        format!(
            "Subject: {}\nFrom: {}\nTo: {}\n\n{}",
            self.subject, self.author, self.recipient, self.body
        )
    }
}

impl fmt::Display for EmailRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.author, self.recipient, self.subject, self.body
        )
    }
}

fn render_address(addr: Option<&mail_parser::Address>) -> Option<String> {
    let first = addr?.first()?;
    let address = first.address();
    match (first.name(), address) {
        (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
        (None, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

// ── Triage label ────────────────────────────────────────────────────

/// The closed set of triage categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageLabel {
    /// Noise: drop silently.
    Ignore,
    /// Worth knowing about, no reply needed.
    Notify,
    /// Needs a reply from the response agent.
    Respond,
}

impl TriageLabel {
    pub const ALL: [TriageLabel; 3] = [Self::Ignore, Self::Notify, Self::Respond];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Notify => "notify",
            Self::Respond => "respond",
        }
    }
}

impl fmt::Display for TriageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriageLabel {
    type Err = TriageError;

    /// Accepts the three category names, case-insensitive, ignoring
    /// surrounding whitespace, quotes and trailing punctuation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .trim()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "ignore" => Ok(Self::Ignore),
            "notify" => Ok(Self::Notify),
            "respond" => Ok(Self::Respond),
            _ => Err(TriageError::InvalidClassification(format!(
                "'{}' is not one of ignore, notify, respond",
                s.trim()
            ))),
        }
    }
}

// ── Classification & examples ───────────────────────────────────────

/// Output of one classifier call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: TriageLabel,
    pub rationale: String,
}

/// An email together with its confirmed label, as kept in example memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub email: EmailRecord,
    pub label: TriageLabel,
    pub stored_at: DateTime<Utc>,
}

impl LabeledExample {
    pub fn new(email: EmailRecord, label: TriageLabel) -> Self {
        Self {
            email,
            label,
            stored_at: Utc::now(),
        }
    }
}

/// One line of the per-user decision history handed to the response agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub subject: String,
    pub label: TriageLabel,
}

// ── Cycle state ─────────────────────────────────────────────────────

/// Stages of a single triage cycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Received,
    RetrievedContext,
    Classified,
    FeedbackCollected,
    Reconciled,
    Routed,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::RetrievedContext => "retrieved_context",
            Self::Classified => "classified",
            Self::FeedbackCollected => "feedback_collected",
            Self::Reconciled => "reconciled",
            Self::Routed => "routed",
        };
        f.write_str(name)
    }
}

/// Where a finished cycle sent the email.
#[derive(Debug, Clone)]
pub enum Route {
    /// Handed to the response agent.
    Respond {
        transcript: Vec<ChatMessage>,
        /// Set when the response agent failed after the example was stored.
        error: Option<String>,
    },
    /// Surfaced to the user, nothing else happens.
    Notify { summary: String },
    /// Dropped silently.
    Ignore,
}

impl Route {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Respond { .. } => "respond",
            Self::Notify { .. } => "notify",
            Self::Ignore => "ignore",
        }
    }
}
