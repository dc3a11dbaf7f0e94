//! Human feedback on a classification.
//!
//! A feedback source answers "was this label right?". The answer is either
//! agreement or a correction to one of the three categories. Waiting is
//! bounded: on timeout the classifier's label is accepted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TriageError;
use crate::memory::Namespace;
use crate::pipeline::types::{ClassificationResult, EmailRecord, TriageLabel};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// A human's verdict on a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Feedback {
    Agree,
    Correct(TriageLabel),
}

impl Feedback {
    /// Empty input means agreement; a category name is a correction.
    pub fn parse(text: &str) -> Result<Self, TriageError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::Agree);
        }
        trimmed
            .parse::<TriageLabel>()
            .map(Self::Correct)
            .map_err(|_| TriageError::InvalidFeedback(trimmed.to_string()))
    }

    /// The label the human stands behind.
    pub fn resolve(self, classifier_label: TriageLabel) -> TriageLabel {
        match self {
            Self::Agree => classifier_label,
            Self::Correct(label) => label,
        }
    }
}

/// Feedback plus how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectedFeedback {
    pub feedback: Feedback,
    /// No answer arrived in time; the classifier's label was accepted.
    pub timed_out: bool,
}

/// Something that can be asked for feedback.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn request(
        &self,
        namespace: &Namespace,
        email: &EmailRecord,
        classification: &ClassificationResult,
    ) -> Result<Feedback, TriageError>;
}

/// Ask `source` for feedback, accepting the classifier's label on timeout.
pub async fn collect_feedback(
    source: &dyn FeedbackSource,
    timeout: Duration,
    namespace: &Namespace,
    email: &EmailRecord,
    classification: &ClassificationResult,
) -> Result<CollectedFeedback, TriageError> {
    match tokio::time::timeout(timeout, source.request(namespace, email, classification)).await {
        Ok(result) => Ok(CollectedFeedback {
            feedback: result?,
            timed_out: false,
        }),
        Err(_) => {
            warn!(
                namespace = %namespace,
                subject = %email.subject,
                timeout_secs = timeout.as_secs(),
                label = %classification.label,
                "Feedback timed out, accepting classifier label"
            );
            Ok(CollectedFeedback {
                feedback: Feedback::Agree,
                timed_out: true,
            })
        }
    }
}

// ── Sources ─────────────────────────────────────────────────────────

/// Always agrees. For unattended runs.
pub struct AutoAgree;

#[async_trait]
impl FeedbackSource for AutoAgree {
    async fn request(
        &self,
        _namespace: &Namespace,
        _email: &EmailRecord,
        _classification: &ClassificationResult,
    ) -> Result<Feedback, TriageError> {
        Ok(Feedback::Agree)
    }
}

/// Prompts on stderr and reads one line from stdin.
pub struct StdinFeedback {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinFeedback {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinFeedback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackSource for StdinFeedback {
    async fn request(
        &self,
        _namespace: &Namespace,
        email: &EmailRecord,
        classification: &ClassificationResult,
    ) -> Result<Feedback, TriageError> {
        eprintln!("\n📨 {}", email.subject);
        eprintln!("   {}", classification.rationale);
        eprint!(
            "Classified as {}. Correct? (enter correct label or press Enter if correct): ",
            classification.label
        );

        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Feedback::parse(&line),
            Ok(None) => {
                debug!("stdin closed, treating as agreement");
                Ok(Feedback::Agree)
            }
            Err(e) => Err(TriageError::FeedbackClosed(format!("stdin read failed: {e}"))),
        }
    }
}

// ── Broker ──────────────────────────────────────────────────────────

/// An open feedback request.
#[derive(Debug, Clone, Serialize)]
pub struct PendingFeedback {
    pub id: Uuid,
    pub user_id: String,
    pub subject: String,
    pub classifier_label: TriageLabel,
    pub rationale: String,
    pub requested_at: DateTime<Utc>,
}

/// Asynchronous feedback boundary.
///
/// `request` parks the cycle on a pending record until `submit` answers it.
/// Subscribers hear about every new record. Records disappear when answered
/// or when the waiting cycle gives up (timeout drops the request future).
pub struct FeedbackBroker {
    pending: Mutex<HashMap<Uuid, (PendingFeedback, oneshot::Sender<Feedback>)>>,
    tx: broadcast::Sender<PendingFeedback>,
}

impl FeedbackBroker {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            pending: Mutex::new(HashMap::new()),
            tx,
        }
    }

    /// Subscribe to new pending requests.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingFeedback> {
        self.tx.subscribe()
    }

    /// All open requests, oldest first.
    pub fn pending(&self) -> Vec<PendingFeedback> {
        let mut open: Vec<PendingFeedback> = self
            .lock()
            .values()
            .map(|(record, _)| record.clone())
            .collect();
        open.sort_by_key(|r| r.requested_at);
        open
    }

    /// Answer an open request with raw user text.
    ///
    /// Invalid text is rejected and the request stays open.
    pub fn submit(&self, id: Uuid, text: &str) -> Result<(), TriageError> {
        let feedback = Feedback::parse(text)?;
        let (_, sender) = self
            .lock()
            .remove(&id)
            .ok_or_else(|| TriageError::FeedbackClosed(format!("no pending feedback {id}")))?;

        sender
            .send(feedback)
            .map_err(|_| TriageError::FeedbackClosed(format!("cycle for {id} stopped waiting")))?;
        info!(id = %id, feedback = ?feedback, "Feedback submitted");
        Ok(())
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Uuid, (PendingFeedback, oneshot::Sender<Feedback>)>>
    {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FeedbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the pending record if the waiting future is dropped.
struct PendingGuard<'a> {
    broker: &'a FeedbackBroker,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.broker.lock().remove(&self.id).is_some() {
            debug!(id = %self.id, "Pending feedback abandoned");
        }
    }
}

#[async_trait]
impl FeedbackSource for FeedbackBroker {
    async fn request(
        &self,
        namespace: &Namespace,
        email: &EmailRecord,
        classification: &ClassificationResult,
    ) -> Result<Feedback, TriageError> {
        let (sender, receiver) = oneshot::channel();
        let record = PendingFeedback {
            id: Uuid::new_v4(),
            user_id: namespace.user_id.clone(),
            subject: email.subject.clone(),
            classifier_label: classification.label,
            rationale: classification.rationale.clone(),
            requested_at: Utc::now(),
        };
        let id = record.id;

        self.lock().insert(id, (record.clone(), sender));
        let _guard = PendingGuard { broker: self, id };

        debug!(id = %id, subject = %record.subject, "Awaiting feedback");
        // Ok if nobody is subscribed yet.
        let _ = self.tx.send(record);

        receiver
            .await
            .map_err(|_| TriageError::FeedbackClosed(format!("feedback {id} dropped")))
    }
}
