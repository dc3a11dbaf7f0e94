//! Email triage pipeline.
//!
//! Every email flows through one cycle:
//! 1. `ExampleStore::search()` — similar past decisions for this user
//! 2. `Classifier::classify()` — LLM picks ignore / notify / respond
//! 3. `collect_feedback()` — the human agrees or corrects (bounded wait)
//! 4. `FeedbackReconciler::reconcile()` — disagreement grows the rule set
//! 5. `ExampleStore::put()` — the confirmed example is remembered
//! 6. Routing — `respond` hands off to the response agent

pub mod classifier;
pub mod feedback;
pub mod orchestrator;
pub mod reconciler;
pub mod rules;
pub mod types;

pub use classifier::{Classifier, LlmClassifier};
pub use feedback::{AutoAgree, Feedback, FeedbackBroker, FeedbackSource, StdinFeedback};
pub use orchestrator::{TriageOrchestrator, TriageOutcome};
pub use reconciler::FeedbackReconciler;
pub use rules::{RuleBook, RuleSet, RuleUpdate};
pub use types::{ClassificationResult, EmailRecord, HistoryEntry, Route, TriageLabel};
