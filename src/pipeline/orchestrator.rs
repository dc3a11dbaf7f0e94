//! Triage orchestrator — runs one email through the whole cycle.
//!
//! Received → RetrievedContext → Classified → FeedbackCollected → Reconciled → Routed
//!
//! Nothing is stored until reconciliation succeeds. Once the example is
//! stored the cycle always completes, even if the response agent fails.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::agent::{ResponseAgent, respond_instruction};
use crate::config::TriageConfig;
use crate::error::{CycleError, TriageError};
use crate::memory::{ExampleStore, Namespace};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::feedback::{CollectedFeedback, FeedbackSource, collect_feedback};
use crate::pipeline::reconciler::FeedbackReconciler;
use crate::pipeline::rules::{RuleBook, RuleSet, RuleUpdate};
use crate::pipeline::types::{
    ClassificationResult, CycleStage, EmailRecord, HistoryEntry, LabeledExample, Route,
    TriageLabel,
};

/// Result of a completed cycle.
#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub classification: ClassificationResult,
    /// Label persisted with the example; routing follows this.
    pub stored_label: TriageLabel,
    /// Rule clause appended during reconciliation, if any.
    pub rule_update: Option<RuleUpdate>,
    pub route: Route,
    pub feedback: CollectedFeedback,
}

/// Drives triage cycles against shared memory and rules.
pub struct TriageOrchestrator {
    config: TriageConfig,
    store: Arc<dyn ExampleStore>,
    classifier: Arc<dyn Classifier>,
    reconciler: FeedbackReconciler,
    rules: Arc<RuleBook>,
    feedback: Arc<dyn FeedbackSource>,
    agent: Arc<dyn ResponseAgent>,
    history: Mutex<HashMap<Namespace, Vec<HistoryEntry>>>,
    cycle_locks: Mutex<HashMap<Namespace, Arc<Mutex<()>>>>,
}

impl TriageOrchestrator {
    pub fn new(
        config: TriageConfig,
        store: Arc<dyn ExampleStore>,
        classifier: Arc<dyn Classifier>,
        reconciler: FeedbackReconciler,
        rules: Arc<RuleBook>,
        feedback: Arc<dyn FeedbackSource>,
        agent: Arc<dyn ResponseAgent>,
    ) -> Self {
        Self {
            config,
            store,
            classifier,
            reconciler,
            rules,
            feedback,
            agent,
            history: Mutex::new(HashMap::new()),
            cycle_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one triage cycle for `user_id`.
    ///
    /// Cycles for the same user run one at a time.
    pub async fn process(
        &self,
        user_id: &str,
        email: EmailRecord,
    ) -> Result<TriageOutcome, CycleError> {
        let namespace = self.config.namespace(user_id);
        let lock = self.cycle_lock(&namespace).await;
        let _cycle = lock.lock().await;

        let key = email.identity_key();
        let fail = |stage: CycleStage, source: TriageError| CycleError {
            email_key: key.clone(),
            subject: email.subject.clone(),
            stage,
            source,
        };

        info!(
            namespace = %namespace,
            subject = %email.subject,
            author = %email.author,
            "Processing email"
        );

        // Retrieval failures degrade to zero examples.
        let examples: Vec<LabeledExample> = match self
            .store
            .search(&namespace, &email.search_text(), self.config.example_limit)
            .await
        {
            Ok(hits) => {
                debug!(count = hits.len(), "Retrieved similar examples");
                hits.into_iter().map(|hit| hit.example).collect()
            }
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    error = %e,
                    "Example retrieval failed, classifying without examples"
                );
                Vec::new()
            }
        };

        let rules = self.rules.snapshot(&namespace).await;
        let classification = self
            .classifier
            .classify(&rules, &examples, &email)
            .await
            .map_err(|e| fail(CycleStage::RetrievedContext, e))?;
        info!(
            subject = %email.subject,
            label = %classification.label,
            examples = examples.len(),
            "Email classified"
        );

        let feedback = collect_feedback(
            self.feedback.as_ref(),
            self.config.feedback_timeout,
            &namespace,
            &email,
            &classification,
        )
        .await
        .map_err(|e| fail(CycleStage::Classified, e))?;

        let feedback_label = feedback.feedback.resolve(classification.label);
        let reconciliation = self
            .reconciler
            .reconcile(
                &namespace,
                feedback_label,
                &email,
                classification.label,
                &self.rules,
            )
            .await;
        let label = reconciliation.stored_label;

        self.store
            .put(&namespace, &key, LabeledExample::new(email.clone(), label))
            .await
            .map_err(|e| fail(CycleStage::Reconciled, e.into()))?;

        self.history
            .lock()
            .await
            .entry(namespace.clone())
            .or_default()
            .push(HistoryEntry {
                subject: email.subject.clone(),
                label,
            });

        let route = self.route(&namespace, &email, &classification, label).await;
        info!(
            namespace = %namespace,
            subject = %email.subject,
            classified = %classification.label,
            stored = %label,
            route = route.label(),
            "Cycle complete"
        );

        Ok(TriageOutcome {
            classification,
            stored_label: label,
            rule_update: reconciliation.rule_update,
            route,
            feedback,
        })
    }

    /// Process emails one after another for `user_id`.
    ///
    /// Failed cycles are logged and skipped.
    pub async fn process_batch(
        &self,
        user_id: &str,
        emails: Vec<EmailRecord>,
    ) -> Vec<TriageOutcome> {
        let count = emails.len();
        info!(count, user_id, "Processing email batch");

        let mut results = Vec::with_capacity(count);
        for email in emails {
            match self.process(user_id, email).await {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    error!(error = %e, stage = %e.stage, "Failed to process email in batch");
                }
            }
        }

        info!(processed = results.len(), total = count, "Batch processing complete");
        results
    }

    /// Decisions made for `user_id`, oldest first.
    pub async fn history(&self, user_id: &str) -> Vec<HistoryEntry> {
        let namespace = self.config.namespace(user_id);
        self.history
            .lock()
            .await
            .get(&namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Current rules for `user_id`.
    pub async fn rules(&self, user_id: &str) -> RuleSet {
        self.rules.snapshot(&self.config.namespace(user_id)).await
    }

    /// Dispatches on `label`, the reconciled label that was stored, so a
    /// human correction decides the route of the email it corrected.
    async fn route(
        &self,
        namespace: &Namespace,
        email: &EmailRecord,
        classification: &ClassificationResult,
        label: TriageLabel,
    ) -> Route {
        match label {
            TriageLabel::Ignore => Route::Ignore,
            TriageLabel::Notify => Route::Notify {
                summary: format!(
                    "{} from {}: {}",
                    email.subject, email.author, classification.rationale
                ),
            },
            TriageLabel::Respond => {
                let history = self
                    .history
                    .lock()
                    .await
                    .get(namespace)
                    .cloned()
                    .unwrap_or_default();
                match self
                    .agent
                    .respond(&respond_instruction(email), &history)
                    .await
                {
                    Ok(transcript) => Route::Respond {
                        transcript,
                        error: None,
                    },
                    Err(e) => {
                        error!(
                            namespace = %namespace,
                            subject = %email.subject,
                            error = %e,
                            "Response agent failed"
                        );
                        Route::Respond {
                            transcript: Vec::new(),
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        }
    }

    async fn cycle_lock(&self, namespace: &Namespace) -> Arc<Mutex<()>> {
        let mut locks = self.cycle_locks.lock().await;
        Arc::clone(locks.entry(namespace.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::{AgentError, LlmError};
    use crate::llm::{
        ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
        ToolCompletionRequest, ToolCompletionResponse,
    };
    use crate::memory::{HashedTermEmbedder, InMemoryExampleStore};
    use crate::pipeline::feedback::AutoAgree;

    struct FixedClassifier(TriageLabel);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            _rules: &RuleSet,
            _examples: &[LabeledExample],
            _email: &EmailRecord,
        ) -> Result<ClassificationResult, TriageError> {
            Ok(ClassificationResult {
                label: self.0,
                rationale: "fixed".into(),
            })
        }
    }

    struct NoLlm;

    #[async_trait]
    impl LlmProvider for NoLlm {
        fn model_name(&self) -> &str {
            "none"
        }
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
        async fn complete_with_tools(
            &self,
            _req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "none".into(),
                reason: "offline".into(),
            })
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl ResponseAgent for FailingAgent {
        async fn respond(
            &self,
            _instruction: &str,
            _history: &[HistoryEntry],
        ) -> Result<Vec<ChatMessage>, AgentError> {
            Err(AgentError::MaxIterations { max: 1 })
        }
    }

    fn orchestrator(label: TriageLabel) -> (TriageOrchestrator, Arc<InMemoryExampleStore>) {
        let store = Arc::new(InMemoryExampleStore::new(Arc::new(HashedTermEmbedder::new(64))));
        let orchestrator = TriageOrchestrator::new(
            TriageConfig::default(),
            store.clone(),
            Arc::new(FixedClassifier(label)),
            FeedbackReconciler::new(Arc::new(NoLlm)),
            Arc::new(RuleBook::default()),
            Arc::new(AutoAgree),
            Arc::new(FailingAgent),
        );
        (orchestrator, store)
    }

    fn email(subject: &str) -> EmailRecord {
        EmailRecord::new("a <a@x.com>", "John Doe <john@x.com>", subject, "body text")
    }

    #[tokio::test]
    async fn notify_route_carries_summary() {
        let (orchestrator, store) = orchestrator(TriageLabel::Notify);
        let outcome = orchestrator.process("u1", email("Deploy done")).await.unwrap();

        assert_eq!(outcome.stored_label, TriageLabel::Notify);
        match outcome.route {
            Route::Notify { summary } => assert!(summary.starts_with("Deploy done from a <a@x.com>")),
            other => panic!("expected notify, got {other:?}"),
        }
        let ns = Namespace::examples("email_assistant", "u1");
        assert_eq!(store.len(&ns).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn agent_failure_still_completes_cycle() {
        let (orchestrator, store) = orchestrator(TriageLabel::Respond);
        let outcome = orchestrator.process("u1", email("Question")).await.unwrap();

        match outcome.route {
            Route::Respond { transcript, error } => {
                assert!(transcript.is_empty());
                assert!(error.unwrap().contains("iterations"));
            }
            other => panic!("expected respond, got {other:?}"),
        }
        let ns = Namespace::examples("email_assistant", "u1");
        assert_eq!(store.len(&ns).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn history_is_per_user() {
        let (orchestrator, _) = orchestrator(TriageLabel::Ignore);
        orchestrator.process("u1", email("One")).await.unwrap();
        orchestrator.process("u1", email("Two")).await.unwrap();
        orchestrator.process("u2", email("Three")).await.unwrap();

        let subjects: Vec<String> = orchestrator
            .history("u1")
            .await
            .into_iter()
            .map(|h| h.subject)
            .collect();
        assert_eq!(subjects, vec!["One", "Two"]);
        assert_eq!(orchestrator.history("u2").await.len(), 1);
        assert!(orchestrator.history("nobody").await.is_empty());
    }
}
