//! End-to-end tests for the triage cycle.
//!
//! Each test wires a real orchestrator (LLM classifier, reconciler, in-memory
//! store, response agent) to a scripted LLM, so no API calls are made.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use email_triage::agent::LlmResponseAgent;
use email_triage::config::TriageConfig;
use email_triage::error::{LlmError, MemoryError, TriageError};
use email_triage::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
    ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};
use email_triage::memory::{
    ExampleStore, HashedTermEmbedder, InMemoryExampleStore, Namespace, ScoredExample,
};
use email_triage::pipeline::feedback::{Feedback, FeedbackBroker, FeedbackSource};
use email_triage::pipeline::types::{
    ClassificationResult, CycleStage, EmailRecord, LabeledExample, Route, TriageLabel,
};
use email_triage::pipeline::{
    FeedbackReconciler, LlmClassifier, RuleBook, RuleSet, TriageOrchestrator,
};
use email_triage::samples;
use email_triage::tools::ToolRegistry;

const APP: &str = "email_assistant";

/// Marker in the reconciler's system prompt.
const RECONCILE_MARKER: &str = "You maintain the rules";

/// Scripted LLM for classification, reconciliation and the response agent.
struct TriageLlm {
    /// Raw classifier reply keyed by email subject.
    classifications: HashMap<String, String>,
    reconcile_reply: String,
    classify_prompts: Mutex<Vec<String>>,
    reconcile_calls: Mutex<usize>,
}

impl TriageLlm {
    fn new() -> Self {
        Self {
            classifications: HashMap::new(),
            reconcile_reply: String::new(),
            classify_prompts: Mutex::new(Vec::new()),
            reconcile_calls: Mutex::new(0),
        }
    }

    fn classify(mut self, subject: &str, label: &str) -> Self {
        self.classifications.insert(
            subject.to_string(),
            format!(r#"{{"classification": "{label}", "reasoning": "scripted"}}"#),
        );
        self
    }

    fn reconcile_with(mut self, reply: &str) -> Self {
        self.reconcile_reply = reply.to_string();
        self
    }

    fn last_classify_prompt(&self) -> String {
        self.classify_prompts
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    fn reconcile_calls(&self) -> usize {
        *self.reconcile_calls.lock().unwrap()
    }
}

fn reply(content: impl Into<String>) -> CompletionResponse {
    CompletionResponse {
        content: content.into(),
        input_tokens: 50,
        output_tokens: 20,
        finish_reason: FinishReason::Stop,
    }
}

#[async_trait]
impl LlmProvider for TriageLlm {
    fn model_name(&self) -> &str {
        "scripted-triage"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = req
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if system.contains(RECONCILE_MARKER) {
            *self.reconcile_calls.lock().unwrap() += 1;
            return Ok(reply(self.reconcile_reply.clone()));
        }

        self.classify_prompts.lock().unwrap().push(system);
        let user = req
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let raw = self
            .classifications
            .iter()
            .find(|(subject, _)| user.contains(&format!("Subject: {subject}\n")))
            .map(|(_, raw)| raw.clone())
            .unwrap_or_else(|| r#"{"classification": "notify", "reasoning": "default"}"#.into());
        Ok(reply(raw))
    }

    async fn complete_with_tools(
        &self,
        req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let used_tool = req.messages.iter().any(|m| m.role == Role::Tool);
        if used_tool {
            return Ok(ToolCompletionResponse {
                content: Some("Replied to Alice.".into()),
                tool_calls: vec![],
                input_tokens: 80,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            });
        }
        Ok(ToolCompletionResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "toolu_1".into(),
                name: "send_email".into(),
                arguments: serde_json::json!({
                    "to": "alice.jones@bar.com",
                    "subject": "Re: service outage",
                    "content": "Looking into it now."
                }),
            }],
            input_tokens: 80,
            output_tokens: 30,
            finish_reason: FinishReason::ToolUse,
        })
    }
}

/// Answers every feedback request with the same raw text.
struct TypedFeedback(&'static str);

#[async_trait]
impl FeedbackSource for TypedFeedback {
    async fn request(
        &self,
        _namespace: &Namespace,
        _email: &EmailRecord,
        _classification: &ClassificationResult,
    ) -> Result<Feedback, TriageError> {
        Feedback::parse(self.0)
    }
}

/// Store whose search always fails; writes go through.
struct BrokenSearchStore(InMemoryExampleStore);

#[async_trait]
impl ExampleStore for BrokenSearchStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        example: LabeledExample,
    ) -> Result<(), MemoryError> {
        self.0.put(namespace, key, example).await
    }

    async fn search(
        &self,
        _namespace: &Namespace,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<ScoredExample>, MemoryError> {
        Err(MemoryError::Unavailable {
            reason: "index offline".into(),
        })
    }

    async fn get(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Option<LabeledExample>, MemoryError> {
        self.0.get(namespace, key).await
    }

    async fn len(&self, namespace: &Namespace) -> Result<usize, MemoryError> {
        self.0.len(namespace).await
    }
}

fn new_store() -> InMemoryExampleStore {
    InMemoryExampleStore::new(Arc::new(HashedTermEmbedder::new(256)))
}

fn build(
    llm: Arc<TriageLlm>,
    store: Arc<dyn ExampleStore>,
    feedback: Arc<dyn FeedbackSource>,
    config: TriageConfig,
) -> TriageOrchestrator {
    let agent = Arc::new(LlmResponseAgent::new(
        llm.clone(),
        Arc::new(ToolRegistry::with_assistant_tools()),
        config.profile.clone(),
        config.agent_instructions.clone(),
        config.max_agent_iterations,
    ));
    TriageOrchestrator::new(
        config,
        store,
        Arc::new(LlmClassifier::new(llm.clone(), Default::default())),
        FeedbackReconciler::new(llm),
        Arc::new(RuleBook::default()),
        feedback,
        agent,
    )
}

fn sample(index: usize) -> EmailRecord {
    samples::sample(index).unwrap()
}

fn ns(user: &str) -> Namespace {
    Namespace::examples(APP, user)
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_agreed_ignore_ends_quietly() {
    let llm = Arc::new(TriageLlm::new().classify("Xmas Party Theme", "ignore"));
    let store = Arc::new(new_store());
    let orchestrator = build(
        llm.clone(),
        store.clone(),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let email = sample(0);
    let key = email.identity_key();
    let outcome = orchestrator.process("lance", email).await.unwrap();

    assert_eq!(outcome.stored_label, TriageLabel::Ignore);
    assert!(outcome.rule_update.is_none());
    assert!(matches!(outcome.route, Route::Ignore));
    assert_eq!(llm.reconcile_calls(), 0);
    assert_eq!(orchestrator.rules("lance").await, RuleSet::default());

    let stored = store.get(&ns("lance"), &key).await.unwrap().unwrap();
    assert_eq!(stored.label, TriageLabel::Ignore);
}

#[tokio::test]
async fn scenario_b_respond_runs_response_agent() {
    let llm = Arc::new(
        TriageLlm::new().classify("Quick question about API documentation", "respond"),
    );
    let orchestrator = build(
        llm,
        Arc::new(new_store()),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let outcome = orchestrator.process("lance", sample(2)).await.unwrap();
    assert_eq!(outcome.stored_label, TriageLabel::Respond);

    let Route::Respond { transcript, error } = outcome.route else {
        panic!("expected respond route");
    };
    assert!(error.is_none());

    let instruction = &transcript[0];
    assert_eq!(instruction.role, Role::User);
    assert!(instruction.content.starts_with("Respond to the email From: Alice Jones"));
    assert!(instruction.content.contains("your service is down"));

    let tool_results: Vec<&ChatMessage> =
        transcript.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_results.len(), 1);
    assert_eq!(
        tool_results[0].content,
        "Email sent to alice.jones@bar.com with subject 'Re: service outage'"
    );
    assert_eq!(transcript.last().unwrap().content, "Replied to Alice.");
}

#[tokio::test]
async fn scenario_c_correction_grows_rules() {
    let llm = Arc::new(
        TriageLlm::new().classify("Project Update", "notify").reconcile_with(
            r#"{"rule_category": "respond", "rule_addition": "launch announcements that ask for monitoring follow-up", "corrected_label": "respond"}"#,
        ),
    );
    let store = Arc::new(new_store());
    let orchestrator = build(
        llm.clone(),
        store.clone(),
        Arc::new(TypedFeedback("respond")),
        TriageConfig::default(),
    );

    let email = sample(1);
    let key = email.identity_key();
    let outcome = orchestrator.process("lance", email).await.unwrap();

    assert_eq!(outcome.classification.label, TriageLabel::Notify);
    assert_eq!(outcome.stored_label, TriageLabel::Respond);
    assert_eq!(llm.reconcile_calls(), 1);

    let update = outcome.rule_update.unwrap();
    assert_eq!(update.category, TriageLabel::Respond);
    let rules = orchestrator.rules("lance").await;
    assert!(
        rules
            .get(TriageLabel::Respond)
            .ends_with(", launch announcements that ask for monitoring follow-up")
    );
    assert_eq!(
        rules.get(TriageLabel::Notify),
        RuleSet::default().get(TriageLabel::Notify)
    );

    // Routed on the stored label, not the classifier's.
    assert!(matches!(outcome.route, Route::Respond { .. }));
    let stored = store.get(&ns("lance"), &key).await.unwrap().unwrap();
    assert_eq!(stored.label, TriageLabel::Respond);
}

#[tokio::test]
async fn scenario_c_secondary_model_can_pick_the_label() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Project Update", "notify")
            .reconcile_with("Add to ignore: dashboard launch announcements\nLabel: ignore"),
    );
    let orchestrator = build(
        llm,
        Arc::new(new_store()),
        Arc::new(TypedFeedback("respond")),
        TriageConfig::default(),
    );

    let outcome = orchestrator.process("lance", sample(1)).await.unwrap();
    assert_eq!(outcome.stored_label, TriageLabel::Ignore);
    assert!(matches!(outcome.route, Route::Ignore));
    assert!(
        orchestrator
            .rules("lance")
            .await
            .get(TriageLabel::Ignore)
            .ends_with(", dashboard launch announcements")
    );
}

#[tokio::test]
async fn scenario_c_unusable_suggestion_keeps_rules() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Project Update", "notify")
            .reconcile_with("Hard to say, it depends on the team."),
    );
    let orchestrator = build(
        llm,
        Arc::new(new_store()),
        Arc::new(TypedFeedback("respond")),
        TriageConfig::default(),
    );

    let outcome = orchestrator.process("lance", sample(1)).await.unwrap();
    assert_eq!(outcome.stored_label, TriageLabel::Respond);
    assert!(outcome.rule_update.is_none());
    assert_eq!(orchestrator.rules("lance").await, RuleSet::default());
}

#[tokio::test]
async fn empty_store_classifies_with_rules_alone() {
    let llm = Arc::new(TriageLlm::new().classify("Project Update", "notify"));
    let orchestrator = build(
        llm.clone(),
        Arc::new(new_store()),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let outcome = orchestrator.process("first-time-user", sample(1)).await.unwrap();
    assert_eq!(outcome.stored_label, TriageLabel::Notify);

    let prompt = llm.last_classify_prompt();
    assert!(prompt.contains("There are no previous examples"));
    assert!(prompt.contains("project status updates"));
}

// ── Memory properties ───────────────────────────────────────────────

#[tokio::test]
async fn reprocessing_an_email_overwrites_its_example() {
    let llm = Arc::new(TriageLlm::new().classify("Xmas Party Theme", "ignore"));
    let store = Arc::new(new_store());
    let orchestrator = build(
        llm,
        store.clone(),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    orchestrator.process("lance", sample(0)).await.unwrap();
    orchestrator.process("lance", sample(0)).await.unwrap();

    assert_eq!(store.len(&ns("lance")).await.unwrap(), 1);
    assert_eq!(orchestrator.history("lance").await.len(), 2);
}

#[tokio::test]
async fn stored_email_is_retrieved_first_next_time() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Xmas Party Theme", "ignore")
            .classify("Project Update", "notify")
            .classify("Quick question about API documentation", "respond"),
    );
    let store = Arc::new(new_store());
    let orchestrator = build(
        llm.clone(),
        store.clone(),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let emails = samples::all();
    let outcomes = orchestrator.process_batch("lance", emails.clone()).await;
    assert_eq!(outcomes.len(), 3);

    for email in &emails {
        let hits = store
            .search(&ns("lance"), &email.search_text(), 5)
            .await
            .unwrap();
        assert_eq!(hits[0].key, email.identity_key());
    }

    // The next cycle sees its own earlier decision as a few-shot example.
    orchestrator.process("lance", sample(0)).await.unwrap();
    let prompt = llm.last_classify_prompt();
    assert!(prompt.contains("Here are some previous examples:"));
    assert!(prompt.contains("Email Subject: Xmas Party Theme"));
    assert!(prompt.contains("> Triage Result: ignore"));
}

#[tokio::test]
async fn retrieval_failure_is_not_fatal() {
    let llm = Arc::new(TriageLlm::new().classify("Project Update", "notify"));
    let store = Arc::new(BrokenSearchStore(new_store()));
    let orchestrator = build(
        llm.clone(),
        store.clone(),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let outcome = orchestrator.process("lance", sample(1)).await.unwrap();
    assert_eq!(outcome.stored_label, TriageLabel::Notify);
    assert!(llm.last_classify_prompt().contains("There are no previous examples"));
    assert_eq!(store.len(&ns("lance")).await.unwrap(), 1);
}

// ── Rules ───────────────────────────────────────────────────────────

#[tokio::test]
async fn rules_only_grow_across_corrections() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Project Update", "notify")
            .classify("Xmas Party Theme", "notify")
            .reconcile_with(r#"{"rule_category": "respond", "rule_addition": "anything Alice sends"}"#),
    );
    let orchestrator = build(
        llm,
        Arc::new(new_store()),
        Arc::new(TypedFeedback("respond")),
        TriageConfig::default(),
    );

    let mut previous = orchestrator.rules("lance").await;
    for index in [1, 0] {
        orchestrator.process("lance", sample(index)).await.unwrap();
        let current = orchestrator.rules("lance").await;
        for label in TriageLabel::ALL {
            assert!(current.get(label).starts_with(previous.get(label)));
        }
        assert!(current.get(TriageLabel::Respond).len() > previous.get(TriageLabel::Respond).len());
        previous = current;
    }
}

#[tokio::test]
async fn corrections_do_not_leak_between_users() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Project Update", "notify")
            .reconcile_with(r#"{"rule_category": "respond", "rule_addition": "billing launches"}"#),
    );
    let orchestrator = build(
        llm,
        Arc::new(new_store()),
        Arc::new(TypedFeedback("respond")),
        TriageConfig::default(),
    );

    orchestrator.process("alice", sample(1)).await.unwrap();

    assert_ne!(orchestrator.rules("alice").await, RuleSet::default());
    assert_eq!(orchestrator.rules("bob").await, RuleSet::default());
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_classification_stores_nothing() {
    let llm = Arc::new(TriageLlm::new().classify("Project Update", "urgent"));
    let store = Arc::new(new_store());
    let orchestrator = build(
        llm,
        store.clone(),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let email = sample(1);
    let err = orchestrator.process("lance", email.clone()).await.unwrap_err();

    assert_eq!(err.stage, CycleStage::RetrievedContext);
    assert_eq!(err.email_key, email.identity_key());
    assert!(matches!(err.source, TriageError::InvalidClassification(_)));
    assert_eq!(store.len(&ns("lance")).await.unwrap(), 0);
    assert!(orchestrator.history("lance").await.is_empty());
}

#[tokio::test]
async fn non_category_feedback_is_rejected() {
    let llm = Arc::new(TriageLlm::new().classify("Project Update", "notify"));
    let store = Arc::new(new_store());
    let orchestrator = build(
        llm.clone(),
        store.clone(),
        Arc::new(TypedFeedback("urgent-ish")),
        TriageConfig::default(),
    );

    let err = orchestrator.process("lance", sample(1)).await.unwrap_err();
    assert_eq!(err.stage, CycleStage::Classified);
    assert!(matches!(err.source, TriageError::InvalidFeedback(ref text) if text == "urgent-ish"));
    assert_eq!(store.len(&ns("lance")).await.unwrap(), 0);
    assert_eq!(llm.reconcile_calls(), 0);
}

#[tokio::test]
async fn batch_skips_failed_cycles() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Xmas Party Theme", "ignore")
            .classify("Project Update", "maybe later"),
    );
    let orchestrator = build(
        llm,
        Arc::new(new_store()),
        Arc::new(TypedFeedback("")),
        TriageConfig::default(),
    );

    let outcomes = orchestrator
        .process_batch("lance", vec![sample(0), sample(1)])
        .await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].stored_label, TriageLabel::Ignore);
}

// ── Asynchronous feedback ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn feedback_timeout_accepts_classifier_label() {
    let llm = Arc::new(TriageLlm::new().classify("Project Update", "notify"));
    let broker = Arc::new(FeedbackBroker::new());
    let config = TriageConfig {
        feedback_timeout: Duration::from_secs(10),
        ..TriageConfig::default()
    };
    let orchestrator = build(llm.clone(), Arc::new(new_store()), broker.clone(), config);

    let outcome = orchestrator.process("lance", sample(1)).await.unwrap();

    assert!(outcome.feedback.timed_out);
    assert_eq!(outcome.stored_label, TriageLabel::Notify);
    assert_eq!(llm.reconcile_calls(), 0);
    assert!(broker.pending().is_empty());
}

#[tokio::test]
async fn broker_correction_resumes_cycle() {
    let llm = Arc::new(
        TriageLlm::new()
            .classify("Project Update", "notify")
            .reconcile_with(r#"{"corrected_label": "respond"}"#),
    );
    let broker = Arc::new(FeedbackBroker::new());
    let mut requests = broker.subscribe();
    let orchestrator = Arc::new(build(
        llm,
        Arc::new(new_store()),
        broker.clone(),
        TriageConfig::default(),
    ));

    let cycle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.process("lance", sample(1)).await })
    };

    let pending = requests.recv().await.unwrap();
    assert_eq!(pending.user_id, "lance");
    assert_eq!(pending.classifier_label, TriageLabel::Notify);
    broker.submit(pending.id, "respond").unwrap();

    let outcome = cycle.await.unwrap().unwrap();
    assert!(!outcome.feedback.timed_out);
    assert_eq!(outcome.feedback.feedback, Feedback::Correct(TriageLabel::Respond));
    assert_eq!(outcome.stored_label, TriageLabel::Respond);
    assert!(outcome.rule_update.is_none());
}
