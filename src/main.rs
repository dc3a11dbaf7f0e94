use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use email_triage::agent::LlmResponseAgent;
use email_triage::config::TriageConfig;
use email_triage::llm::{LlmConfig, Role, create_provider};
use email_triage::memory::{InMemoryExampleStore, create_embedder};
use email_triage::pipeline::feedback::{AutoAgree, FeedbackSource, StdinFeedback};
use email_triage::pipeline::{
    EmailRecord, FeedbackReconciler, LlmClassifier, Route, RuleBook, TriageOrchestrator,
};
use email_triage::samples;
use email_triage::tools::ToolRegistry;

/// Triage emails into ignore / notify / respond, learning from your corrections.
#[derive(Debug, Parser)]
#[command(name = "email-triage", version)]
struct Args {
    /// Sample email to run (0-2). Repeatable. Defaults to all samples.
    #[arg(long = "sample", value_parser = clap::value_parser!(u8).range(0..=2))]
    samples: Vec<u8>,

    /// RFC 822 message file to triage. Repeatable.
    #[arg(long = "eml")]
    eml: Vec<PathBuf>,

    /// User id whose memory and rules are used.
    #[arg(long)]
    user: Option<String>,

    /// Accept every classification without prompting.
    #[arg(long)]
    auto_agree: bool,

    /// Seconds to wait for feedback before accepting the classifier's label.
    #[arg(long)]
    feedback_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = TriageConfig::from_env().context("invalid triage configuration")?;
    if let Some(secs) = args.feedback_timeout {
        config.feedback_timeout = Duration::from_secs(secs);
    }
    let user_id = args.user.clone().unwrap_or_else(|| config.user_id.clone());

    let llm_config = LlmConfig::from_env().context("LLM configuration")?;
    eprintln!("📬 Email Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   User: {}", user_id);
    eprintln!(
        "   Feedback: {}\n",
        if args.auto_agree { "auto-agree" } else { "stdin" }
    );
    let llm = create_provider(&llm_config)?;

    let embedder = create_embedder(config.embedder, config.embedding_dimensions);
    let store = Arc::new(InMemoryExampleStore::new(embedder));
    let classifier = Arc::new(LlmClassifier::new(Arc::clone(&llm), config.profile.clone()));
    let reconciler = FeedbackReconciler::new(Arc::clone(&llm));
    let rules = Arc::new(RuleBook::new(config.rules.clone()));
    let feedback: Arc<dyn FeedbackSource> = if args.auto_agree {
        Arc::new(AutoAgree)
    } else {
        Arc::new(StdinFeedback::new())
    };
    let agent = Arc::new(LlmResponseAgent::new(
        Arc::clone(&llm),
        Arc::new(ToolRegistry::with_assistant_tools()),
        config.profile.clone(),
        config.agent_instructions.clone(),
        config.max_agent_iterations,
    ));

    let orchestrator = TriageOrchestrator::new(
        config, store, classifier, reconciler, rules, feedback, agent,
    );

    let emails = load_emails(&args).await?;
    for email in emails {
        match orchestrator.process(&user_id, email).await {
            Ok(outcome) => {
                println!(
                    "\n── {} → {}",
                    outcome.classification.label, outcome.stored_label
                );
                if let Some(update) = &outcome.rule_update {
                    println!("   rule added to {}: {}", update.category, update.addition);
                }
                print_route(&outcome.route);
            }
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    println!("\nHistory for {user_id}:");
    for entry in orchestrator.history(&user_id).await {
        println!("  {}: {}", entry.subject, entry.label);
    }
    Ok(())
}

async fn load_emails(args: &Args) -> anyhow::Result<Vec<EmailRecord>> {
    let mut emails = Vec::new();
    for path in &args.eml {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let email = EmailRecord::from_rfc822(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        emails.push(email);
    }

    if args.samples.is_empty() {
        if emails.is_empty() {
            emails.extend(samples::all());
        }
    } else {
        for &index in &args.samples {
            let email = samples::sample(index as usize)
                .with_context(|| format!("no sample email {index}"))?;
            emails.push(email);
        }
    }
    Ok(emails)
}

fn print_route(route: &Route) {
    match route {
        Route::Ignore => println!("   🚫 ignored"),
        Route::Notify { summary } => println!("   🔔 {summary}"),
        Route::Respond { transcript, error } => {
            println!("   ✉️  response agent:");
            for message in transcript {
                match message.role {
                    Role::Assistant if !message.tool_calls.is_empty() => {
                        for call in &message.tool_calls {
                            println!("     → {}({})", call.name, call.arguments);
                        }
                    }
                    Role::Assistant => println!("     {}", message.content),
                    Role::Tool => println!("     ← {}", message.content),
                    _ => {}
                }
            }
            if let Some(error) = error {
                println!("     failed: {error}");
            }
        }
    }
}
