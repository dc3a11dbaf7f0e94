//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::memory::{EmbedderKind, Namespace};
use crate::pipeline::rules::RuleSet;

/// Default instructions for the response agent.
pub const DEFAULT_AGENT_INSTRUCTIONS: &str =
    "Use these tools when appropriate to help manage the user's tasks efficiently.";

/// Who the agent is triaging for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Short name used in prompts.
    pub name: String,
    pub full_name: String,
    /// Role and team context.
    pub background: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: "John".to_string(),
            full_name: "John Doe".to_string(),
            background: "Senior software engineer leading a team of 5 developers".to_string(),
        }
    }
}

/// Triage agent configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Application component of every namespace.
    pub application: String,
    /// User id used by the CLI when none is given.
    pub user_id: String,
    /// Max similar examples retrieved per cycle.
    pub example_limit: usize,
    /// How long to wait for human feedback before accepting the classifier's label.
    pub feedback_timeout: Duration,
    /// Embedder for example retrieval; falls back to hashed terms.
    pub embedder: EmbedderKind,
    /// Vector size of the hashed embedder.
    pub embedding_dimensions: usize,
    /// Tool-loop cap for the response agent.
    pub max_agent_iterations: usize,
    pub profile: UserProfile,
    /// Seed rules for every new namespace.
    pub rules: RuleSet,
    pub agent_instructions: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            application: "email_assistant".to_string(),
            user_id: "lance".to_string(),
            example_limit: 5,
            feedback_timeout: Duration::from_secs(300), // 5 minutes
            embedder: EmbedderKind::default(),
            embedding_dimensions: 256,
            max_agent_iterations: 6,
            profile: UserProfile::default(),
            rules: RuleSet::default(),
            agent_instructions: DEFAULT_AGENT_INSTRUCTIONS.to_string(),
        }
    }
}

impl TriageConfig {
    /// Overlay `TRIAGE_*` environment variables on the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let profile = UserProfile {
            name: env_or("TRIAGE_PROFILE_NAME", defaults.profile.name),
            full_name: env_or("TRIAGE_PROFILE_FULL_NAME", defaults.profile.full_name),
            background: env_or("TRIAGE_PROFILE_BACKGROUND", defaults.profile.background),
        };

        Ok(Self {
            application: env_or("TRIAGE_APP", defaults.application),
            user_id: env_or("TRIAGE_USER_ID", defaults.user_id),
            example_limit: env_parse("TRIAGE_EXAMPLE_LIMIT", defaults.example_limit)?,
            feedback_timeout: Duration::from_secs(env_parse(
                "TRIAGE_FEEDBACK_TIMEOUT_SECS",
                defaults.feedback_timeout.as_secs(),
            )?),
            embedder: env_parse("TRIAGE_EMBEDDER", defaults.embedder)?,
            embedding_dimensions: env_parse(
                "TRIAGE_EMBEDDING_DIMENSIONS",
                defaults.embedding_dimensions,
            )?,
            max_agent_iterations: env_parse(
                "TRIAGE_MAX_AGENT_ITERATIONS",
                defaults.max_agent_iterations,
            )?,
            profile,
            rules: defaults.rules,
            agent_instructions: env_or("TRIAGE_AGENT_INSTRUCTIONS", defaults.agent_instructions),
        })
    }

    /// The examples namespace for `user_id`.
    pub fn namespace(&self, user_id: &str) -> Namespace {
        Namespace::examples(&self.application, user_id)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
