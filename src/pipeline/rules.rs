//! Natural-language triage rules and their per-namespace book.
//!
//! A `RuleSet` holds one description per category. The reconciler grows a
//! category by appending clauses; text is never replaced or removed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::memory::Namespace;
use crate::pipeline::types::TriageLabel;

pub const DEFAULT_IGNORE_RULE: &str =
    "Marketing newsletters, spam emails, mass company announcements";
pub const DEFAULT_NOTIFY_RULE: &str =
    "Team member out sick, build system notifications, project status updates";
pub const DEFAULT_RESPOND_RULE: &str =
    "Direct questions from team members, meeting requests, critical bug reports";

/// Category descriptions. All three are always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    ignore: String,
    notify: String,
    respond: String,
}

impl RuleSet {
    /// Build a rule set, rejecting blank descriptions.
    pub fn new(
        ignore: impl Into<String>,
        notify: impl Into<String>,
        respond: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let rules = Self {
            ignore: ignore.into().trim().to_string(),
            notify: notify.into().trim().to_string(),
            respond: respond.into().trim().to_string(),
        };
        for label in TriageLabel::ALL {
            if rules.get(label).is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("rules.{label}"),
                    message: "rule text must not be empty".to_string(),
                });
            }
        }
        Ok(rules)
    }

    pub fn get(&self, label: TriageLabel) -> &str {
        match label {
            TriageLabel::Ignore => &self.ignore,
            TriageLabel::Notify => &self.notify,
            TriageLabel::Respond => &self.respond,
        }
    }

    /// Append a clause to a category, comma-joined.
    ///
    /// Returns `false` (and changes nothing) for a blank clause.
    pub fn append(&mut self, label: TriageLabel, clause: &str) -> bool {
        let clause = clause.trim().trim_end_matches(['.', ',']).trim();
        if clause.is_empty() {
            return false;
        }
        let text = match label {
            TriageLabel::Ignore => &mut self.ignore,
            TriageLabel::Notify => &mut self.notify,
            TriageLabel::Respond => &mut self.respond,
        };
        text.push_str(", ");
        text.push_str(clause);
        true
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            ignore: DEFAULT_IGNORE_RULE.to_string(),
            notify: DEFAULT_NOTIFY_RULE.to_string(),
            respond: DEFAULT_RESPOND_RULE.to_string(),
        }
    }
}

/// A suggested clause for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub category: TriageLabel,
    pub addition: String,
}

/// Rule sets keyed by namespace, seeded from a shared default.
///
/// Each namespace's set sits behind its own lock, so appends for one user
/// serialize while other users proceed.
pub struct RuleBook {
    defaults: RuleSet,
    sets: RwLock<HashMap<Namespace, Arc<RwLock<RuleSet>>>>,
}

impl RuleBook {
    pub fn new(defaults: RuleSet) -> Self {
        Self {
            defaults,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Handle to a namespace's rule set, created from the defaults on first use.
    pub async fn handle(&self, namespace: &Namespace) -> Arc<RwLock<RuleSet>> {
        if let Some(set) = self.sets.read().await.get(namespace) {
            return Arc::clone(set);
        }
        let mut sets = self.sets.write().await;
        Arc::clone(sets.entry(namespace.clone()).or_insert_with(|| {
            debug!(namespace = %namespace, "Seeding rule set from defaults");
            Arc::new(RwLock::new(self.defaults.clone()))
        }))
    }

    /// Copy of the namespace's current rules.
    pub async fn snapshot(&self, namespace: &Namespace) -> RuleSet {
        self.handle(namespace).await.read().await.clone()
    }

    /// Apply an update under the namespace's write lock.
    pub async fn apply(&self, namespace: &Namespace, update: &RuleUpdate) -> bool {
        let handle = self.handle(namespace).await;
        let mut rules = handle.write().await;
        let applied = rules.append(update.category, &update.addition);
        if applied {
            info!(
                namespace = %namespace,
                category = %update.category,
                addition = %update.addition,
                "Rule set updated"
            );
        }
        applied
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new(RuleSet::default())
    }
}
