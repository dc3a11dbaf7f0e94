//! Tool-calling response agent.
//!
//! Receives an instruction ("Respond to the email ...") and the user's triage
//! history, then loops: ask the model, run any requested tools, feed the
//! results back, until the model answers with plain text.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::UserProfile;
use crate::error::AgentError;
use crate::llm::{ChatMessage, LlmProvider, Role, ToolCall, ToolCompletionRequest};
use crate::pipeline::types::{EmailRecord, HistoryEntry};
use crate::tools::ToolRegistry;

/// Max tokens per agent turn.
const AGENT_MAX_TOKENS: u32 = 1024;

/// Drafts a response for an email.
#[async_trait]
pub trait ResponseAgent: Send + Sync {
    /// Run to completion and return the conversation transcript
    /// (everything after the system prompt).
    async fn respond(
        &self,
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<Vec<ChatMessage>, AgentError>;
}

/// The instruction handed to the agent for `email`.
pub fn respond_instruction(email: &EmailRecord) -> String {
    format!("Respond to the email {email}")
}

/// Response agent driving an `LlmProvider` with the assistant tools.
pub struct LlmResponseAgent {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    profile: UserProfile,
    instructions: String,
    max_iterations: usize,
}

impl LlmResponseAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        profile: UserProfile,
        instructions: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        tracing::debug!(tools = tools.count(), max_iterations, "Response agent ready");
        Self {
            llm,
            tools,
            profile,
            instructions: instructions.into(),
            max_iterations: max_iterations.max(1),
        }
    }

    /// Run one tool call. Failures go back to the model as text.
    async fn run_tool(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.get(&call.name).await else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return format!("Error: tool '{}' not found", call.name);
        };

        match tool.execute(call.arguments.clone()).await {
            Ok(output) => {
                debug!(
                    tool = %call.name,
                    duration_ms = output.duration.as_millis() as u64,
                    "Tool executed"
                );
                output.content
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                format!("Error: {e}")
            }
        }
    }
}

#[async_trait]
impl ResponseAgent for LlmResponseAgent {
    async fn respond(
        &self,
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<Vec<ChatMessage>, AgentError> {
        let system = ChatMessage::system(build_agent_system_prompt(
            &self.profile,
            &self.instructions,
            history,
        ));
        let mut messages = vec![system, ChatMessage::user(instruction)];
        let tools = self.tools.tool_definitions().await;

        for iteration in 1..=self.max_iterations {
            let mut request = ToolCompletionRequest::new(messages.clone(), tools.clone());
            request.max_tokens = Some(AGENT_MAX_TOKENS);

            let response = self.llm.complete_with_tools(request).await?;
            debug!(
                iteration,
                tool_calls = response.tool_calls.len(),
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                "Agent turn"
            );

            if response.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant(response.content.unwrap_or_default()));
                info!(iterations = iteration, "Response agent finished");
                return Ok(strip_system(messages));
            }

            let calls = response.tool_calls;
            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content,
                calls.clone(),
            ));
            for call in &calls {
                let result = self.run_tool(call).await;
                messages.push(ChatMessage::tool_result(&call.id, &call.name, result));
            }
        }

        warn!(max = self.max_iterations, "Response agent hit iteration cap");
        Err(AgentError::MaxIterations {
            max: self.max_iterations,
        })
    }
}

fn strip_system(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .filter(|m| m.role != Role::System)
        .collect()
}

/// System prompt for the response agent.
pub fn build_agent_system_prompt(
    profile: &UserProfile,
    instructions: &str,
    history: &[HistoryEntry],
) -> String {
    let past = history
        .iter()
        .map(|h| format!("{}: {}", h.subject, h.label))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are {full_name}'s executive assistant. You are a top-notch executive \
assistant who cares about {name} performing as well as possible.\n\n\
{name}'s background: {background}\n\n\
You have access to the following tools to help manage {name}'s communications \
and schedule:\n\
1. send_email(to, subject, content) - Send emails to specified recipients\n\
2. schedule_meeting(attendees, subject, duration_minutes, preferred_day) - Schedule calendar meetings\n\
3. check_availability(day) - Check available time slots for a given day\n\n\
{instructions}\nPast: {past}",
        full_name = profile.full_name,
        name = profile.name,
        background = profile.background,
    )
}
