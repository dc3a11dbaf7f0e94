//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.
//!
//! System messages become the preamble, the final message becomes the
//! prompt, and everything in between is chat history. Tool calls and tool
//! results map onto rig's assistant/user content blocks.

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{
    CompletionError, CompletionModel, ToolDefinition as RigToolDefinition,
};
use rig::message::{AssistantContent, Message, ToolResultContent, UserContent};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// Used when the caller sets no limit; some providers require one.
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// `LlmProvider` over any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "rig",
        }
    }

    /// Provider label used in errors and logs.
    pub fn with_provider(mut self, provider: &'static str) -> Self {
        self.provider = provider;
        self
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<ParsedChoice, LlmError> {
        let RigConversation {
            preamble,
            history,
            prompt,
        } = to_rig_conversation(messages).map_err(|reason| LlmError::InvalidResponse {
            provider: self.provider.to_string(),
            reason,
        })?;

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .tools(tools.iter().map(to_rig_tool).collect())
            .max_tokens(max_tokens.map(u64::from).unwrap_or(DEFAULT_MAX_TOKENS));
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(self.provider, e))?;

        let mut parsed = parse_choice(&response.choice);
        parsed.input_tokens = response.usage.input_tokens as u32;
        parsed.output_tokens = response.usage.output_tokens as u32;
        Ok(parsed)
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let parsed = self
            .send(&request.messages, &[], request.temperature, request.max_tokens)
            .await?;

        Ok(CompletionResponse {
            content: parsed.text,
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            finish_reason: parsed.finish_reason,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let parsed = self
            .send(
                &request.messages,
                &request.tools,
                request.temperature,
                request.max_tokens,
            )
            .await?;

        Ok(ToolCompletionResponse {
            content: (!parsed.text.is_empty()).then_some(parsed.text),
            tool_calls: parsed.tool_calls,
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            finish_reason: parsed.finish_reason,
        })
    }
}

// ── Conversion ──────────────────────────────────────────────────────

struct RigConversation {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

fn to_rig_conversation(messages: &[ChatMessage]) -> Result<RigConversation, String> {
    let mut system = Vec::new();
    let mut converted: Vec<Message> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content.as_str()),
            Role::User => converted.push(Message::user(msg.content.clone())),
            Role::Assistant if msg.tool_calls.is_empty() => {
                converted.push(Message::assistant(msg.content.clone()));
            }
            Role::Assistant => {
                let mut blocks = Vec::with_capacity(msg.tool_calls.len() + 1);
                if !msg.content.is_empty() {
                    blocks.push(AssistantContent::text(msg.content.clone()));
                }
                for call in &msg.tool_calls {
                    blocks.push(AssistantContent::tool_call(
                        call.id.clone(),
                        call.name.clone(),
                        call.arguments.clone(),
                    ));
                }
                let content = OneOrMany::many(blocks).map_err(|e| e.to_string())?;
                converted.push(Message::Assistant { id: None, content });
            }
            Role::Tool => {
                let result = UserContent::tool_result(
                    msg.tool_call_id.clone().unwrap_or_default(),
                    OneOrMany::one(ToolResultContent::text(msg.content.clone())),
                );
                // Results for one assistant turn share a single user message.
                match converted.last_mut() {
                    Some(Message::User { content }) if is_tool_results(content) => {
                        content.push(result);
                    }
                    _ => converted.push(Message::User {
                        content: OneOrMany::one(result),
                    }),
                }
            }
        }
    }

    let prompt = converted
        .pop()
        .ok_or_else(|| "conversation has no user or assistant messages".to_string())?;
    Ok(RigConversation {
        preamble: (!system.is_empty()).then(|| system.join("\n")),
        history: converted,
        prompt,
    })
}

fn is_tool_results(content: &OneOrMany<UserContent>) -> bool {
    content
        .iter()
        .all(|c| matches!(c, UserContent::ToolResult(_)))
}

fn to_rig_tool(tool: &ToolDefinition) -> RigToolDefinition {
    RigToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

struct ParsedChoice {
    text: String,
    tool_calls: Vec<ToolCall>,
    input_tokens: u32,
    output_tokens: u32,
    finish_reason: FinishReason,
}

fn parse_choice(choice: &OneOrMany<AssistantContent>) -> ParsedChoice {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for content in choice.iter() {
        match content {
            AssistantContent::Text(t) => text.push_str(&t.text),
            AssistantContent::ToolCall(call) => tool_calls.push(ToolCall {
                id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            }),
            _ => {}
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolUse
    };
    ParsedChoice {
        text,
        tool_calls,
        input_tokens: 0,
        output_tokens: 0,
        finish_reason,
    }
}

fn map_completion_error(provider: &str, error: CompletionError) -> LlmError {
    match error {
        CompletionError::ProviderError(message) => {
            let lower = message.to_lowercase();
            if lower.contains("authentication") || lower.contains("401") {
                LlmError::AuthFailed {
                    provider: provider.to_string(),
                }
            } else if lower.contains("rate_limit") || lower.contains("429") {
                LlmError::RateLimited {
                    provider: provider.to_string(),
                    retry_after: None,
                }
            } else {
                LlmError::RequestFailed {
                    provider: provider.to_string(),
                    reason: message,
                }
            }
        }
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}
