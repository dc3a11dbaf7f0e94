//! Response sub-agent: drafts replies for emails triaged as `respond`.

pub mod response;

pub use response::{LlmResponseAgent, ResponseAgent, build_agent_system_prompt, respond_instruction};
