//! `send_email` tool.

use std::time::Instant;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolOutput, require_str};

/// Writes and "sends" an email. Nothing leaves the process.
pub struct SendEmailTool;

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Write and send an email."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Recipient address"
                },
                "subject": {
                    "type": "string",
                    "description": "Subject line"
                },
                "content": {
                    "type": "string",
                    "description": "Email body"
                }
            },
            "required": ["to", "subject", "content"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let to = require_str(self.name(), &params, "to")?;
        let subject = require_str(self.name(), &params, "subject")?;
        require_str(self.name(), &params, "content")?;

        tracing::info!(to = %to, subject = %subject, "send_email invoked");
        Ok(ToolOutput::text(
            format!("Email sent to {to} with subject '{subject}'"),
            start.elapsed(),
        ))
    }
}
