//! Calendar tools: `schedule_meeting` and `check_availability`.

use std::time::Instant;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolOutput, require_str};

/// Fixed slots reported by `check_availability`.
const AVAILABLE_SLOTS: &[&str] = &["9:00 AM", "2:00 PM", "4:00 PM"];

/// Schedules a calendar meeting. Nothing is booked.
pub struct ScheduleMeetingTool;

#[async_trait]
impl Tool for ScheduleMeetingTool {
    fn name(&self) -> &str {
        "schedule_meeting"
    }

    fn description(&self) -> &str {
        "Schedule a calendar meeting."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "attendees": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Attendee email addresses"
                },
                "subject": {
                    "type": "string",
                    "description": "Meeting title"
                },
                "duration_minutes": {
                    "type": "integer",
                    "description": "Length of the meeting in minutes"
                },
                "preferred_day": {
                    "type": "string",
                    "description": "Day to schedule on"
                }
            },
            "required": ["attendees", "subject", "duration_minutes", "preferred_day"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let attendees = params
            .get("attendees")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: "missing array parameter 'attendees'".to_string(),
            })?;
        let subject = require_str(self.name(), &params, "subject")?;
        let duration = params
            .get("duration_minutes")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: "missing integer parameter 'duration_minutes'".to_string(),
            })?;
        let day = require_str(self.name(), &params, "preferred_day")?;

        tracing::info!(
            subject = %subject,
            day = %day,
            duration_minutes = duration,
            attendees = attendees.len(),
            "schedule_meeting invoked"
        );
        Ok(ToolOutput::text(
            format!(
                "Meeting '{subject}' scheduled for {day} with {} attendees",
                attendees.len()
            ),
            start.elapsed(),
        ))
    }
}

/// Reports free slots for a day.
pub struct CheckAvailabilityTool;

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn description(&self) -> &str {
        "Check calendar availability for a given day."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "day": {
                    "type": "string",
                    "description": "Day to check"
                }
            },
            "required": ["day"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let day = require_str(self.name(), &params, "day")?;
        Ok(ToolOutput::text(
            format!("Available times on {day}: {}", AVAILABLE_SLOTS.join(", ")),
            start.elapsed(),
        ))
    }
}
