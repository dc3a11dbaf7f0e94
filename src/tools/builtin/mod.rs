//! Built-in assistant tools. All are side-effect stubs that report what
//! they would have done.

pub mod calendar;
pub mod email;

pub use calendar::{CheckAvailabilityTool, ScheduleMeetingTool};
pub use email::SendEmailTool;
