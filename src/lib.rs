//! Email triage — an adaptive ignore / notify / respond agent.
//!
//! Learns from human corrections two ways: every confirmed decision becomes a
//! retrievable example, and disagreements grow the per-user rule set.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod samples;
pub mod tools;
