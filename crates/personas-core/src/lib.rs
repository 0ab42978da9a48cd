//! personas-core - Core library for Canvas Personas
//!
//! Watches a shared canvas and answers questions with a panel of simulated
//! personas:
//!
//! - **stream**: reconnecting reader for the canvas event feed
//! - **classify**: maps feed records to workflow triggers
//! - **debounce**: coalesces rapid edits to a question note
//! - **guard**: one running workflow per canvas entity
//! - **workflow**: the staged question workflow and its fan-out
//! - **dispatch**: trigger routing and pipeline wiring
//! - **surface** / **generation**: collaborator traits and HTTP clients

pub mod classify;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod guard;
pub mod helper;
#[cfg(feature = "client")]
mod http;
pub mod layout;
pub mod persona;
pub mod retry;
pub mod stream;
pub mod surface;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::AgentConfig;
pub use dispatch::Agent;
pub use error::{Error, Result};
pub use workflow::{Orchestrator, Outcome};
