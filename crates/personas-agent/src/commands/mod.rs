//! Command implementations for personas-agent.

pub mod check;
pub mod run;
