//! EnMS voice daemon library - exposes modules for testing.

pub mod config;
pub mod context;
pub mod generative;
pub mod metrics;
pub mod orchestrator;
pub mod pattern_router;
pub mod pipeline;
pub mod roster;
pub mod session;
pub mod temporal;
pub mod validator;
pub mod vocabulary;

pub use pipeline::{Pipeline, TurnOutcome};
