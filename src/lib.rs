//! autotest - automated hardware validation test station
//!
//! This library loads declarative test plans and executes them step by step
//! against a device under test through external measurement tools.

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod plan;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{RunContext, RunController, RunSummary};
pub use plan::{TestMode, TestPlan, TestStep};
