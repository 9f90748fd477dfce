//! Per-query processing
//!
//! - [`stage`]: the resumable stage sequence run for each query
//! - [`tools`]: external tool command lines and the runner that executes them
//! - [`retry`]: bounded retry around flaky invocations

pub mod retry;
pub mod stage;
pub mod tools;

pub use retry::RetryPolicy;
pub use stage::{Pipeline, Stage};
pub use tools::{ProcessRunner, Tool, ToolExit, ToolInvocation, ToolRunner};
