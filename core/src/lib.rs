pub mod cli;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod options;
pub mod types;

// Re-export main types
pub use types::*;

pub use engine::{dsl_workflow, Engine, EngineBuilder};
pub use errors::WorkflowError;
pub use executor::{
    handler_fn, ActivityCall, ActivityError, ActivityExecutor, ActivityHandler, ActivityRegistry,
    LocalExecutor,
};
pub use options::{ActivityOptions, ActivityOptionsRegistry, RetryPolicy};
