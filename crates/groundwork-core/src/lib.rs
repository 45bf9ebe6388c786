//! Workflow orchestration for Groundwork.
//!
//! This crate ties together declaration-file resolution, readiness checks,
//! remote-state bucket management, and the Terraform runner into the
//! `Workflow`: a strictly ordered sequence of stages that returns a
//! `WorkflowOutcome` instead of exiting. It also provides the per-run
//! `LogSink` that persists every event and fans it out to bounded observers.

pub mod logsink;
pub mod outcome;
pub mod services;
pub mod workflow;

pub use logsink::{LogRecord, LogSink, SinkLayer, DEFAULT_OBSERVER_CAPACITY};
pub use outcome::{RunStatus, Stage, TeardownReport, WorkflowOutcome};
pub use services::{AdcToken, Services};
pub use workflow::{auth_policy, Workflow};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Schema(#[from] groundwork_schema::SchemaError),
    #[error("runtime error: {0}")]
    Runtime(#[from] groundwork_runtime::RuntimeError),
    #[error("{0}")]
    Bucket(#[from] groundwork_remote::BucketError),
    #[error("variable '{name}' is not defined in any source under {}", dir.display())]
    UnresolvedVariable { name: String, dir: PathBuf },
}
