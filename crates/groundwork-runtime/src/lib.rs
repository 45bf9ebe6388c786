//! Process execution and external tool integration for Groundwork.
//!
//! This crate implements the execution layer: the `CommandRunner` trait with a
//! real process runner and a scripted mock, the `gcloud`-backed `CloudIdentity`
//! client, the `AuthGate` readiness polling for the container daemon, the
//! interactive identity, and application-default credentials, and the
//! `ProvisionRunner` that drives `terraform` through its init escalation ladder.

pub mod auth;
pub mod command;
pub mod identity;
pub mod mock;
pub mod provision;

pub use auth::{poll_until_ready, AuthGate, AuthPolicy, ReadinessCheck};
pub use command::{CommandRunner, ProcessRunner};
pub use identity::{CloudIdentity, Gcloud};
pub use mock::{Invocation, Reply, ScriptedRunner};
pub use provision::{default_init_ladder, EscalationTier, InitReport, ProvisionOptions, ProvisionRunner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("'{command}' failed ({status}): {}", .output.trim())]
    ExecFailed {
        command: String,
        status: String,
        output: String,
    },
    #[error("{check} not ready after {timeout_secs}s")]
    NotReady {
        check: ReadinessCheck,
        timeout_secs: u64,
    },
    #[error("{check} remediation failed: {reason}")]
    RemediationFailed {
        check: ReadinessCheck,
        reason: String,
    },
    #[error("cloud identity error: {0}")]
    Identity(String),
    #[error("init escalation ladder has no tiers")]
    EmptyLadder,
}
