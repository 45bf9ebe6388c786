use crate::RuntimeError;
use std::path::Path;
use std::process::Command;
use tracing::{debug, error};

/// Synchronous execution of external programs.
///
/// Implementations return the combined stdout/stderr of the program. A
/// non-zero exit status is an error carrying that output.
pub trait CommandRunner: Send + Sync {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
    ) -> Result<String, RuntimeError>;
}

/// Runs programs as child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
    ) -> Result<String, RuntimeError> {
        debug!(?args, "executing command: {program}");
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|source| RuntimeError::Spawn {
            program: program.to_owned(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            return Ok(combined);
        }

        let status = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_owned(),
        };
        error!(command = program, %status, output = %combined.trim(), "command execution failed");
        Err(RuntimeError::ExecFailed {
            command: command_line(program, args),
            status,
            output: combined,
        })
    }
}

pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
