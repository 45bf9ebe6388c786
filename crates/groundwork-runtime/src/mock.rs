use crate::command::{command_line, CommandRunner};
use crate::RuntimeError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A recorded call to [`ScriptedRunner::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

/// Scripted result of a matching invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Fail(String),
}

struct Rule {
    program: String,
    needles: Vec<String>,
    replies: VecDeque<Reply>,
}

impl Rule {
    fn matches(&self, program: &str, args: &[&str]) -> bool {
        self.program == program && self.needles.iter().all(|n| args.contains(&n.as_str()))
    }

    /// Replies are consumed in order; the last one repeats.
    fn next_reply(&mut self) -> Reply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or(Reply::Ok(String::new()))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or(Reply::Ok(String::new()))
        }
    }
}

/// Command runner for tests: records every invocation and answers from
/// scripted rules. Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `program` invocations whose args contain every needle. Later
    /// rules take precedence over earlier ones.
    pub fn on(&self, program: &str, needles: &[&str], replies: impl IntoIterator<Item = Reply>) {
        let rule = Rule {
            program: program.to_owned(),
            needles: needles.iter().map(|&n| n.to_owned()).collect(),
            replies: replies.into_iter().collect(),
        };
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(rule);
        }
    }

    pub fn succeed(&self, program: &str, needles: &[&str], output: &str) {
        self.on(program, needles, [Reply::Ok(output.to_owned())]);
    }

    pub fn fail(&self, program: &str, needles: &[&str], output: &str) {
        self.on(program, needles, [Reply::Fail(output.to_owned())]);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Invocations of `program` whose args contain every needle.
    pub fn matching(&self, program: &str, needles: &[&str]) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program == program && needles.iter().all(|n| i.has_arg(n)))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
    ) -> Result<String, RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))?
            .push(Invocation {
                program: program.to_owned(),
                args: args.iter().map(|&a| a.to_owned()).collect(),
                working_dir: working_dir.map(Path::to_path_buf),
            });

        let reply = {
            let mut rules = self
                .rules
                .lock()
                .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))?;
            rules
                .iter_mut()
                .rev()
                .find(|r| r.matches(program, args))
                .map_or(Reply::Ok(String::new()), Rule::next_reply)
        };

        match reply {
            Reply::Ok(out) => Ok(out),
            Reply::Fail(out) => Err(RuntimeError::ExecFailed {
                command: command_line(program, args),
                status: "exit code 1".to_owned(),
                output: out,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_calls_succeed_and_are_recorded() {
        let runner = ScriptedRunner::new();
        let out = runner
            .execute("docker", &["info"], Some(Path::new("/tmp")))
            .unwrap();
        assert!(out.is_empty());
        let calls = runner.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "docker");
        assert_eq!(calls[0].working_dir.as_deref(), Some(Path::new("/tmp")));
    }

    #[test]
    fn replies_are_consumed_then_last_repeats() {
        let runner = ScriptedRunner::new();
        runner.on(
            "gcloud",
            &["print-access-token"],
            [Reply::Fail("expired".to_owned()), Reply::Ok("tok".to_owned())],
        );
        assert!(runner
            .execute("gcloud", &["auth", "print-access-token"], None)
            .is_err());
        for _ in 0..3 {
            assert_eq!(
                runner
                    .execute("gcloud", &["auth", "print-access-token"], None)
                    .unwrap(),
                "tok"
            );
        }
    }

    #[test]
    fn later_rules_win() {
        let runner = ScriptedRunner::new();
        runner.fail("terraform", &["init"], "nope");
        runner.succeed("terraform", &["init", "-reconfigure"], "ok");
        assert!(runner.execute("terraform", &["init"], None).is_err());
        assert!(runner
            .execute("terraform", &["init", "-reconfigure"], None)
            .is_ok());
        assert_eq!(runner.matching("terraform", &["init"]).len(), 2);
        assert_eq!(runner.matching("terraform", &["-reconfigure"]).len(), 1);
    }
}
