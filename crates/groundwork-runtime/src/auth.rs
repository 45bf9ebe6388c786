use crate::command::CommandRunner;
use crate::identity::CloudIdentity;
use crate::RuntimeError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Call `probe` until it returns true or `timeout` elapses, sleeping
/// `interval` between attempts.
///
/// The probe always runs at least once. There is no way to interrupt the
/// wait; the call returns at most `interval` (plus one probe) after the deadline.
pub fn poll_until_ready(
    mut probe: impl FnMut() -> bool,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let start = Instant::now();
    loop {
        if probe() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessCheck {
    /// The container daemon answers `docker info`.
    Daemon,
    /// An interactive account is active and can mint an access token.
    Identity,
    /// Application-default credentials can mint an access token.
    ApplicationDefault,
}

impl fmt::Display for ReadinessCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadinessCheck::Daemon => "container daemon",
            ReadinessCheck::Identity => "cloud identity",
            ReadinessCheck::ApplicationDefault => "application default credentials",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub require_daemon: bool,
    pub require_identity: bool,
    pub require_adc: bool,
    /// When set, the active project is switched to this one if it differs.
    pub expected_project: Option<String>,
    pub timeout: Duration,
    pub interval: Duration,
    pub daemon_launch: Vec<String>,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            require_daemon: false,
            require_identity: true,
            require_adc: true,
            expected_project: None,
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            daemon_launch: Vec::new(),
        }
    }
}

/// Gate that blocks until the external tooling is ready to be used.
pub struct AuthGate {
    runner: Arc<dyn CommandRunner>,
    identity: Arc<dyn CloudIdentity>,
    policy: AuthPolicy,
}

impl AuthGate {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        identity: Arc<dyn CloudIdentity>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            runner,
            identity,
            policy,
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Required checks in execution order.
    pub fn required_checks(&self) -> Vec<ReadinessCheck> {
        let mut checks = Vec::new();
        if self.policy.require_daemon {
            checks.push(ReadinessCheck::Daemon);
        }
        if self.policy.require_identity {
            checks.push(ReadinessCheck::Identity);
        }
        if self.policy.require_adc {
            checks.push(ReadinessCheck::ApplicationDefault);
        }
        checks
    }

    /// One probe of `check`, with no remediation.
    pub fn probe(&self, check: ReadinessCheck) -> bool {
        match check {
            ReadinessCheck::Daemon => self.runner.execute("docker", &["info"], None).is_ok(),
            ReadinessCheck::Identity => {
                let active = self
                    .identity
                    .active_accounts()
                    .is_ok_and(|accounts| !accounts.is_empty());
                if !active {
                    return false;
                }
                match self.identity.access_token() {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("gcp token invalid or expired: {e}");
                        false
                    }
                }
            }
            ReadinessCheck::ApplicationDefault => match self.identity.adc_token() {
                Ok(_) => true,
                Err(e) => {
                    warn!("application default credentials invalid or missing: {e}");
                    false
                }
            },
        }
    }

    /// Probe `check`; if it is not ready, remediate and poll until the deadline.
    pub fn ensure(&self, check: ReadinessCheck) -> Result<(), RuntimeError> {
        info!(%check, "checking readiness");
        if self.probe(check) {
            info!(%check, "ready");
            return Ok(());
        }

        warn!(%check, "not ready, attempting remediation");
        self.remediate(check)
            .map_err(|e| RuntimeError::RemediationFailed {
                check,
                reason: e.to_string(),
            })?;

        debug!(
            %check,
            timeout_secs = self.policy.timeout.as_secs(),
            "waiting for readiness"
        );
        if poll_until_ready(
            || self.probe(check),
            self.policy.timeout,
            self.policy.interval,
        ) {
            info!(%check, "ready after remediation");
            Ok(())
        } else {
            Err(RuntimeError::NotReady {
                check,
                timeout_secs: self.policy.timeout.as_secs(),
            })
        }
    }

    fn remediate(&self, check: ReadinessCheck) -> Result<(), RuntimeError> {
        match check {
            ReadinessCheck::Daemon => match self.policy.daemon_launch.split_first() {
                Some((program, args)) => {
                    info!(program = %program, "launching container daemon");
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    self.runner.execute(program, &args, None).map(drop)
                }
                None => {
                    debug!("no daemon launch command configured, waiting only");
                    Ok(())
                }
            },
            ReadinessCheck::Identity => self.identity.login(),
            ReadinessCheck::ApplicationDefault => self.identity.adc_login(),
        }
    }

    /// Make `expected` the active project if it is not already.
    pub fn align_project(&self, expected: &str) -> Result<(), RuntimeError> {
        let current = self.identity.current_project()?;
        info!(current = %current, expected, "checking active project");
        if current == expected {
            info!("correct gcp project already active");
            return Ok(());
        }
        warn!("active project does not match expected project");
        self.identity.set_project(expected)?;
        info!("project switched successfully");
        Ok(())
    }

    /// Run every required check in order: daemon, identity, project alignment, ADC.
    /// Stops at the first check that does not become ready.
    pub fn run(&self) -> Result<(), RuntimeError> {
        for check in self.required_checks() {
            self.ensure(check)?;
            if check == ReadinessCheck::Identity {
                if let Some(project) = &self.policy.expected_project {
                    self.align_project(project)?;
                }
            }
        }
        if !self.policy.require_identity {
            if let Some(project) = &self.policy.expected_project {
                self.align_project(project)?;
            }
        }
        info!("environment ready");
        Ok(())
    }
}
