use groundwork_remote::{GcsClient, RemoteError, StorageClient, TokenProvider};
use groundwork_runtime::{CloudIdentity, CommandRunner, Gcloud, ProcessRunner};
use groundwork_schema::WorkflowConfig;
use std::sync::Arc;

/// External collaborators of a workflow run.
#[derive(Clone)]
pub struct Services {
    pub runner: Arc<dyn CommandRunner>,
    pub identity: Arc<dyn CloudIdentity>,
    pub storage: Arc<dyn StorageClient>,
}

impl Services {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        identity: Arc<dyn CloudIdentity>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            runner,
            identity,
            storage,
        }
    }

    /// Real processes, the `gcloud` CLI, and the storage JSON API at
    /// `config.storage.endpoint` authenticated with application-default credentials.
    pub fn system(config: &WorkflowConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let identity: Arc<dyn CloudIdentity> = Arc::new(Gcloud::new(Arc::clone(&runner)));
        let tokens = AdcToken::new(Arc::clone(&identity));
        let storage = Arc::new(GcsClient::new(&config.storage.endpoint, Box::new(tokens)));
        Self::new(runner, identity, storage)
    }
}

/// Bearer token minted from application-default credentials on every request.
pub struct AdcToken {
    identity: Arc<dyn CloudIdentity>,
}

impl AdcToken {
    pub fn new(identity: Arc<dyn CloudIdentity>) -> Self {
        Self { identity }
    }
}

impl TokenProvider for AdcToken {
    fn token(&self) -> Result<String, RemoteError> {
        self.identity
            .adc_token()
            .map_err(|e| RemoteError::Token(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundwork_runtime::ScriptedRunner;

    #[test]
    fn adc_token_uses_application_default_credentials() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.succeed("gcloud", &["application-default", "print-access-token"], "adc-tok\n");
        let tokens = AdcToken::new(Arc::new(Gcloud::new(runner.clone())));
        assert_eq!(tokens.token().unwrap(), "adc-tok");
    }

    #[test]
    fn adc_failure_is_token_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("gcloud", &["application-default"], "reauth required");
        let tokens = AdcToken::new(Arc::new(Gcloud::new(runner)));
        assert!(matches!(tokens.token(), Err(RemoteError::Token(_))));
    }
}
