use super::{json_pretty, load_settings, spin_fail, spin_ok, spinner, EXIT_FAILURE, EXIT_SUCCESS};
use crate::Overrides;
use groundwork_core::{auth_policy, Services, Workflow};
use std::path::Path;

pub fn run(config_path: &Path, overrides: &Overrides, json: bool) -> Result<u8, String> {
    let config = load_settings(config_path, overrides)?;
    let policy = auth_policy(&config);
    let services = Services::system(&config);
    let workflow = Workflow::new(config, &services);

    let pb = if json {
        None
    } else {
        Some(spinner("checking readiness..."))
    };
    let result = workflow.check_auth();

    if json {
        let payload = serde_json::json!({
            "project": workflow.config().project_id,
            "require_daemon": policy.require_daemon,
            "require_identity": policy.require_identity,
            "require_adc": policy.require_adc,
            "ready": result.is_ok(),
            "error": result.as_ref().err().map(ToString::to_string),
        });
        println!("{}", json_pretty(&payload)?);
    } else if let Some(pb) = &pb {
        match &result {
            Ok(()) => spin_ok(pb, "environment ready"),
            Err(e) => {
                spin_fail(pb, "environment not ready");
                eprintln!("{e}");
            }
        }
    }

    Ok(if result.is_ok() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
