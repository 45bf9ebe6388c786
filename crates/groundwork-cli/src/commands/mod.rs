pub mod check_auth;
pub mod completions;
pub mod resolve;
pub mod run;
pub mod scaffold;

use crate::Overrides;
use groundwork_schema::{load_config, WorkflowConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STAGE_FAILED: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_level(level: &str) -> String {
    use console::Style;
    match level {
        "ERROR" => Style::new().red().bold().apply_to(level).to_string(),
        "WARN" => Style::new().yellow().apply_to(level).to_string(),
        "INFO" => Style::new().green().apply_to(level).to_string(),
        "DEBUG" | "TRACE" => Style::new().dim().apply_to(level).to_string(),
        other => other.to_owned(),
    }
}

/// Split a `KEY=VALUE` override.
pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!(
            "config error: invalid --var '{raw}', expected KEY=VALUE"
        )),
    }
}

/// Load the config file if it exists, otherwise build one from `--project`;
/// then apply command-line overrides.
pub fn load_settings(config_path: &Path, overrides: &Overrides) -> Result<WorkflowConfig, String> {
    let mut config = if config_path.is_file() {
        load_config(config_path).map_err(|e| format!("config error: {e}"))?
    } else if let Some(project) = &overrides.project {
        WorkflowConfig::new(project, ".")
    } else {
        return Err(format!(
            "config error: {} not found and no --project given",
            config_path.display()
        ));
    };

    if let Some(project) = &overrides.project {
        config.project_id.clone_from(project);
    }
    if let Some(dir) = &overrides.dir {
        config.terraform_dir.clone_from(dir);
    }
    for raw in &overrides.vars {
        let (key, value) = parse_var(raw)?;
        config.vars.insert(key, value);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"bucket": "acme-tfstate"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"bucket\""));
        assert!(result.contains("\"acme-tfstate\""));
    }

    #[test]
    fn colorize_level_keeps_text() {
        for level in ["ERROR", "WARN", "INFO", "DEBUG"] {
            assert!(colorize_level(level).contains(level));
        }
        assert_eq!(colorize_level("other"), "other");
    }

    #[test]
    fn parse_var_splits_on_first_equals() {
        assert_eq!(
            parse_var("labels=a=b").unwrap(),
            ("labels".to_owned(), "a=b".to_owned())
        );
        assert_eq!(parse_var("empty=").unwrap().1, "");
        assert!(parse_var("novalue").unwrap_err().starts_with("config error:"));
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn settings_without_file_need_project() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("groundwork.toml");
        let err = load_settings(&missing, &Overrides::default()).unwrap_err();
        assert!(err.starts_with("config error:"));

        let overrides = Overrides {
            project: Some("acme".to_owned()),
            dir: Some(dir.path().to_path_buf()),
            vars: vec!["env=dev".to_owned()],
        };
        let config = load_settings(&missing, &overrides).unwrap();
        assert_eq!(config.project_id, "acme");
        assert_eq!(config.terraform_dir, dir.path());
        assert_eq!(config.vars["env"], "dev");
    }

    #[test]
    fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groundwork.toml");
        fs::write(&path, "project_id = \"from-file\"\n[vars]\nenv = \"prod\"\n").unwrap();

        let config = load_settings(&path, &Overrides::default()).unwrap();
        assert_eq!(config.project_id, "from-file");
        assert_eq!(config.terraform_dir, dir.path().join("."));

        let overrides = Overrides {
            project: Some("override".to_owned()),
            vars: vec!["env=dev".to_owned()],
            ..Overrides::default()
        };
        let config = load_settings(&path, &overrides).unwrap();
        assert_eq!(config.project_id, "override");
        assert_eq!(config.vars["env"], "dev");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_STAGE_FAILED);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
