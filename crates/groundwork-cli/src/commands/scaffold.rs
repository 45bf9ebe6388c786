use super::{json_pretty, load_settings, EXIT_SUCCESS};
use crate::Overrides;
use groundwork_schema::{declaration_files, default_bucket_name, write_default_files};
use std::path::Path;

pub fn run(
    config_path: &Path,
    overrides: &Overrides,
    force: bool,
    json: bool,
) -> Result<u8, String> {
    let config = load_settings(config_path, overrides)?;
    let dir = &config.terraform_dir;

    let existing = declaration_files(dir);
    let written = if existing.is_empty() || force {
        write_default_files(dir, &config.project_id, &config.region)
            .map_err(|e| format!("failed to write default files: {e}"))?
    } else {
        Vec::new()
    };

    if json {
        let payload = serde_json::json!({
            "dir": dir,
            "written": written,
            "existing": existing,
            "bucket": default_bucket_name(&config.project_id),
        });
        println!("{}", json_pretty(&payload)?);
    } else if written.is_empty() {
        println!(
            "{} already has {} .tf file(s); use --force to overwrite",
            dir.display(),
            existing.len()
        );
    } else {
        for path in &written {
            println!("wrote {}", path.display());
        }
        println!(
            "state bucket: {}",
            default_bucket_name(&config.project_id)
        );
    }
    Ok(EXIT_SUCCESS)
}
