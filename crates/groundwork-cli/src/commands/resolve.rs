use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use groundwork_schema::{load_config, ConfigResolver, ConfigSource, VariableQuery};
use std::path::{Path, PathBuf};

pub fn run(
    config_path: &Path,
    name: &str,
    sources: &[ConfigSource],
    dir: Option<PathBuf>,
    json: bool,
) -> Result<u8, String> {
    // The config file is optional here; it only supplies defaults.
    let config = if config_path.is_file() {
        Some(load_config(config_path).map_err(|e| format!("config error: {e}"))?)
    } else {
        None
    };
    let dir = dir
        .or_else(|| config.as_ref().map(|c| c.terraform_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("."));
    let mut resolver = ConfigResolver::new(&dir);
    if let Some(config) = &config {
        resolver = resolver.with_backend_type(&config.backend_type);
    }

    let query = VariableQuery::new(name).with_sources(sources);
    let resolved = resolver.resolve_query(&query);

    if json {
        let payload = serde_json::json!({
            "name": name,
            "dir": dir,
            "sources": query.sources,
            "resolved": resolved,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match &resolved {
            Some(value) => println!(
                "{name} = {} (from {}, {})",
                value.value,
                value.source,
                value.origin.display()
            ),
            None => eprintln!("{name} is not defined in {}", dir.display()),
        }
    }

    Ok(if resolved.is_some() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
