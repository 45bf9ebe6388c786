mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE};
use groundwork_schema::{ConfigSource, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "groundwork",
    version,
    about = "Terraform workflow runner with managed remote-state storage"
)]
struct Cli {
    /// Path to the workflow config file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Values that override the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Cloud project ID (required when there is no config file).
    #[arg(long)]
    pub project: Option<String>,
    /// Terraform working directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Terraform variable override, repeatable (KEY=VALUE).
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full workflow: readiness checks, state bucket, init, apply.
    Run {
        /// Destroy the infrastructure and delete the state bucket instead of applying.
        #[arg(long, default_value_t = false)]
        destroy: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Resolve a backend variable from the Terraform working directory.
    Resolve {
        /// Variable name, e.g. "bucket".
        name: String,
        /// Sources to search, in order (declaration-files, backend-files, persisted-state).
        #[arg(long = "source", value_name = "SOURCE")]
        sources: Vec<ConfigSource>,
        /// Terraform working directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Generate the default Terraform files if the directory has none.
    Scaffold {
        /// Overwrite existing declaration files.
        #[arg(long, default_value_t = false)]
        force: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Check (and remediate) container daemon, cloud identity, and credentials.
    CheckAuth {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GROUNDWORK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;

    let result = match cli.command {
        Commands::Run { destroy, overrides } => {
            commands::run::run(&cli.config, &overrides, destroy, json_output)
        }
        Commands::Resolve { name, sources, dir } => {
            commands::resolve::run(&cli.config, &name, &sources, dir, json_output)
        }
        Commands::Scaffold { force, overrides } => {
            commands::scaffold::run(&cli.config, &overrides, force, json_output)
        }
        Commands::CheckAuth { overrides } => {
            commands::check_auth::run(&cli.config, &overrides, json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
