//! ModelSync command-line tool.
//!
//! Provides subcommands for generating and validating configuration files
//! and for running scripted client sessions against an in-process branch
//! coordinator.

mod session;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

use modelsync_core::config::AppConfig;
use modelsync_core::BranchCoordinator;

use crate::session::StepOutcome;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// ModelSync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "modelsync",
    version,
    about = "Run and inspect branch-based model synchronization sessions"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./modelsync.toml")]
    config: PathBuf,

    /// Override the configured log level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./modelsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Execute a JSON session script against a fresh coordinator.
    Run {
        /// Path to the session script.
        #[arg(short, long)]
        script: PathBuf,

        /// Print live operations published on this branch while the script runs.
        #[arg(short, long)]
        watch: Option<String>,

        /// Print the final operation log as JSON.
        #[arg(long)]
        snapshot: bool,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&cli.config)
        }
        Commands::Run {
            script,
            watch,
            snapshot,
        } => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.log.level));
            cmd_run(&config, &script, watch.as_deref(), snapshot).await
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        eprintln!(
            "Note: {} not found, using default configuration",
            path.display()
        );
        return Ok(AppConfig::default());
    }
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# ModelSync Configuration
# Every section is optional; omitted values take the defaults shown here.

[branches]
primary = "public"

[hub]
# Live operations buffered per branch before slow listeners start losing them.
channel_capacity = 256

[log]
level = "info"

# Element types pre-populate declared properties when an element is created.
[[element_types]]
name = "Task"

  [[element_types.properties]]
  name = "status"
  kind = "primitive"
  collection = "scalar"

  [[element_types.properties]]
  name = "assignee"
  kind = "reference"
  collection = "scalar"
  reference_type = "Person"

  [[element_types.properties]]
  name = "checklist"
  collection = "list"

[[element_types]]
name = "Person"

  [[element_types.properties]]
  name = "tags"
  collection = "set"

  [[element_types.properties]]
  name = "contacts"
  collection = "map"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Declare your element types in the config file");
    println!(
        "  2. Validate with: modelsync validate --config {}",
        output.display()
    );
    println!(
        "  3. Run a session: modelsync run --config {} --script session.json",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Primary branch  : {}", config.branches.primary);
    println!("  Channel capacity: {}", config.hub.channel_capacity);
    println!("  Log level       : {}", config.log.level);
    println!("  Element types   : {}", config.element_types.len());
    for element_type in &config.element_types {
        let properties: Vec<String> = element_type
            .properties
            .iter()
            .map(|p| format!("{} ({:?}/{:?})", p.name, p.kind, p.collection).to_lowercase())
            .collect();
        println!("    - {}: {}", element_type.name, properties.join(", "));
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_run(
    config: &AppConfig,
    script: &Path,
    watch: Option<&str>,
    snapshot: bool,
) -> Result<()> {
    let steps = session::load_script(script)?;
    let coordinator = BranchCoordinator::new(config);
    info!(steps = steps.len(), script = %script.display(), "running session");

    let watcher = match watch {
        Some(branch) => {
            let (history, mut subscription) = coordinator
                .subscribe(branch)
                .with_context(|| format!("failed to watch branch '{branch}'"))?;
            println!("[watch {}] {} operation(s) in history", branch, history.len());
            Some(tokio::spawn(async move {
                while let Some(op) = subscription.recv().await {
                    println!(
                        "[watch {}] {} {} on '{}'",
                        subscription.branch(),
                        op.id,
                        op.operation_type(),
                        op.element_id
                    );
                }
            }))
        }
        None => None,
    };

    let result = session::execute(&coordinator, steps);
    let log = coordinator.snapshot();

    // Closing the coordinator closes every live channel, ending the watcher.
    drop(coordinator);
    if let Some(handle) = watcher {
        handle.await.context("watch task failed")?;
    }

    let outcomes = result?;
    print_outcomes(&outcomes);

    if snapshot {
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(&log).context("failed to render snapshot")?
        );
    }

    Ok(())
}

fn print_outcomes(outcomes: &[StepOutcome]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Action", "Branch", "Ops", "Result"]);

    for (index, outcome) in outcomes.iter().enumerate() {
        let result = if outcome.rejected {
            Cell::new(&outcome.detail).fg(comfy_table::Color::Yellow)
        } else {
            Cell::new(&outcome.detail)
        };
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(outcome.action),
            Cell::new(&outcome.branch),
            Cell::new(outcome.operations),
            result,
        ]);
    }

    println!("{table}");
    println!("{} step(s) executed", outcomes.len());
}
