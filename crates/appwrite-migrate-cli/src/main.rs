//! appwrite-migrate CLI - copy resources between Appwrite projects.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use appwrite_migrate::{
    Config, FileCheckpointStore, MigrateError, MigrationPlan, MigrationResult, Orchestrator,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "appwrite-migrate")]
#[command(about = "Migrate databases, storage, functions, users, and teams between Appwrite projects")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the checkpoint file backing resume capability
    #[arg(long, default_value = "checkpoints.json")]
    checkpoint_file: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the source project and print the migration plan as JSON
    Plan {
        /// Write the plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start a new migration
    Run {
        /// Use an edited plan file instead of scanning fresh
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Resume a previously interrupted migration
    Resume {
        /// Use an edited plan file instead of scanning fresh
        #[arg(long)]
        plan: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let checkpoints = Arc::new(FileCheckpointStore::open(&cli.checkpoint_file)?);
    let orchestrator = Orchestrator::from_config(&config, checkpoints)?;

    match cli.command {
        Commands::Plan { output } => {
            let plan = orchestrator.scan(&config.options).await?;
            let json = serde_json::to_string_pretty(&plan)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!(
                        "Plan with {} resources written to {:?}; edit it and pass --plan to run",
                        plan.enabled_count(),
                        path
                    );
                }
                None => println!("{}", json),
            }
        }

        Commands::Run { plan } => {
            let plan = load_or_scan_plan(&orchestrator, &config, plan).await?;
            if orchestrator.is_resumable()? {
                info!("Discarding checkpoints of a previous incomplete run; use `resume` to continue it instead");
            }
            setup_signal_handler(orchestrator.cancel_token());

            let result = orchestrator.run(&plan, false).await?;
            print_result(&result, cli.output_json)?;
        }

        Commands::Resume { plan } => {
            if !orchestrator.is_resumable()? {
                return Err(MigrateError::Config(format!(
                    "no checkpoints for this migration pair in {:?}",
                    cli.checkpoint_file
                )));
            }
            let plan = load_or_scan_plan(&orchestrator, &config, plan).await?;
            setup_signal_handler(orchestrator.cancel_token());

            info!("Resuming from stored checkpoints");
            let result = orchestrator.run(&plan, true).await?;
            print_result(&result, cli.output_json)?;
        }
    }

    Ok(())
}

async fn load_or_scan_plan(
    orchestrator: &Orchestrator,
    config: &Config,
    path: Option<PathBuf>,
) -> Result<MigrationPlan, MigrateError> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let plan: MigrationPlan = serde_json::from_str(&content)?;
            info!(
                "Loaded plan from {:?} ({} enabled resources)",
                path,
                plan.enabled_count()
            );
            Ok(plan)
        }
        None => orchestrator.scan(&config.options).await,
    }
}

fn print_result(result: &MigrationResult, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    println!("\nMigration completed!");
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {}s", result.duration_secs);
    println!(
        "  File transfer: {}",
        if result.used_cloud_worker {
            "cloud worker"
        } else {
            "local buffer"
        }
    );
    for (kind, counts) in &result.summary.kinds {
        println!(
            "  {}: {} created, {} skipped, {} failed",
            kind, counts.created, counts.skipped, counts.failed
        );
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT (Ctrl-C) or SIGTERM; the executor finishes its
/// in-flight batch and exits with checkpoints in place.
#[cfg(unix)]
fn setup_signal_handler(token: CancellationToken) {
    let token_int = token.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current batch...");
        token_int.cancel();
    });

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current batch...");
        token.cancel();
    });
}

#[cfg(not(unix))]
fn setup_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
        token.cancel();
    });
}
