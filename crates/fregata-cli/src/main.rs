//! fregata CLI - run configured database migrations.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use fregata::{Config, MigrateError, MigrationRegistry, Orchestrator, ProgressEvent};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "fregata")]
#[command(about = "Database to database migrations with foreign key preservation")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "fregata.yaml", env = "FREGATA_CONFIG")]
    config: PathBuf,

    /// Output JSON to stdout
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
    /// List configured migrations
    List,

    /// Show the migrators of a migration in execution order
    Show {
        /// Migration name
        migration: String,

        /// Also list before and after tasks
        #[arg(long)]
        with_tasks: bool,
    },

    /// Execute a migration
    Execute {
        /// Migration name
        migration: String,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,

        /// Hide progress bars
        #[arg(long)]
        no_progress: bool,
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

    let handles = config.connection_handles();
    let registry = config.registry(&handles)?;

    let outcome = match &cli.command {
        Commands::List => list(&registry, cli.output_json),
        Commands::Show {
            migration,
            with_tasks,
        } => show(&registry, migration, *with_tasks, cli.output_json),
        Commands::Execute {
            migration,
            yes,
            no_progress,
        } => execute(&registry, migration, *yes, *no_progress, cli.output_json).await,
    };

    for handle in handles.values() {
        handle.close().await;
    }

    outcome
}

fn list(registry: &MigrationRegistry, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        let migrations: Vec<_> = registry
            .names()
            .map(|name| serde_json::json!({ "name": name, "parent": registry.parent(name) }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&migrations)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No migration configured.");
        return Ok(());
    }

    println!("Migrations:");
    for name in registry.names() {
        match registry.parent(name) {
            Some(parent) => println!("  {} (extends {})", name, parent),
            None => println!("  {}", name),
        }
    }
    Ok(())
}

fn show(
    registry: &MigrationRegistry,
    name: &str,
    with_tasks: bool,
    output_json: bool,
) -> Result<(), MigrateError> {
    let context = registry.context(name)?;
    let migration = context.migration();
    let ordered = migration.ordered()?;

    let task_names = |tasks: &[Box<dyn fregata::Task>]| -> Vec<String> {
        tasks.iter().map(|t| t.name().to_string()).collect()
    };

    if output_json {
        let migrators: Vec<_> = ordered
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id(),
                    "depends_on": m.dependencies().unwrap_or_default(),
                    "foreign_keys": m.foreign_keys().is_some(),
                })
            })
            .collect();
        let mut out = serde_json::json!({
            "migration": context.name(),
            "parent": context.parent(),
            "migrators": migrators,
        });
        if with_tasks {
            out["before_tasks"] = serde_json::json!(task_names(migration.before_tasks()));
            out["after_tasks"] = serde_json::json!(task_names(migration.after_tasks()));
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match context.parent() {
        Some(parent) => println!("Migration {} (extends {})", context.name(), parent),
        None => println!("Migration {}", context.name()),
    }

    if with_tasks {
        print_list("Before tasks", &task_names(migration.before_tasks()));
    }

    let migrators: Vec<String> = ordered
        .iter()
        .map(|m| {
            let mut line = m.id().to_string();
            if let Some(deps) = m.dependencies() {
                let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
                line.push_str(&format!(" (after {})", deps.join(", ")));
            }
            if m.foreign_keys().is_some() {
                line.push_str(" [foreign keys]");
            }
            line
        })
        .collect();
    print_list("Migrators", &migrators);

    if with_tasks {
        print_list("After tasks", &task_names(migration.after_tasks()));
    }
    Ok(())
}

fn print_list(title: &str, items: &[String]) {
    println!("{}:", title);
    if items.is_empty() {
        println!("  (none)");
    }
    for (i, item) in items.iter().enumerate() {
        println!("  {}. {}", i + 1, item);
    }
}

async fn execute(
    registry: &MigrationRegistry,
    name: &str,
    yes: bool,
    no_progress: bool,
    output_json: bool,
) -> Result<(), MigrateError> {
    let context = registry.context(name)?;
    // Fail on graph errors before asking anything
    context.migration().ordered()?;

    if !yes && std::io::stdin().is_terminal() {
        let confirmed = Confirm::new()
            .with_prompt(format!("Execute migration {}?", name))
            .default(false)
            .interact()
            .map_err(|e| MigrateError::Io(std::io::Error::other(e.to_string())))?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let cancel = setup_signal_handler();
    let mut orchestrator = Orchestrator::new(context).with_cancellation(cancel);

    let show_progress = !no_progress && !output_json && std::io::stderr().is_terminal();
    let reporter = if show_progress {
        let (tx, rx) = mpsc::unbounded_channel();
        orchestrator = orchestrator.with_progress(tx);
        Some(tokio::spawn(report_progress(rx)))
    } else {
        None
    };

    let result = orchestrator.run().await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    let result = result?;

    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    for message in &result.messages {
        println!("{}", message);
    }
    println!("\nMigration completed!");
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Migrators: {}", result.migrators.len());
    for migrator in &result.migrators {
        println!("    {}: {}", migrator.migrator, migrator.items);
    }
    println!("  Items: {}", result.items_total);
    Ok(())
}

/// Draw one bar per migrator until the orchestrator drops its sender.
async fn report_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let style = ProgressStyle::with_template("{msg:20} [{bar:40}] {pos}/{len} ({per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::TaskStarted { task, .. } => {
                eprintln!("Running {}", task);
            }
            ProgressEvent::TaskFinished { .. } => {}
            ProgressEvent::MigratorStarted { migrator, total } => {
                let bar = match total {
                    Some(total) => ProgressBar::new(total).with_style(style.clone()),
                    None => ProgressBar::new_spinner(),
                };
                bar.set_message(migrator.clone());
                bars.insert(migrator, bar);
            }
            ProgressEvent::MigratorProgress {
                migrator,
                increment,
            } => {
                if let Some(bar) = bars.get(&migrator) {
                    bar.inc(increment);
                }
            }
            ProgressEvent::MigratorFinished { migrator, .. } => {
                if let Some(bar) = bars.remove(&migrator) {
                    bar.finish();
                }
            }
        }
    }

    for bar in bars.into_values() {
        bar.abandon();
    }
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
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel on SIGINT or SIGTERM. The run stops at the next batch boundary.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current batch...", label);
                    token.cancel();
                }
                Err(e) => eprintln!("Failed to install {} handler: {}", label, e),
            }
        });
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
