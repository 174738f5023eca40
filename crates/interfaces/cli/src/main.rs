mod daemon;
mod memory_cmds;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use continuum_config::AppConfig;
use continuum_runtime::{ContinuumRuntime, InvocationRequest};

#[derive(Debug, Parser)]
#[command(
    name = "continuum",
    version,
    about = "A scheduled, memory-consolidating agent runtime"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP surface until Ctrl-C.
    Serve,
    /// Run one manual invocation and print the record.
    Invoke {
        #[arg(long, default_value = "Manual invocation")]
        purpose: String,
        /// Extra context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },
    /// Fire an event and run every trigger listening for it.
    Event {
        name: String,
        /// Event payload as JSON.
        #[arg(long)]
        data: Option<String>,
    },
    Status,
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    Triggers {
        #[command(subcommand)]
        command: TriggerCommands,
    },
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Memories in the identity tier.
    Identity,
    /// Memories whose depth lies in `[min, max]`, deepest first.
    Depth {
        #[arg(long)]
        min: f64,
        #[arg(long, default_value_t = 1.0)]
        max: f64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Memories waiting for consolidation.
    Pending,
    /// Read one memory and count the access.
    Recall { id: String },
    /// Set a memory's depth and mark it consolidated.
    Promote { id: String, depth: f64 },
    /// Count memories per tier.
    Tiers,
}

#[derive(Debug, Subcommand)]
enum TriggerCommands {
    List,
    Enable { id: String },
    Disable { id: String },
}

fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if config.telemetry.log_dir.trim().is_empty() {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, "continuum.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Some(guard)
}

fn parse_json_object(raw: Option<&str>, what: &str) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw).with_context(|| format!("{what} is not JSON"))? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{what} must be a JSON object"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    let _guard = init_tracing(&config);
    if !Path::new(&cli.config).exists() {
        tracing::info!(path = %cli.config, "no config file; using defaults");
    }

    let runtime = ContinuumRuntime::from_config(config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => daemon::run_serve_mode(runtime).await?,
        Commands::Invoke { purpose, context } => {
            let context = parse_json_object(context.as_deref(), "--context")?;
            let record = runtime
                .invoke(InvocationRequest::manual(purpose).with_context(context))
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Event { name, data } => {
            let data = match data.as_deref() {
                Some(raw) => serde_json::from_str(raw).context("--data is not JSON")?,
                None => Value::Null,
            };
            let records = runtime.scheduler().fire_event(&name, data).await?;
            println!("event `{name}` ran {} invocation(s)", records.len());
            for record in records {
                println!("  {} {}", record.id, record.request.purpose);
            }
        }
        Commands::Status => {
            let status = runtime.status().await?;
            daemon::print_status(&status);
        }
        Commands::Memory { command } => match command {
            MemoryCommands::Recent { limit } => memory_cmds::run_recent(&runtime, limit.max(1)).await?,
            MemoryCommands::Identity => memory_cmds::run_identity(&runtime).await?,
            MemoryCommands::Depth { min, max, limit } => {
                memory_cmds::run_depth(&runtime, min, max, limit.max(1)).await?
            }
            MemoryCommands::Pending => memory_cmds::run_pending(&runtime).await?,
            MemoryCommands::Recall { id } => memory_cmds::run_recall(&runtime, &id).await?,
            MemoryCommands::Promote { id, depth } => memory_cmds::run_promote(&runtime, &id, depth).await?,
            MemoryCommands::Tiers => memory_cmds::run_tiers(&runtime).await?,
        },
        Commands::Triggers { command } => match command {
            TriggerCommands::List => daemon::print_triggers(&runtime).await?,
            TriggerCommands::Enable { id } => {
                let trigger = runtime.triggers.set_enabled(&id, true).await?;
                println!("trigger {} enabled", trigger.id);
            }
            TriggerCommands::Disable { id } => {
                let trigger = runtime.triggers.set_enabled(&id, false).await?;
                println!("trigger {} disabled", trigger.id);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::try_parse_from(["continuum"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, "config/default.toml");
    }

    #[test]
    fn promote_takes_id_and_depth() {
        let cli = Cli::try_parse_from(["continuum", "memory", "promote", "mem_1", "0.92"]).unwrap();
        match cli.command {
            Some(Commands::Memory {
                command: MemoryCommands::Promote { id, depth },
            }) => {
                assert_eq!(id, "mem_1");
                assert!((depth - 0.92).abs() < 1e-12);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn context_must_be_an_object() {
        assert!(parse_json_object(None, "x").unwrap().is_empty());
        assert_eq!(parse_json_object(Some(r#"{"a":1}"#), "x").unwrap()["a"], 1);
        assert!(parse_json_object(Some("[1]"), "x").is_err());
        assert!(parse_json_object(Some("nope"), "x").is_err());
    }
}
