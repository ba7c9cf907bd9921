//! Icelog CLI - OTLP log appender for Apache Iceberg.

use anyhow::Result;
use clap::{Parser, Subcommand};
use icelog_core::config::LogFormat;
use icelog_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod server;

/// Exit codes following Unix conventions: 0 success, 1-127 application
/// errors.
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Kafka-related error (connection, consumer group, offsets)
    KafkaError = 2,
    /// Iceberg-related error (catalog, commit, schema)
    IcebergError = 3,
    /// Storage error (S3, filesystem)
    StorageError = 4,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code by inspecting the error message.
    fn from_error(error: &anyhow::Error) -> Self {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("kafka") || error_str.contains("consumer") {
            ExitCode::KafkaError
        } else if error_str.contains("iceberg") || error_str.contains("catalog") {
            ExitCode::IcebergError
        } else if error_str.contains("storage")
            || error_str.contains("s3")
            || error_str.contains("upload")
        {
            ExitCode::StorageError
        } else {
            ExitCode::RuntimeError
        }
    }
}

#[derive(Parser)]
#[command(name = "icelog")]
#[command(about = "OTLP log appender: Kafka in, Apache Iceberg out", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the appender
    Run {
        /// Override Kafka brokers (comma separated)
        #[arg(long)]
        brokers: Option<String>,

        /// Override Kafka topic
        #[arg(long)]
        topic: Option<String>,

        /// Override consumer group
        #[arg(long)]
        consumer_group: Option<String>,
    },

    /// Validate the configuration file
    Validate,

    /// Show buffer statistics of a running appender
    Status {
        /// Admin endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Peek at the config for the log format; fall back to JSON
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Json);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            brokers,
            topic,
            consumer_group,
        } => {
            let mut config = load_config(&cli.config)?;

            if let Some(brokers) = brokers {
                config.kafka.brokers = brokers.split(',').map(str::to_string).collect();
            }
            if let Some(topic) = topic {
                config.kafka.topic = topic;
            }
            if let Some(consumer_group) = consumer_group {
                config.kafka.consumer_group = consumer_group;
            }

            config.validate()?;
            commands::run::run(config).await
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
            Ok(())
        }

        Commands::Status { url } => commands::status::run(&url).await,
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("icelog.toml"));
    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}
