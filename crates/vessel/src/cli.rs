use crate::commands;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Bring a container resource up
    Start {
        /// Resource id, e.g. container#1
        #[arg(long)]
        rid: String,
    },
    /// Bring a container resource down, or stop in-flight runs of a task
    Stop {
        /// Resource id
        #[arg(long)]
        rid: String,
    },
    /// Report resource status
    Status {
        /// Resource id; every container and task when omitted
        #[arg(long)]
        rid: Option<String>,
        /// Print one JSON document instead of text lines
        #[arg(long)]
        json: bool,
    },
    /// Run a task resource once
    Run {
        /// Resource id, e.g. task#backup
        #[arg(long)]
        rid: String,
        /// The run is already confirmed
        #[arg(long)]
        confirm: bool,
        /// The run originates from the scheduler (also VESSEL_CRON=1)
        #[arg(long)]
        cron: bool,
        /// Execution session id; generated when omitted
        #[arg(long, value_name = "ID")]
        session_id: Option<String>,
    },
    /// Print the engine command line that would run the resource
    PrintCmd {
        /// Resource id
        #[arg(long)]
        rid: String,
    },
}

#[derive(Debug, Parser)]
#[command(
    name = "vessel",
    version,
    about = "Container and task execution engine",
    color = clap::ColorChoice::Auto
)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via VESSEL_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Object configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = "object.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Run the selected subcommand; the value is the process exit code
    pub async fn dispatch(self) -> Result<i32> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None, // Let logging module check environment variable
        };

        // Set environment variable for log level before initializing logging
        if std::env::var_os("VESSEL_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            let level = self.log_level.as_str();
            std::env::set_var("RUST_LOG", format!("vessel={},vessel_core={}", level, level));
        }
        vessel_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", self.log_level.as_str());

        let context = commands::Context::load(&self.config)?;
        match self.command {
            Commands::Start { rid } => commands::resource::start(&context, &rid).await,
            Commands::Stop { rid } => commands::resource::stop(&context, &rid).await,
            Commands::Status { rid, json } => {
                commands::status::execute(&context, rid.as_deref(), json).await
            }
            Commands::Run {
                rid,
                confirm,
                cron,
                session_id,
            } => {
                commands::run::execute(
                    &context,
                    commands::run::RunArgs {
                        rid,
                        confirm,
                        cron,
                        session_id,
                    },
                )
                .await
            }
            Commands::PrintCmd { rid } => commands::resource::print_cmd(&context, &rid),
        }
    }
}
