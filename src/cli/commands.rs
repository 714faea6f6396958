//! CLI command definitions

use clap::{Args, Subcommand};

/// Run a pipeline once
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline name (email, slack, summary)
    pub pipeline: String,

    /// Input parameters (key=value), assembled into the pipeline input
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Print the full context as JSON
    #[arg(long)]
    pub json: bool,
}

/// Manage schedules
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    #[command(subcommand)]
    pub action: ScheduleAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ScheduleAction {
    /// List all schedules
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one schedule
    Show {
        /// Schedule id
        id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Add schedules from a JSON file
    Add {
        /// Path to a JSON file with a schedule object or array
        file: String,
    },

    /// Remove a schedule
    Remove {
        /// Schedule id
        id: String,
    },

    /// Enable a schedule
    Enable {
        /// Schedule id
        id: String,
    },

    /// Disable a schedule
    Disable {
        /// Schedule id
        id: String,
    },

    /// Enqueue a schedule's job immediately
    RunNow {
        /// Schedule id
        id: String,
    },
}

/// Queue worker and statistics
#[derive(Debug, Args, Clone)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum QueueAction {
    /// Start the queue worker
    Start {
        /// File to persist the queue to (overrides config)
        #[arg(long)]
        persistence_file: Option<String>,
    },

    /// Show statistics from a queue snapshot file
    Stats {
        /// Snapshot file to read (overrides config)
        #[arg(long)]
        persistence_file: Option<String>,
    },
}

/// Run the full engine
#[derive(Debug, Args, Clone)]
pub struct ServeCommand {
    /// Host to bind the webhook server (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the webhook server (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Skip installing the default schedules
    #[arg(long)]
    pub no_default_schedules: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
