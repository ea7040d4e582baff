use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quickaudit")]
#[command(about = "Capture audits offline and sync them when online")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the local database and sync queue
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Engine config file (defaults to <config dir>/quickaudit/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, inspect and change audits
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// List queued mutations waiting for sync
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pending counts
    Status,
    /// Replay the sync queue against the configured API once
    Sync,
    /// Run the sync engine until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Create a new audit
    #[command(alias = "new")]
    Add {
        #[arg(long)]
        title: String,
        /// Template ID
        #[arg(long)]
        template: String,
        #[arg(long)]
        location: String,
        /// Auditor user ID
        #[arg(long)]
        auditor: String,
        /// Initial status (draft, in_progress, completed, approved, rejected)
        #[arg(long)]
        status: Option<String>,
    },
    /// List audits
    List {
        /// Only audits with this status
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one audit as JSON
    Show { id: String },
    /// Change an audit's status
    SetStatus { id: String, status: String },
    /// Delete an audit
    Delete { id: String },
}
