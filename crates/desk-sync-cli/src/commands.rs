use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "desk-sync")]
#[command(about = "Directory sync and remote inventory for the helpdesk", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every job on its schedule until interrupted
    Daemon,
    /// Sync users that have a mail address from the directory
    SyncUsers,
    /// Sync computers from the directory
    SyncComputers,
    /// Import or refresh a single user by distinguished name
    ImportUser {
        /// Distinguished name of the user
        dn: String,
    },
    /// Inventory drives on computers
    Scan {
        /// Scan only this computer
        #[arg(long)]
        computer: Option<String>,
    },
    /// Delete scan records older than the retention window
    Sweep {
        /// Override the configured retention window
        #[arg(long)]
        days: Option<u64>,
    },
    /// Manage per-computer credential overrides
    Access {
        #[command(subcommand)]
        action: AccessAction,
    },
    /// Write the computer inventory as CSV
    Report {
        /// Output file (stdout when omitted)
        #[arg(long, short)]
        output: Option<String>,
    },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}

#[derive(Debug, Subcommand)]
pub enum AccessAction {
    /// Set override credentials for a computer
    Set {
        computer: String,
        #[arg(long)]
        username: Option<String>,
        /// Read from DESK_SYNC_ACCESS_PASSWORD when omitted
        #[arg(long, env = "DESK_SYNC_ACCESS_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Remove the override so the admin account is used again
    Clear { computer: String },
    /// Show which credentials a computer would be scanned with
    Show { computer: String },
}
