use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// podshim tears down pod sandboxes
#[derive(Debug, Parser)]
#[command(name = "podshim", author, styles = styles::styles())]
pub struct PodshimArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<PodshimSubcommand>,

    /// Path to the runtime config file [default: $PODSHIM_HOME/config.yaml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show version
    #[arg(short = 'V', long)]
    pub version: bool,

    /// Show logs with error level
    #[arg(long, global = true)]
    pub error: bool,

    /// Show logs with warn level
    #[arg(long, global = true)]
    pub warn: bool,

    /// Show logs with info level
    #[arg(long, global = true)]
    pub info: bool,

    /// Show logs with debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Show logs with trace level
    #[arg(long, global = true)]
    pub trace: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum PodshimSubcommand {
    /// Stop a pod sandbox: its containers, its infra process and its network
    #[command(name = "stop")]
    Stop {
        /// Sandbox ID or a unique prefix of it
        #[arg(required = true)]
        id: String,
    },

    /// Show sandboxes and their containers
    #[command(name = "status")]
    Status,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
