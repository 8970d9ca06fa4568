//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "admindctl", version, about = "Control the admind daemon")]
pub struct Args {
    /// Path to the daemon socket (defaults to the runtime-dir socket)
    #[arg(short = 'S', long, global = true)]
    pub socket: Option<PathBuf>,

    /// Timeout for connecting and for single-reply requests, in ms
    #[arg(long, global = true, default_value_t = 2000)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the daemon itself
    Service {
        #[command(subcommand)]
        command: ServiceCommand,
    },

    /// Print client and daemon versions
    Version,

    /// Print daemon state and active sessions
    Status,
}

#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    /// Stop the daemon
    ///
    /// By default the daemon finishes serving attached log streams before
    /// exiting; --force severs them immediately.
    Stop {
        /// Sever active sessions instead of waiting for them
        #[arg(short, long)]
        force: bool,
    },

    /// Stream the daemon's logs until interrupted
    Cat,
}
