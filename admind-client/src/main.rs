//! admindctl entry point

mod cli;
mod commands;
mod connection;

use std::time::Duration;

use clap::Parser;

use admind_utils::{init_logging_with_config, paths, LogConfig, Result};

use crate::cli::{Args, Command, ServiceCommand};
use crate::connection::Connection;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging_with_config(LogConfig::client()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    let socket = args.socket.unwrap_or_else(paths::socket_path);
    let timeout = Duration::from_millis(args.timeout);
    let conn = Connection::connect(&socket, timeout).await?;

    match args.command {
        Command::Version => commands::run_version(conn).await,
        Command::Status => commands::run_status(conn).await,
        Command::Service { command } => match command {
            ServiceCommand::Stop { force } => commands::run_stop(conn, force).await,
            ServiceCommand::Cat => commands::run_cat(conn).await,
        },
    }
}
