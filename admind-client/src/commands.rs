//! Command implementations

use admind_protocol::{RequestPath, ServerMessage};
use admind_utils::{AdmindError, Result};

use crate::connection::{map_server_error, Connection};

/// `version`: print both ends' versions
pub async fn run_version(mut conn: Connection) -> Result<()> {
    conn.request(RequestPath::Version).await?;

    match conn.recv().await? {
        ServerMessage::Version { version } => {
            println!("admindctl\t{}", env!("CARGO_PKG_VERSION"));
            println!("admind\t\t{}", version);
            expect_done(&mut conn).await
        }
        other => unexpected(other),
    }
}

/// `status`: print daemon state and active sessions
pub async fn run_status(mut conn: Connection) -> Result<()> {
    conn.request(RequestPath::Status).await?;

    match conn.recv().await? {
        ServerMessage::Status { state, sessions } => {
            println!("State: {}", state);
            if sessions.is_empty() {
                println!("No active sessions");
            } else {
                println!("Active sessions:");
                for s in sessions {
                    let kind = if s.streaming { "stream" } else { "request" };
                    println!("  [{}] {} ({}, {}s)", s.id, s.request_path, kind, s.age_secs);
                }
            }
            expect_done(&mut conn).await
        }
        other => unexpected(other),
    }
}

/// `service stop [--force]`
pub async fn run_stop(mut conn: Connection, force: bool) -> Result<()> {
    conn.request(RequestPath::Stop { force }).await?;

    match conn.recv().await? {
        ServerMessage::Ok => {
            // Done may not arrive if the daemon wins the race to exit
            match conn.recv().await {
                Ok(ServerMessage::Done) | Err(AdmindError::ConnectionClosed) => Ok(()),
                Ok(other) => unexpected(other),
                Err(e) => Err(e),
            }
        }
        other => unexpected(other),
    }
}

/// `service cat`: print the daemon's log stream until it ends
pub async fn run_cat(mut conn: Connection) -> Result<()> {
    conn.request(RequestPath::Cat).await?;

    loop {
        match conn.recv_wait().await {
            Ok(ServerMessage::LogLine { event }) => println!("{}", event),
            Ok(ServerMessage::Terminated) => return Err(AdmindError::TerminatedByServer),
            Ok(ServerMessage::Done) => return Ok(()),
            Ok(ServerMessage::Error { code, message }) => {
                return Err(map_server_error(code, message))
            }
            Ok(other) => return unexpected(other),
            // Daemon exited while we were attached; a forced stop says
            // Terminated first, so a bare close is a clean end
            Err(AdmindError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

async fn expect_done(conn: &mut Connection) -> Result<()> {
    match conn.recv().await? {
        ServerMessage::Done => Ok(()),
        other => unexpected(other),
    }
}

fn unexpected(msg: ServerMessage) -> Result<()> {
    match msg {
        ServerMessage::Error { code, message } => Err(map_server_error(code, message)),
        other => Err(AdmindError::protocol(format!(
            "unexpected reply: {:?}",
            other
        ))),
    }
}
