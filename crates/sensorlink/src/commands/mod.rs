//! Command dispatch: bridges CLI args -> core bindings -> output formatting.

pub mod config_cmd;
pub mod property;
pub mod schema;
pub mod signal;

use sensorlink_core::Connection;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, conn: &Connection, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Get(args) => property::get(conn, args, global).await,
        Command::Set(args) => property::set(conn, args, global).await,
        Command::Exec(args) => property::exec(conn, args, global).await,
        Command::Describe(args) => schema::describe(conn, args, global).await,
        Command::Check(args) => schema::check(conn, args, global).await,
        Command::Watch(args) => signal::watch(conn, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
