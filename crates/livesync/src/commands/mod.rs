//! Command dispatch: bridges CLI args -> controller calls -> output.

pub mod config_cmd;
pub mod fetch;
pub mod queue;
pub mod send;
pub mod watch;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use livesync_core::{Controller, Snapshot, SnapshotSource};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    controller: &Controller,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(controller, args, global).await,
        Command::Fetch(args) => fetch::handle(controller, args, global).await,
        Command::Send(args) => send::handle(controller, args, global).await,
        Command::Queue(args) => queue::handle(controller, args, global).await,
        // Handled before a controller is built
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Serializable view of a snapshot, shared by `fetch` and `watch`.
#[derive(Serialize)]
pub(crate) struct SnapshotOut<'a> {
    pub resource: &'a str,
    pub source: SnapshotSource,
    pub fetched_at: DateTime<Utc>,
    pub data: &'a Value,
}

impl<'a> SnapshotOut<'a> {
    pub fn new(resource: &'a str, snapshot: &'a Snapshot<Value>) -> Self {
        Self {
            resource,
            source: snapshot.source,
            fetched_at: snapshot.fetched_at_utc,
            data: &snapshot.data,
        }
    }

    /// Table/plain rendering: a one-line header, then the pretty payload.
    pub fn detail(&self) -> String {
        let body = serde_json::to_string_pretty(self.data).unwrap_or_default();
        format!(
            "{} ({} @ {})\n{body}",
            self.resource,
            self.source,
            self.fetched_at.format("%H:%M:%S")
        )
    }
}
