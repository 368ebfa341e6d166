use livesync_core::Controller;

use super::SnapshotOut;
use crate::cli::{FetchArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    controller: &Controller,
    args: FetchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let snapshot = controller.fetch(&args.resource).await?;
    let out = SnapshotOut::new(&args.resource, &snapshot);
    let rendered = output::render_single(global.output, &out, SnapshotOut::detail)?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
