use std::sync::Arc;

use owo_colors::OwoColorize;
use serde_json::Value;
use tracing::debug;

use livesync_core::{Controller, SurfacedError};

use super::SnapshotOut;
use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// Follow `args.resource` until Ctrl-C, the session ends, or `--count`
/// snapshots have been printed. Only new snapshots and new errors print.
pub async fn handle(
    controller: &Controller,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    controller.start().await?;
    let session = controller.watch(&args.resource)?;
    let mut view = session.view();
    let color = output::should_color(global.color);

    // One JSON document per line.
    let format = match global.output {
        OutputFormat::Json => OutputFormat::JsonCompact,
        other => other,
    };

    let mut printed = 0_usize;
    let mut last_data: Option<Arc<Value>> = None;
    let mut last_error: Option<SurfacedError> = None;
    let mut state = view.state();

    loop {
        if let Some(ref snapshot) = state.snapshot {
            let is_new = last_data
                .as_ref()
                .is_none_or(|prev| !Arc::ptr_eq(prev, &snapshot.data));
            if is_new {
                last_data = Some(Arc::clone(&snapshot.data));
                let out = SnapshotOut::new(&args.resource, snapshot);
                let rendered = output::render_single(format, &out, SnapshotOut::detail)?;
                output::print_output(&rendered, global.quiet);
                printed += 1;
                if args.count.is_some_and(|n| printed >= n) {
                    break;
                }
            }
        }

        if state.last_error != last_error {
            if let Some(ref err) = state.last_error {
                let line = format!("{}: {}", err.kind, err.message);
                if color {
                    eprintln!("{}", line.red());
                } else {
                    eprintln!("{line}");
                }
            }
            last_error.clone_from(&state.last_error);
        }

        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
            next = view.changed() => match next {
                Some(next) => state = next,
                None => break,
            },
        }
    }

    session.stop();
    Ok(())
}
