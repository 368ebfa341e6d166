use serde::Serialize;
use tabled::Tabled;

use livesync_core::{Controller, QueueItem};

use crate::cli::{GlobalOpts, QueueArgs, QueueCommand};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Last error")]
    last_error: String,
}

fn item_row(item: &QueueItem, color: bool) -> ItemRow {
    ItemRow {
        id: item.id.to_string(),
        kind: item.kind.clone(),
        state: output::paint_state(&item.state.to_string(), color),
        attempts: item.attempts,
        created: item.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        last_error: item.last_error.clone().unwrap_or_default(),
    }
}

#[derive(Serialize)]
struct Cleared {
    cleared: usize,
}

pub async fn handle(
    controller: &Controller,
    args: QueueArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        QueueCommand::List => {
            let items = controller.pending();
            let color = output::should_color(global.color);
            let rendered = output::render_list(
                global.output,
                &items,
                |item| item_row(item, color),
                |item| item.id.to_string(),
            )?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        QueueCommand::Flush => {
            let report = controller.flush().await?;
            let rendered = output::render_single(global.output, &report, |r| {
                let mut lines = vec![format!("flushed {}/{}", r.flushed, r.total)];
                for item in &r.rejected {
                    lines.push(format!(
                        "rejected {} {}: {}",
                        item.id,
                        item.kind,
                        item.last_error.as_deref().unwrap_or("refused")
                    ));
                }
                if let Some(ref halted) = r.halted {
                    lines.push(format!("halted: {}", halted.message));
                }
                lines.join("\n")
            })?;
            output::print_output(&rendered, global.quiet);

            if let Some(halted) = report.halted {
                tracing::warn!(kind = %halted.kind, remaining = controller.pending().len(), "flush halted");
            }
            Ok(())
        }

        QueueCommand::Clear => {
            let cleared = controller.clear_queue()?;
            let rendered = output::render_single(global.output, &Cleared { cleared }, |c| {
                format!("cleared {} queued write(s)", c.cleared)
            })?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}
