use std::io::Read;

use serde_json::Value;

use livesync_core::{Controller, Submission};

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

fn read_payload(args: &SendArgs) -> Result<Value, CliError> {
    let raw = match (&args.data, &args.file) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => {
            return Err(CliError::Validation {
                field: "payload".into(),
                reason: "pass --data or --file".into(),
            });
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

pub async fn handle(
    controller: &Controller,
    args: SendArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let payload = read_payload(&args)?;
    let submission = controller.submit(&args.kind, payload).await?;

    let rendered = output::render_single(global.output, &submission, |s| match s {
        Submission::Sent => "sent".to_owned(),
        Submission::Queued(id) => format!("queued {id} (endpoint unreachable)"),
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
