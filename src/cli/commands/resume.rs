//! Resume command implementation.

use super::{block_on, print_outcome, Context};
use crate::cli::{append_mode, Cli, ResumeArgs};
use crate::error::Result;
use crate::export::{ExportError, ExportOutcome};

/// Execute the resume command.
///
/// A limited incremental resume uploads its segments to the set's prefix
/// so the next incremental export uses them as baseline.
pub fn execute(args: &ResumeArgs, cli: &Cli, json: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    let append = append_mode(args.append, args.full, ctx.resolved.is_append_set(&args.set));
    let exporter = ctx.exporter()?;

    let outcome = block_on(async {
        let outcome = exporter
            .resume_export(&args.set, append, args.count, args.limit)
            .await?;
        if append {
            if let ExportOutcome::Checkpoint { segments, .. } = &outcome {
                exporter.persist_segments(&args.set, segments).await?;
            }
        }
        Ok::<_, ExportError>(outcome)
    })??;

    print_outcome(&args.set, &outcome, json)
}
