//! Export command implementation.

use tracing::info;

use super::{block_on, print_outcome, Context};
use crate::cli::{append_mode, Cli, ExportArgs};
use crate::error::{Error, Result};
use crate::export::ExportRequest;
use crate::oai::MetadataFormat;

/// Execute the export command.
///
/// Incremental mode defaults on for the base set only.
pub fn execute(args: &ExportArgs, cli: &Cli, json: bool) -> Result<()> {
    let mut ctx = Context::load(cli)?;
    if let Some(format) = &args.format {
        ctx.resolved.format = format
            .parse::<MetadataFormat>()
            .map_err(Error::InvalidArgument)?;
    }
    if let Some(filename) = &args.export_filename {
        ctx.resolved.export_filename.clone_from(filename);
    }

    let append = append_mode(args.append, args.full, args.set == ctx.resolved.base_set);
    let exporter = ctx.exporter()?;

    let request = ExportRequest {
        set: args.set.clone(),
        append,
        limit: args.limit,
    };
    info!(set = %request.set, append, limit = ?request.limit, "Starting export");

    let outcome = block_on(exporter.export(&request))??;
    print_outcome(&args.set, &outcome, json)
}
