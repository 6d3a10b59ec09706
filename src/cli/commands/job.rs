//! Job command implementation.

use std::io::Read;
use std::path::Path;

use super::{block_on, Context};
use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::export::file::atomic_write;
use crate::job::{run_job, JobDescriptor};
use crate::oai::OaiClient;

/// Execute the job command.
///
/// Prints the updated descriptor, or writes it to `out`.
pub fn execute(file: &Path, out: Option<&Path>, cli: &Cli, json: bool) -> Result<()> {
    let from_stdin = file.as_os_str() == "-";
    let content = if from_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };
    let mut job: JobDescriptor = serde_json::from_str(&content)
        .map_err(|e| Error::InvalidArgument(format!("Invalid job descriptor: {e}")))?;

    let ctx = Context::load(cli)?;
    if job.oai_url.is_none() {
        job.oai_url = Some(ctx.resolved.oai_url.clone());
    }
    let store = ctx.store()?;
    let defaults = ctx.resolved.export_config();

    let report = block_on(run_job(&mut job, &store, &defaults, OaiClient::http))??;

    let updated = serde_json::to_string_pretty(&job)?;
    if let Some(out) = out {
        atomic_write(out, &updated)?;
    }

    if json {
        let output = serde_json::json!({
            "job": job,
            "report": report,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if out.is_some() {
        println!(
            "Job {}: {} resources, {} exported, {} sized",
            job.id, report.resources, report.exported, report.sized
        );
    } else {
        println!("{updated}");
    }
    Ok(())
}
