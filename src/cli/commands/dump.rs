//! Dump command implementation.

use std::path::Path;

use super::{block_on, Context};
use crate::cli::Cli;
use crate::error::Result;

/// Execute the dump command.
pub fn execute(set: &str, output: &Path, cli: &Cli, json: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    let exporter = ctx.exporter()?;
    std::fs::create_dir_all(output)?;

    let files = block_on(exporter.dump(set, output))??;

    if json {
        let output = serde_json::json!({
            "set": set,
            "output_dir": output.display().to_string(),
            "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if files.is_empty() {
        println!("No objects stored for {set}.");
    } else {
        println!("Downloaded {} objects of {set} to {}", files.len(), output.display());
    }
    Ok(())
}
