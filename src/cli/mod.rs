//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// OAI-PMH harvest exporter - publishes catalog snapshots to object storage
#[derive(Parser, Debug)]
#[command(name = "oai-harvest", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// OAI-PMH endpoint (default: OAI_HARVEST_URL, config, built-in)
    #[arg(long, global = true)]
    pub oai_url: Option<String>,

    /// Object key prefix; objects of set S live under `<prefix>.S/`
    #[arg(long, global = true)]
    pub bucket_prefix: Option<String>,

    /// Storage backend: s3, local:<dir> or memory
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest a set and publish its export
    Export(ExportArgs),

    /// Continue an interrupted harvest from a source list position
    Resume(ResumeArgs),

    /// Download every stored object of a set
    Dump {
        /// Set name
        set: String,

        /// Destination directory (created if missing)
        #[arg(long, short = 'd', default_value = ".")]
        dir: PathBuf,
    },

    /// Run the fetch stage of a job descriptor
    Job {
        /// Job descriptor JSON file, or `-` for stdin
        file: PathBuf,

        /// Write the updated descriptor here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Target set name
    pub set: String,

    /// Incremental mode (default: only for the base set)
    #[arg(long, conflicts_with = "full")]
    pub append: bool,

    /// Full mode
    #[arg(long)]
    pub full: bool,

    /// Stop after this many accepted records and keep the segments locally
    #[arg(long)]
    pub limit: Option<u64>,

    /// Metadata format (marcxml, oai_dc)
    #[arg(long)]
    pub format: Option<String>,

    /// Name of the published artifact
    #[arg(long)]
    pub export_filename: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Target set name
    pub set: String,

    /// Source list position to continue from (a checkpoint's "Next" value)
    pub count: u64,

    /// Stop after this many accepted records
    pub limit: Option<u64>,

    /// Incremental mode (default: for the configured append sets)
    #[arg(long, conflicts_with = "full")]
    pub append: bool,

    /// Full mode
    #[arg(long)]
    pub full: bool,
}

/// Resolve the effective append flag from `--append`/`--full`.
#[must_use]
pub fn append_mode(append: bool, full: bool, default: bool) -> bool {
    if append {
        true
    } else if full {
        false
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_append_mode() {
        assert!(append_mode(true, false, false));
        assert!(!append_mode(false, true, true));
        assert!(append_mode(false, false, true));
    }

    #[test]
    fn test_parse_export_with_globals() {
        let cli = Cli::parse_from([
            "oai-harvest",
            "--store",
            "memory",
            "export",
            "sb",
            "--limit",
            "500",
        ]);
        assert_eq!(cli.store.as_deref(), Some("memory"));
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.set, "sb");
                assert_eq!(args.limit, Some(500));
                assert!(!args.append);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_resume_positionals() {
        let cli = Cli::parse_from(["oai-harvest", "resume", "sb", "1500", "500"]);
        match cli.command {
            Commands::Resume(args) => {
                assert_eq!(args.count, 1500);
                assert_eq!(args.limit, Some(500));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_append_conflicts_with_full() {
        let result = Cli::try_parse_from(["oai-harvest", "export", "sb", "--append", "--full"]);
        assert!(result.is_err());
    }
}
