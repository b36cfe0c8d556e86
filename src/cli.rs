use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "memget", version, about = "Download a memories export and tidy the result")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Export page listing the memories
    #[arg(long, global = true)]
    pub html: Option<PathBuf>,

    /// Directory the media is written to
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Directory for the ledger, error log and tagged list (default: <output>/.memget)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Settings file (defaults to settings.json in the app data directory)
    #[arg(long, global = true, env = "MEMGET_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download, tag, combine overlays and remove duplicates
    All(AllArgs),
    /// Download every record not yet in the ledger
    Download(DownloadArgs),
    /// Embed capture dates and locations into downloaded files
    Metadata,
    /// Merge base and overlay pairs into single files
    Combine(CombineArgs),
    /// Remove byte-identical copies
    Dedupe(DedupeArgs),
    /// Forget logged failures so the next download retries them
    ClearErrors,
    /// Report which external tools are installed
    Deps,
    /// Show or change stored settings
    Settings {
        #[command(subcommand)]
        sub: SettingsCommand,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct DownloadArgs {
    /// Parallel downloads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Process only the first N pending records (default: workers x 5)
    #[arg(long, num_args = 0..=1, value_name = "N")]
    pub test: Option<Option<usize>>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CombineArgs {
    /// Remove base and overlay once their composite exists
    #[arg(long)]
    pub delete_originals: bool,

    /// Only report what would be combined
    #[arg(long)]
    pub dry_run: bool,

    /// Consider every file in the output directory, not only ledger entries
    #[arg(long)]
    pub all_files: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DedupeArgs {
    /// Only report duplicates
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AllArgs {
    #[command(flatten)]
    pub download: DownloadArgs,

    /// Remove base and overlay once their composite exists
    #[arg(long)]
    pub delete_originals: bool,

    /// Report combine and dedupe actions without touching files
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the effective settings as JSON
    Show,
    /// Merge a JSON object into the stored settings
    Set { patch: String },
    /// Restore defaults
    Reset,
}
