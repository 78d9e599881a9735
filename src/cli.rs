use clap::Parser;
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Non-destructive website security reconnaissance", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Directory holding persisted scan state
    #[arg(long, global = true, default_value = "./scans")]
    pub store: PathBuf,
}

/// Tunables shared by every command that runs stages.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ScanOptions {
    /// JSON file with scan settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Crawler page ceiling
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Delay between requests to the same host, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Probes run concurrently within a stage
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Create a scan and drive it through every stage
    Scan {
        /// Target domain (e.g. example.com)
        domain: String,

        /// Output directory for findings and the report
        #[arg(short = 'o', long, default_value = "./results")]
        out: PathBuf,

        #[command(flatten)]
        options: ScanOptions,
    },

    /// Create a pending scan without running it
    Create {
        domain: String,

        /// Scan identifier (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Run exactly one stage of an existing scan
    Advance {
        scan_id: String,

        #[command(flatten)]
        options: ScanOptions,
    },

    /// Print the findings of a scan as JSON lines
    Findings { scan_id: String },

    /// Cancel a running scan
    Cancel { scan_id: String },
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
