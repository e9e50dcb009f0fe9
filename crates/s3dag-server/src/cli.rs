use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "s3dag",
    about = "S3-compatible object gateway over a content-addressed DAG store",
    version
)]
pub struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}
