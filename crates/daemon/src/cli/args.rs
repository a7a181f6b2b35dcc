pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "blob-backup")]
#[command(about = "Record blob storage events and replay them into a point-in-time restore")]
#[command(version)]
pub struct Args {
    /// Path to the blob-backup config directory (defaults to ~/.blob-backup)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
