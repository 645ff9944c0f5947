//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "navcard")]
#[command(author, version, about = "Aviation navigation database card programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML)
    /// Defaults to ./navcard.toml, then /etc/navcard/navcard.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the programmer firmware images (grmn*.dat)
    #[arg(long, global = true)]
    pub firmware_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the attached programmer and the inserted card
    Detect,

    /// Dump the database on the card to a file
    ReadDatabase {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Keep trailing erased fill instead of trimming it
        #[arg(long)]
        full: bool,
    },

    /// Write a database image to the card
    WriteDatabase {
        /// Database image file
        #[arg(short, long)]
        input: PathBuf,

        /// Refuse to write unless the card is fully erased
        #[arg(long)]
        require_blank: bool,

        /// Skip reading back the written data
        #[arg(long)]
        no_verify: bool,

        /// Also store a metadata record ({cycle~serviceId}, 16 MB cards only)
        #[arg(long)]
        metadata: Option<String>,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Erase the whole card
    Erase {
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Compare the card against a database image
    Verify {
        /// Database image file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the metadata record of a 16 MB card
    ReadMetadata,

    /// Store a metadata record on a 16 MB card
    WriteMetadata {
        /// Record in the form {cycle~serviceId}
        record: String,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}
