use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "depot")]
#[command(version)]
#[command(about = "Tiered audio storage: stage, commit and publish media items", long_about = None)]
pub struct Cli {
    /// Staging tier the commands operate on
    #[arg(short = 's', long, env = "DEPOT_STAGING", default_value = ".", global = true)]
    pub staging: PathBuf,

    /// ffmpeg binary used to derive lower-quality renditions
    #[arg(long, env = "DEPOT_FFMPEG", default_value = "ffmpeg", global = true)]
    pub ffmpeg: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty staging tier
    Create,

    /// Import audio files, or every audio file under a directory
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove items from staging
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List staged items
    List {
        /// Write the listing as CSV instead of printing it
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Set a staging header
    Configure { key: String, value: String },

    /// Remove a staging header
    Unset { key: String },

    /// Show one item, or the staging header and rendition statistics
    Detail { id: Option<String> },

    /// Change one field of a staged item
    Edit {
        id: String,
        #[arg(value_enum)]
        field: EditField,
        /// New value; for `cover` a path to an image file
        value: String,
    },

    /// Sync staging into a committed store
    Commit { store: PathBuf },

    /// Sync a committed store into a published repository
    Publish { store: PathBuf, repository: PathBuf },

    /// Manage an item's lyric tracks
    Lyric {
        #[command(subcommand)]
        action: LyricAction,
    },

    /// Check every rendition of a committed or published tier against its checksum
    Verify { tier: PathBuf },

    /// Print program and format versions
    Version,
}

#[derive(Subcommand)]
pub enum LyricAction {
    /// Attach an LRC file, replacing any track in the same language
    Add {
        id: String,
        file: PathBuf,
        #[arg(short = 'l', long)]
        language: String,
        /// Whether the track is in the song's original language
        #[arg(long)]
        original: Option<bool>,
    },
    Remove {
        id: String,
        #[arg(short = 'l', long)]
        language: String,
    },
    List { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EditField {
    Title,
    /// Comma-separated list
    Artist,
    Album,
    #[value(name = "type")]
    Kind,
    Num,
    Description,
    Cover,
}
