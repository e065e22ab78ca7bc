//! Command-line interface for stentor.
//!
//! Argument parsing via clap derive macros. The `process` subcommand is
//! also the child-process contract the queue engine relies on, so its
//! positional shape (`input [models] [multiplier]`) is stable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Version string with the git short hash when the build had one.
pub fn version() -> &'static str {
    match option_env!("GIT_HASH") {
        Some(hash) => Box::leak(format!("{} ({hash})", env!("CARGO_PKG_VERSION")).into_boxed_str()),
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Autonomous audio-to-text ingestion pipeline
#[derive(Parser, Debug)]
#[command(name = "stentor", version = version(), about = "Autonomous audio-to-text ingestion pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// One queue pass over the worker inbox
    Queue {
        /// Pass --cleanup-temp-audio to each job
        #[arg(long)]
        cleanup_wav_files: bool,

        /// Remove the per-job run directory after a success
        #[arg(long)]
        cleanup_run_logs: bool,

        /// Delete the original media from completed/ once the transcript
        /// is copied
        #[arg(long)]
        cleanup_original_audio: bool,

        /// Shorthand for all three cleanup flags
        #[arg(long)]
        aggressive_cleanup: bool,

        /// Ordered model list, comma separated (e.g. "base.en,small")
        #[arg(long, value_name = "MODELS")]
        models: Option<String>,

        /// Per-segment timeout multiplier (positive integer)
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
        timeout_multiplier: Option<u32>,
    },

    /// Transcribe one media file (what `queue` spawns per job)
    Process {
        /// Remove the workable WAV and segment files on success
        #[arg(long)]
        cleanup_temp_audio: bool,

        /// Input media file
        input: PathBuf,

        /// Ordered model list, comma separated
        models: Option<String>,

        /// Per-segment timeout multiplier (positive integer)
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        timeout_multiplier: Option<u32>,
    },

    /// Download new media from the source list into the inbox
    Harvest {
        /// Source list file (default: content_sources.txt in the config root)
        #[arg(long, value_name = "PATH")]
        sources: Option<PathBuf>,
    },

    /// Verify external tools and directories
    Check,
}
