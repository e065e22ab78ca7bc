//! stentor - Autonomous audio-to-text ingestion pipeline.
//!
//! Two-sided and filesystem-driven:
//! - harvest/: client side, downloads media and stages it into a remote inbox
//! - queue/:   worker side, a directory-based job queue with one-worker locking
//! - audio/:   input normalization and silence-driven segmentation
//! - stt/:     per-segment transcription with model fallback
//!
//! All durable state lives on the filesystem; directory renames are the
//! commit primitive. This requires POSIX rename semantics.

pub mod audio;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod harvest;
pub mod history;
pub mod job;
pub mod lock;
pub mod logging;
pub mod mount;
pub mod queue;
pub mod scan;
pub mod stt;
pub mod sys;
pub mod transcript;
