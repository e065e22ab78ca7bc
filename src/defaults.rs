//! Shared constants for stentor.
//!
//! Every tunable that appears in more than one module lives here so the
//! queue engine, the job supervisor, and the harvester cannot drift apart.

/// Canonical sample rate for transcription input, in Hz.
///
/// 16 kHz is what ggml Whisper models are trained on; everything is
/// normalized to this before segmentation.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Canonical channel count (mono).
pub const TARGET_CHANNELS: u16 = 1;

/// Noise floor for ffmpeg's silencedetect filter, in dBFS.
pub const SILENCE_NOISE_THRESHOLD_DB: i32 = -30;

/// Minimum quiet stretch (seconds) that counts as a silence.
pub const SILENCE_MIN_DURATION_SECS: f64 = 1.0;

/// Segments shorter than this are dropped from the plan.
pub const MIN_SEGMENT_DURATION_SECS: f64 = 1.0;

/// How far before a silence's end the next segment starts, in seconds.
///
/// The small overlap into the tail of the silence reduces mid-word
/// truncation at segment boundaries.
pub const SEGMENT_PADDING_SECS: f64 = 0.25;

/// Default per-segment timeout multiplier: timeout = duration * multiplier.
pub const TIMEOUT_DURATION_MULTIPLIER: u32 = 5;

/// Floor for the per-segment transcription timeout, in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 30;

/// Ceiling for the per-segment transcription timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Most characters of the description sidecar that go into the prompt.
pub const MAX_DESCRIPTION_CHARS_FOR_PROMPT: usize = 400;

/// Most characters carried over from the previous segment's transcript.
pub const INTER_SEGMENT_CONTEXT_CHARS: usize = 200;

/// Hard cap on the assembled prompt passed to the STT binary.
pub const MAX_TOTAL_PROMPT_CHARS: usize = 750;

/// Literal separator prefixed to the inter-segment context tail.
pub const CONTEXT_SEPARATOR: &str = "[...] ";

/// Models tried in order when the caller supplies none.
pub const DEFAULT_MODELS: &[&str] = &["base.en"];

/// Ultimate fallback model, appended to every model list that does not
/// already contain it (unless the list is exactly this model).
pub const FALLBACK_MODEL: &str = "tiny.en";

// ── Locks ───────────────────────────────────────────────────────────────

/// Lock protecting the queue engine (one engine per worker host).
pub const LOCK_QUEUE_ENGINE: &str = "queue-engine";

/// Lock protecting a transcription run (one job supervisor at a time).
pub const LOCK_AUDIO_PROCESSING: &str = "audio-processing";

/// Lock protecting the client-side harvesting loop.
pub const LOCK_HARVESTER: &str = "harvester";

/// Lock protecting a single downloader invocation.
pub const LOCK_DOWNLOADER: &str = "downloader";

/// Staleness timeout for locks whose critical section spans a whole
/// transcription run, in seconds.
pub const LOCK_TIMEOUT_LONG_SECS: u64 = 7_200;

/// Staleness timeout for short critical sections, in seconds.
pub const LOCK_TIMEOUT_SHORT_SECS: u64 = 300;

/// Staleness timeout for a named lock.
///
/// The dividing line is the expected worst-case runtime of the protected
/// critical section: whole-run locks get the long timeout, everything
/// else the short one.
pub fn lock_timeout_secs(name: &str) -> u64 {
    match name {
        LOCK_QUEUE_ENGINE | LOCK_AUDIO_PROCESSING => LOCK_TIMEOUT_LONG_SECS,
        _ => LOCK_TIMEOUT_SHORT_SECS,
    }
}

// ── Exit codes ──────────────────────────────────────────────────────────

/// Clean exit.
pub const EXIT_SUCCESS: i32 = 0;

/// Processing failed; the media group belongs in failed/.
pub const EXIT_FAILURE: i32 = 1;

/// Missing or malformed arguments, missing input, missing dependency.
pub const EXIT_VALIDATION: i32 = 2;

/// Could not run because a peer held the lock; requeue, do not fail.
pub const EXIT_RETRYABLE: i32 = 10;

/// The remote filesystem died mid-batch; abort, do not continue.
pub const EXIT_TRANSPORT_LOST: i32 = 20;

// ── Supervision ─────────────────────────────────────────────────────────

/// Grace period between TERM and KILL when shutting down a child, seconds.
pub const CHILD_TERM_GRACE_SECS: u64 = 60;

/// Pause before unmounting on harvester exit, letting in-flight I/O drain.
pub const UNMOUNT_SETTLE_SECS: u64 = 2;

/// Deadline for a remote directory listing before the mount is declared
/// unresponsive, in seconds.
pub const MOUNT_LIST_TIMEOUT_SECS: u64 = 5;

// ── Filesystem names ────────────────────────────────────────────────────

/// Queue state directories under the harvesting root.
pub const INBOX_DIR: &str = "inbox";
pub const PROCESSING_DIR: &str = "processing";
pub const COMPLETED_DIR: &str = "completed";
pub const FAILED_DIR: &str = "failed";
pub const LOGS_DIR: &str = "logs";

/// Append-only history of processed fingerprints, under the harvesting root.
pub const HISTORY_FILE: &str = "processed_files.txt";

/// Download archive shared by all harvesting clients, inside the inbox.
pub const ARCHIVE_FILE: &str = "download_archive.txt";

/// Audio extensions the inbox scanner picks up (compared case-insensitively).
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "aac", "flac", "ogg", "opus", "wma", "mp4", "webm", "mkv",
];

/// Timestamp format for history records.
pub const HISTORY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Timestamp format for run identifiers.
pub const RUN_ID_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ── External tool output markers ────────────────────────────────────────

/// Downloader output indicating the URL was already in the archive.
pub const ARCHIVE_HIT_MARKER: &str = "has already been recorded in the archive";

/// Downloader output indicating the remote transport died (matched
/// case-insensitively).
pub const TRANSPORT_LOSS_MARKERS: &[&str] =
    &["device not configured", "socket is not connected"];

/// STT binary stderr markers that mean "this model attempt failed".
pub const STT_ERROR_MARKERS: &[&str] = &["failed to load model", "error:", "usage:"];
