//! Speech-to-text: model resolution, prompt assembly, transcription loop.

pub mod engine;
pub mod models;
pub mod prompt;
