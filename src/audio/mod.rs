//! Audio processing: normalization, silence detection, segmentation.

pub mod ffmpeg;
pub mod segmenter;
pub mod silence;
