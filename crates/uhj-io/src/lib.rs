//! uhj-io: audio file I/O for the UHJ encoder
//!
//! Reads any symphonia-supported format (or WAV directly via hound) into
//! planar `f64` samples with an optional channel position map, and writes
//! 24-bit stereo FLAC output via flac-bound.

mod error;
mod input;
mod output;

pub use error::*;
pub use input::*;
pub use output::*;
