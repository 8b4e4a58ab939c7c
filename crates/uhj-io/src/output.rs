//! Writing UHJ-encoded stereo output as 24-bit FLAC.

use std::path::Path;

use flac_bound::FlacEncoder;

use crate::{FileError, FileResult};

/// Scale applied to a clamped `f32` sample to produce a 24-bit PCM value.
const I24_SCALE: f32 = 8_388_607.0;

/// A 24-bit, 2-channel FLAC writer for UHJ output.
pub struct FlacOutput<'a> {
    encoder: Option<FlacEncoder<'a>>,
}

impl<'a> FlacOutput<'a> {
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> FileResult<Self> {
        let config = FlacEncoder::new()
            .ok_or_else(|| FileError::EncodeError("failed to allocate FLAC encoder".into()))?
            .channels(2)
            .bits_per_sample(24)
            .sample_rate(sample_rate)
            .compression_level(5);

        let encoder = config
            .init_file(path.as_ref())
            .map_err(|_| FileError::EncodeError("failed to initialize FLAC encoder".into()))?;

        Ok(Self {
            encoder: Some(encoder),
        })
    }

    /// Write a block of interleaved stereo frames.
    pub fn write_frames(&mut self, frames: &[[f32; 2]]) -> FileResult<()> {
        let encoder = self
            .encoder
            .as_mut()
            .expect("write_frames called after finish");

        let mut interleaved = Vec::with_capacity(frames.len() * 2);
        for [left, right] in frames {
            interleaved.push(to_i24(*left));
            interleaved.push(to_i24(*right));
        }

        encoder
            .process_interleaved(&interleaved, frames.len() as u32)
            .map_err(|_| FileError::EncodeError("FLAC encode failed".into()))
    }

    /// Finalize the stream and flush the FLAC file.
    pub fn finish(mut self) -> FileResult<()> {
        if let Some(encoder) = self.encoder.take() {
            encoder
                .finish()
                .map_err(|_| FileError::EncodeError("FLAC finalize failed".into()))?;
        }
        Ok(())
    }
}

fn to_i24(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * I24_SCALE) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn to_i24_clamps_full_scale() {
        assert_eq!(to_i24(1.0), I24_SCALE as i32);
        assert_eq!(to_i24(-1.0), -(I24_SCALE as i32));
        assert_eq!(to_i24(0.0), 0);
    }

    #[test]
    fn create_and_finish_roundtrips_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("out.flac");
        let mut output = FlacOutput::create(&path, 48_000).unwrap();
        output.write_frames(&[[0.0, 0.0]; 16]).unwrap();
        output.finish().unwrap();
        assert!(path.exists());
    }
}
