//! Decoding input audio files into planar samples with a channel map.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Channels, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use uhj_core::ChannelPosition;

use crate::{FileError, FileResult};

/// Decoded input audio, deinterleaved into one `Vec<f64>` per channel.
pub struct DecodedInput {
    pub channels: Vec<Vec<f64>>,
    pub sample_rate: u32,
    /// Explicit channel positions, if the container carried a channel mask.
    pub channel_map: Option<Vec<ChannelPosition>>,
}

impl DecodedInput {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }
}

/// Translate a symphonia channel mask into the subset of positions this
/// encoder recognizes. Unrecognized bits (e.g. front-left-of-center) are
/// silently dropped; layout detection then fails on an incomplete map
/// rather than misinterpreting one.
fn positions_from_mask(mask: Channels) -> Vec<ChannelPosition> {
    let known: &[(Channels, ChannelPosition)] = &[
        (Channels::FRONT_LEFT, ChannelPosition::FrontLeft),
        (Channels::FRONT_RIGHT, ChannelPosition::FrontRight),
        (Channels::FRONT_CENTRE, ChannelPosition::FrontCenter),
        (Channels::LFE1, ChannelPosition::Lfe),
        (Channels::REAR_LEFT, ChannelPosition::RearLeft),
        (Channels::REAR_RIGHT, ChannelPosition::RearRight),
        (Channels::REAR_CENTRE, ChannelPosition::RearCenter),
        (Channels::SIDE_LEFT, ChannelPosition::SideLeft),
        (Channels::SIDE_RIGHT, ChannelPosition::SideRight),
        (Channels::TOP_FRONT_LEFT, ChannelPosition::TopFrontLeft),
        (Channels::TOP_FRONT_RIGHT, ChannelPosition::TopFrontRight),
        (Channels::TOP_REAR_LEFT, ChannelPosition::TopRearLeft),
        (Channels::TOP_REAR_RIGHT, ChannelPosition::TopRearRight),
    ];

    known
        .iter()
        .filter(|(bit, _)| mask.contains(*bit))
        .map(|(_, pos)| *pos)
        .collect()
}

/// Read any supported audio file (WAV via hound, everything else via
/// symphonia) into planar samples.
pub fn read_input<P: AsRef<Path>>(path: P) -> FileResult<DecodedInput> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("wav")) == Some(true) {
        return read_wav(path);
    }
    read_symphonia(path)
}

fn read_wav(path: &Path) -> FileResult<DecodedInput> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0) as f64)
            .collect(),
        hound::SampleFormat::Int => {
            let max_value = (1i64 <<) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f64 / max_value)
                .collect()
        }
    };

    let num_frames = samples.len() / num_channels.max(1);
    let mut channels = vec![vec![0.0; num_frames]; num_channels];
    for (i, chunk) in samples.chunks(num_channels).enumerate() {
        for (ch, &sample) in chunk.iter().enumerate() {
            channels[ch][i] = sample;
        }
    }

    Ok(DecodedInput {
        channels,
        sample_rate: spec.sample_rate,
        // hound does not expose a WAVE_FORMAT_EXTENSIBLE channel mask.
        channel_map: None,
    })
}

fn read_symphonia(path: &Path) -> FileResult<DecodedInput> {
    let file = File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("no audio track found".into()))?
        .clone();

    let track_id = track.id;
    let num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let channel_map = track.codec_params.channels.map(positions_from_mask);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut channels: Vec<Vec<f64>> = vec![Vec::new(); num_channels];

    loop {
        match format_reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(decoded) => copy_buffer(&decoded, &mut channels),
                    Err(SymphoniaError::DecodeError(_)) => continue,
                    Err(e) => return Err(FileError::DecodeError(e.to_string())),
                }
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }
    }

    Ok(DecodedInput {
        channels,
        sample_rate,
        channel_map,
    })
}

fn copy_buffer(buffer: &AudioBufferRef, output: &mut [Vec<f64>]) {
    macro_rules! copy_as_f64 {
        ($buf:expr) => {
            for (ch, out_ch) in output.iter_mut().enumerate() {
                if ch < $buf.spec().channels.count() {
                    out_ch.extend($buf.chan(ch).iter().map(|&s| s as f64));
                }
            }
        };
    }

    match buffer {
        AudioBufferRef::F32(buf) => copy_as_f64!(buf),
        AudioBufferRef::F64(buf) => copy_as_f64!(buf),
        AudioBufferRef::S32(buf) => {
            for (ch, out_ch) in output.iter_mut().enumerate() {
                if ch < buf.spec().channels.count() {
                    out_ch.extend(buf.chan(ch).iter().map(|&s| s as f64 / i32::MAX as f64));
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            for (ch, out_ch) in output.iter_mut().enumerate() {
                if ch < buf.spec().channels.count() {
                    out_ch.extend(buf.chan(ch).iter().map(|&s| s as f64 / i16::MAX as f64));
                }
            }
        }
        _ => {
            log::warn!("unsupported sample format in decoded buffer, skipping packet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_from_mask_recognizes_stereo() {
        let mask = Channels::FRONT_LEFT | Channels::FRONT_RIGHT;
        let positions = positions_from_mask(mask);
        assert_eq!(positions, vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight]);
    }

    #[test]
    fn positions_from_mask_drops_unrecognized_bits() {
        let mask = Channels::FRONT_LEFT | Channels::FRONT_RIGHT | Channels::FRONT_LEFT_CENTRE;
        let positions = positions_from_mask(mask);
        assert_eq!(positions, vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight]);
    }
}
