//! The UHJ encoder: ties layout detection, panning, and the phase shifter
//! together into the full ambisonic-to-stereo pipeline.

use std::collections::VecDeque;

use crate::layout::Layout;
use crate::panner::Panner;
use crate::phase_shifter::{PhaseShifter, FILTER_DELAY, KERNEL_LEN};
use crate::clamp_output;

/// FuMa-to-UHJ direct-path and cross-path coefficients.
const S_W: f64 = 0.9396926;
const S_X: f64 = 0.1855740;
const D_Y: f64 = 0.6554516;
const T_W: f64 = -0.3420201;
const T_X: f64 = 0.5098604;

/// Converts ambisonic or speaker-mapped planar input into 2-channel
/// UHJ-encoded stereo output.
///
/// Internally this runs three signals through the block:
/// - `S`, the sum path (`0.94*W + 0.19*X`), delayed by [`FILTER_DELAY`]
///   samples with a plain delay line so it stays time-aligned with the
///   Hilbert-filtered difference path.
/// - `D`, the difference path: a direct `0.66*Y` term (delayed the same
///   way) plus the wideband +90°-shifted contribution of `T`.
/// - `T`, the signal fed to the [`PhaseShifter`] (`-0.34*W + 0.51*X`).
///
/// Because the phase shifter has an intrinsic group delay of
/// `FILTER_DELAY` samples, the encoder's output for a given input frame
/// only appears `FILTER_DELAY` frames later. [`UhjEncoder::finish`] flushes
/// that trailing `FILTER_DELAY` frames of lead-out once the input is
/// exhausted.
pub struct UhjEncoder {
    panner: Panner,
    phase_shifter: PhaseShifter,
    s_delay: VecDeque<f64>,
    d_delay: VecDeque<f64>,
    /// Last `KERNEL_LEN - 1` values of `T`, carried across blocks so the
    /// phase shifter's convolution window always has enough history.
    wx_history: Vec<f64>,
    finished: bool,
}

impl UhjEncoder {
    pub fn new(layout: Layout) -> Self {
        Self {
            panner: Panner::new(layout),
            phase_shifter: PhaseShifter::new(),
            s_delay: VecDeque::from(vec![0.0; FILTER_DELAY]),
            d_delay: VecDeque::from(vec![0.0; FILTER_DELAY]),
            wx_history: vec![0.0; KERNEL_LEN - 1],
            finished: false,
        }
    }

    /// Encode one block of planar input (`channels[c][i]` is channel `c`,
    /// frame `i`; every channel slice must have the same length) into
    /// interleaved `[left, right]` stereo frames.
    ///
    /// The returned block has the same frame count as the input; the real
    /// content is delayed by [`FILTER_DELAY`] frames relative to it. Call
    /// [`UhjEncoder::finish`] after the last block to flush the remaining
    /// `FILTER_DELAY` frames of lead-out.
    pub fn encode(&mut self, channels: &[Vec<f64>]) -> Vec<[f32; 2]> {
        let frame_count = channels.first().map_or(0, |c| c.len());
        debug_assert!(channels.iter().all(|c| c.len() == frame_count));

        let mut s_buf = vec![0.0f64; frame_count];
        let mut d_buf = vec![0.0f64; frame_count];
        let mut t_block = Vec::with_capacity(frame_count);

        let mut frame = vec![0.0f64; channels.len()];
        for i in 0..frame_count {
            for (c, samples) in channels.iter().enumerate() {
                frame[c] = samples[i];
            }
            let [w, x, y, _z] = self.panner.pan_frame(&frame);

            let s_now = S_W * w + S_X * x;
            let d_direct_now = D_Y * y;
            let t_now = T_W * w + T_X * x;

            self.s_delay.push_back(s_now);
            s_buf[i] = self.s_delay.pop_front().expect("delay line never empty");

            self.d_delay.push_back(d_direct_now);
            d_buf[i] = self.d_delay.pop_front().expect("delay line never empty");

            t_block.push(t_now);
        }

        let mut conv_input = Vec::with_capacity(self.wx_history.len() + t_block.len());
        conv_input.extend_from_slice(&self.wx_history);
        conv_input.extend_from_slice(&t_block);
        self.phase_shifter.process_accum(&mut d_buf, &conv_input);

        let history_start = conv_input.len() - (KERNEL_LEN - 1);
        self.wx_history.clear();
        self.wx_history
            .extend_from_slice(&conv_input[history_start..]);

        s_buf
            .iter()
            .zip(d_buf.iter())
            .map(|(&s, &d)| {
                [
                    clamp_output((0.5 * (s + d)) as f32),
                    clamp_output((0.5 * (s - d)) as f32),
                ]
            })
            .collect()
    }

    /// Flush the trailing `FILTER_DELAY` frames of lead-out by pushing
    /// silence through the pipeline. Idempotent after the first call.
    pub fn finish(&mut self) -> Vec<[f32; 2]> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let channel_count = self.panner_channel_count();
        let silence: Vec<Vec<f64>> = (0..channel_count)
            .map(|_| vec![0.0; FILTER_DELAY])
            .collect();
        self.encode(&silence)
    }

    fn panner_channel_count(&self) -> usize {
        self.panner.layout().channel_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_produces_silence_out() {
        let mut encoder = UhjEncoder::new(Layout::Stereo);
        let channels = vec![vec![0.0; 256], vec![0.0; 256]];
        let out = encoder.encode(&channels);
        assert!(out.iter().all(|[l, r]| *l == 0.0 && *r == 0.0));
    }

    #[test]
    fn output_length_matches_input_length() {
        let mut encoder = UhjEncoder::new(Layout::X51);
        let channels: Vec<Vec<f64>> = (0..6).map(|_| vec![0.0; 100]).collect();
        let out = encoder.encode(&channels);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn finish_flushes_exactly_filter_delay_frames() {
        let mut encoder = UhjEncoder::new(Layout::Stereo);
        let channels = vec![vec![0.0; 10], vec![0.0; 10]];
        encoder.encode(&channels);
        let tail = encoder.finish();
        assert_eq!(tail.len(), FILTER_DELAY);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut encoder = UhjEncoder::new(Layout::Stereo);
        let channels = vec![vec![0.0; 10], vec![0.0; 10]];
        encoder.encode(&channels);
        encoder.finish();
        assert!(encoder.finish().is_empty());
    }

    #[test]
    fn a_front_left_impulse_appears_filter_delay_frames_later() {
        let mut encoder = UhjEncoder::new(Layout::Stereo);
        let mut left = vec![0.0; FILTER_DELAY + 16];
        left[0] = 1.0;
        let channels = vec![left, vec![0.0; FILTER_DELAY + 16]];
        let out = encoder.encode(&channels);
        assert!(out[..FILTER_DELAY - 4].iter().all(|[l, r]| l.abs() < 1e-6 && r.abs() < 1e-6));
        let energy_after: f32 = out[FILTER_DELAY - 4..FILTER_DELAY + 16]
            .iter()
            .map(|[l, r]| l.abs() + r.abs())
            .sum();
        assert!(energy_after > 0.0);
    }

    /// A sustained W-only B-format signal settles to `0.5 * S_W * sqrt(2)`
    /// on both channels: the difference path carries no energy because `Y`
    /// is silent and the Hilbert-shifted `T` term decays to zero at DC.
    #[test]
    fn w_only_bformat_input_settles_to_the_documented_constant() {
        use approx::assert_abs_diff_eq;

        let mut encoder = UhjEncoder::new(Layout::BFormatWxyz);
        let frame_count = KERNEL_LEN + FILTER_DELAY + 64;
        let channels = vec![
            vec![1.0; frame_count],
            vec![0.0; frame_count],
            vec![0.0; frame_count],
            vec![0.0; frame_count],
        ];
        let out = encoder.encode(&channels);

        let expected = 0.5 * S_W * std::f64::consts::SQRT_2;
        for &[l, r] in &out[frame_count - 16..] {
            assert_abs_diff_eq!(l as f64, expected, epsilon = 1e-4);
            assert_abs_diff_eq!(r as f64, expected, epsilon = 1e-4);
        }
    }

    /// A pure `Y`-channel signal carries no `W`/`X` energy, so the sum
    /// path `S` is silent and the output is purely differential: `L = -R`.
    #[test]
    fn pure_y_channel_input_produces_antisymmetric_stereo() {
        let mut encoder = UhjEncoder::new(Layout::BFormatWxyz);
        let frame_count = 200;
        let y: Vec<f64> = (0..frame_count)
            .map(|i| 0.3 * (i as f64 * 0.1).sin())
            .collect();
        let channels = vec![vec![0.0; frame_count], vec![0.0; frame_count], y, vec![0.0; frame_count]];
        let out = encoder.encode(&channels);

        for &[l, r] in &out {
            assert!((l + r).abs() < 1e-6, "left {l} and right {r} should cancel");
        }
    }

    /// Encoding is linear in its input: scaling the input scales the
    /// output, and encoding a sum of signals matches summing their
    /// separately-encoded outputs, as long as nothing clips.
    #[test]
    fn encoding_is_linear_for_unclamped_signals() {
        use approx::assert_abs_diff_eq;

        let frame_count = 300;
        let signal_a: Vec<f64> = (0..frame_count).map(|i| 0.05 * (i as f64 * 0.05).sin()).collect();
        let signal_b: Vec<f64> = (0..frame_count).map(|i| 0.03 * (i as f64 * 0.13).cos()).collect();
        let sum: Vec<f64> = signal_a.iter().zip(&signal_b).map(|(a, b)| a + b).collect();
        let scaled: Vec<f64> = signal_a.iter().map(|a| a * 2.0).collect();
        let silent = vec![0.0; frame_count];

        let out_a = UhjEncoder::new(Layout::Stereo).encode(&[signal_a.clone(), silent.clone()]);
        let out_b = UhjEncoder::new(Layout::Stereo).encode(&[signal_b.clone(), silent.clone()]);
        let out_sum = UhjEncoder::new(Layout::Stereo).encode(&[sum, silent.clone()]);
        let out_scaled = UhjEncoder::new(Layout::Stereo).encode(&[scaled, silent]);

        for i in 0..frame_count {
            assert_abs_diff_eq!(out_sum[i][0], out_a[i][0] + out_b[i][0], epsilon = 1e-4);
            assert_abs_diff_eq!(out_sum[i][1], out_a[i][1] + out_b[i][1], epsilon = 1e-4);
            assert_abs_diff_eq!(out_scaled[i][0], out_a[i][0] * 2.0, epsilon = 1e-4);
            assert_abs_diff_eq!(out_scaled[i][1], out_a[i][1] * 2.0, epsilon = 1e-4);
        }
    }

    /// Splitting the same input across several `encode` calls must produce
    /// exactly the same output as one call over the whole block: the
    /// carried-over delay lines and convolution history must stitch blocks
    /// together with no seam.
    #[test]
    fn block_boundaries_do_not_change_the_output() {
        let frame_count = 500;
        let left: Vec<f64> = (0..frame_count).map(|i| 0.2 * (i as f64 * 0.07).sin()).collect();
        let right: Vec<f64> = (0..frame_count).map(|i| 0.2 * (i as f64 * 0.11).cos()).collect();

        let mut whole = UhjEncoder::new(Layout::Stereo);
        let out_whole = whole.encode(&[left.clone(), right.clone()]);

        let mut chunked = UhjEncoder::new(Layout::Stereo);
        let mut out_chunked = Vec::with_capacity(frame_count);
        for (l_chunk, r_chunk) in left.chunks(37).zip(right.chunks(37)) {
            out_chunked.extend(chunked.encode(&[l_chunk.to_vec(), r_chunk.to_vec()]));
        }

        assert_eq!(out_whole, out_chunked);
    }
}
