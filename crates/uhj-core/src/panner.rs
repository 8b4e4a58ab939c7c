//! Virtual-speaker panning: maps input channels into the W/X/Y/Z
//! ambisonic intermediate ahead of UHJ encoding.

use crate::layout::{ChannelPosition, Layout};

/// FuMa (Furse-Malham) directional gain for a single speaker at the given
/// azimuth/elevation, relative to an omnidirectional (W) gain of 1.0.
const FUMA_GAIN: f64 = std::f64::consts::SQRT_2;

/// Pans input channels into a 4-slot `[W, X, Y, Z]` ambisonic accumulator.
///
/// Speaker layouts are panned per-channel using FuMa directional gains.
/// Direct B-format inputs bypass panning entirely and are copied straight
/// through, since they already carry W/X/Y/Z components.
pub struct Panner {
    layout: Layout,
}

impl Panner {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Pan one frame (one sample per input channel, in speaker-map order)
    /// into `[w, x, y, z]`.
    pub fn pan_frame(&self, frame: &[f64]) -> [f64; 4] {
        if self.layout.is_ambisonic() {
            return self.bypass_frame(frame);
        }

        let mut acc = [0.0f64; 4];
        let map = self.layout.speaker_map();
        debug_assert_eq!(map.len(), frame.len());

        for (slot, &sample) in map.iter().zip(frame.iter()) {
            if slot.position == ChannelPosition::Lfe {
                // The LFE channel carries no directional information and
                // is excluded from the ambisonic mix.
                continue;
            }

            let cos_el = slot.elevation.cos();
            acc[0] += sample; // W: omnidirectional, unit gain
            acc[1] += sample * FUMA_GAIN * slot.azimuth.cos() * cos_el;
            acc[2] += sample * FUMA_GAIN * slot.azimuth.sin() * cos_el;
            acc[3] += sample * FUMA_GAIN * slot.elevation.sin();
        }

        acc
    }

    fn bypass_frame(&self, frame: &[f64]) -> [f64; 4] {
        // Input is assumed already FuMa-normalized B-format; every channel
        // is scaled by FUMA_GAIN, matching the panned path's directional
        // gain, Z is zero for 3-channel (W/X/Y) input.
        match self.layout {
            Layout::BFormatWxy => {
                [frame[0] * FUMA_GAIN, frame[1] * FUMA_GAIN, frame[2] * FUMA_GAIN, 0.0]
            }
            Layout::BFormatWxyz => [
                frame[0] * FUMA_GAIN,
                frame[1] * FUMA_GAIN,
                frame[2] * FUMA_GAIN,
                frame[3] * FUMA_GAIN,
            ],
            _ => unreachable!("bypass_frame called on a non-ambisonic layout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_front_left_pans_mostly_to_x_and_y() {
        let panner = Panner::new(Layout::Stereo);
        let [w, x, y, z] = panner.pan_frame(&[1.0, 0.0]);
        assert_eq!(w, 1.0);
        assert!(x > 0.0);
        assert!(y > 0.0);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn five_one_lfe_channel_contributes_nothing() {
        let panner = Panner::new(Layout::X51);
        let silent_except_lfe = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let acc = panner.pan_frame(&silent_except_lfe);
        assert_eq!(acc, [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn bformat_wxyz_bypass_scales_every_channel_by_sqrt2() {
        let panner = Panner::new(Layout::BFormatWxyz);
        let acc = panner.pan_frame(&[0.5, 0.25, -0.25, 0.1]);
        assert_eq!(acc, [0.5 * FUMA_GAIN, 0.25 * FUMA_GAIN, -0.25 * FUMA_GAIN, 0.1 * FUMA_GAIN]);
    }

    #[test]
    fn bformat_wxy_has_zero_z() {
        let panner = Panner::new(Layout::BFormatWxy);
        let acc = panner.pan_frame(&[0.5, 0.25, -0.25]);
        assert_eq!(acc[3], 0.0);
    }
}
