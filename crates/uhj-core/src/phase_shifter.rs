//! Wideband +90° phase shifter (Hilbert transformer)
//!
//! A fixed-tap FIR approximating a wideband +90° phase shift across the
//! audio band. Filter length is `2 * FILTER_DELAY`; the intrinsic group
//! delay introduced by the filter is exactly `FILTER_DELAY` samples.

use std::f64::consts::PI;

/// Samples of latency the filter introduces.
pub const FILTER_DELAY: usize = 1024;

/// Number of FIR taps: `2 * FILTER_DELAY`.
pub const KERNEL_LEN: usize = 2 * FILTER_DELAY;

/// Wideband +90° phase shifter.
///
/// Coefficients are a windowed approximation of the ideal discrete Hilbert
/// transformer, centered on a half-sample offset so that the realized
/// filter has an exact integer-sample group delay of `FILTER_DELAY`.
pub struct PhaseShifter {
    coeffs: Box<[f64; KERNEL_LEN]>,
}

impl PhaseShifter {
    pub fn new() -> Self {
        let mut coeffs = Box::new([0.0f64; KERNEL_LEN]);
        let n = KERNEL_LEN as f64;

        for (i, coeff) in coeffs.iter_mut().enumerate() {
            // Half-sample-centered tap position; never zero, so the ideal
            // Hilbert response (2/pi)*sin^2(pi*k/2)/k = (1-cos(pi*k))/(pi*k)
            // is well-defined at every tap.
            let k = i as f64 - FILTER_DELAY as f64 + 0.5;
            let ideal = (1.0 - (PI * k).cos()) / (PI * k);

            // Blackman window to taper the truncated ideal response and
            // control stopband ripple.
            let w = 0.42 - 0.5 * (2.0 * PI * i as f64 / (n - 1.0)).cos()
                + 0.08 * (4.0 * PI * i as f64 / (n - 1.0)).cos();

            *coeff = ideal * w;
        }

        Self { coeffs }
    }

    /// Convolve `input` against the kernel and accumulate into `output`.
    ///
    /// `input` must hold `output.len() + KERNEL_LEN - 1` samples: the first
    /// `KERNEL_LEN - 1` are history carried from the previous call, the
    /// remainder the current block. The caller is responsible for keeping
    /// that history (see [`crate::UhjEncoder`]'s `WXHistory`).
    pub fn process_accum(&self, output: &mut [f64], input: &[f64]) {
        assert!(
            input.len() >= output.len() + KERNEL_LEN - 1,
            "process_accum: input too short for output length"
        );

        for (j, out) in output.iter_mut().enumerate() {
            let window = &input[j..j + KERNEL_LEN];
            let mut acc = 0.0;
            for (sample, coeff) in window.iter().zip(self.coeffs.iter()) {
                acc += sample * coeff;
            }
            *out += acc;
        }
    }
}

impl Default for PhaseShifter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn impulse_response_is_delayed_by_filter_delay() {
        let shifter = PhaseShifter::new();
        let mut input = vec![0.0f64; KERNEL_LEN - 1 + 1];
        // Impulse at the start of "current" history so it lands at tap 0
        // of the kernel when output index 0 is computed.
        input[0] = 1.0;
        let mut output = vec![0.0f64; 1];
        shifter.process_accum(&mut output, &input);
        assert_abs_diff_eq!(output[0], shifter.coeffs[0], epsilon = 1e-12);
    }

    #[test]
    fn kernel_energy_concentrates_near_the_filter_delay_tap() {
        // The Hilbert response peaks near its half-sample-centered taps
        // (indices FILTER_DELAY-1 and FILTER_DELAY) and decays away from
        // them; a tap far from center should be much smaller.
        let shifter = PhaseShifter::new();
        let near = shifter.coeffs[FILTER_DELAY - 1].abs();
        let far = shifter.coeffs[0].abs();
        assert!(near > far, "near={near} far={far}");
    }

    #[test]
    fn accumulates_rather_than_overwrites() {
        let shifter = PhaseShifter::new();
        let input = vec![0.1f64; KERNEL_LEN - 1 + 4];

        let mut from_zero = vec![0.0f64; 4];
        shifter.process_accum(&mut from_zero, &input);

        let mut from_base = vec![2.5f64; 4];
        shifter.process_accum(&mut from_base, &input);

        for (zero, base) in from_zero.iter().zip(from_base.iter()) {
            assert_abs_diff_eq!(*base, zero + 2.5, epsilon = 1e-9);
        }
    }
}
