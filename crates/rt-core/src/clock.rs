//! Clock and latency newtypes for the playback/capture clock-latency query

/// Mixer clock time, in nanoseconds, as reported by the application's mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClockTime(pub i64);

/// Output/input latency, in nanoseconds. Always non-negative.Latency >= 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Latency(i64);

impl Latency {
    pub fn from_nanos(nanos: i64) -> Self {
        Latency(nanos.max(0))
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

/// Result of a clock-latency query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockLatency {
    pub clock_time: ClockTime,
    pub latency: Latency,
}

/// Compute `frames * 1_000_000_000 / rate` nanoseconds, saturating instead
/// of overflowing a signed 64-bit value.
///
/// On large buffer sizes `frames * 1_000_000_000` can overflow `i64` before
/// the division by `rate` brings it back down. Widen to `i128` for the
/// intermediate product and saturate on the way back down.
pub fn frames_to_nanos_saturating(frames: u64, rate: u32) -> i64 {
    if rate == 0 {
        return 0;
    }
    let nanos = (frames as i128) * 1_000_000_000i128 / (rate as i128);
    nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_clamps_negative_to_zero() {
        assert_eq!(Latency::from_nanos(-5).as_nanos(), 0);
        assert_eq!(Latency::from_nanos(5).as_nanos(), 5);
    }

    #[test]
    fn frames_to_nanos_matches_naive_for_small_values() {
        assert_eq!(frames_to_nanos_saturating(48_000, 48_000), 1_000_000_000);
        assert_eq!(frames_to_nanos_saturating(0, 48_000), 0);
    }

    #[test]
    fn frames_to_nanos_saturates_instead_of_overflowing() {
        // Large enough that frames * 1e9 overflows i64 before dividing by a
        // tiny rate; must saturate rather than wrap/panic.
        let result = frames_to_nanos_saturating(u64::MAX, 1);
        assert_eq!(result, i64::MAX);
    }

    #[test]
    fn frames_to_nanos_handles_zero_rate() {
        assert_eq!(frames_to_nanos_saturating(1024, 0), 0);
    }
}
