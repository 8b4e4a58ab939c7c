//! `DeviceNode` and the live device list.

use std::collections::HashMap;

use rt_core::Channels;

/// One record per audio device discovered on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceNode {
    /// Opaque 32-bit server handle.
    pub id: u32,
    /// Display name, from `node.description`/`node.nick`/`node.name`.
    pub name: String,
    /// Stable key, from `node.name`.
    pub dev_name: String,
    pub is_capture: bool,
    pub is_headphones: bool,
    /// Sample rate in Hz, 0 = unknown.
    pub sample_rate: u32,
    pub channels: Channels,
}

/// The live, eventually-consistent set of devices, keyed by server id.
///
/// Invariant: `id` is unique within the map; a node is removed atomically
/// on the server's `global_remove` event.
pub type DeviceList = HashMap<u32, DeviceNode>;

/// A named channel-position mask, ordered from largest to smallest so
/// that matching tries the biggest layout first.
pub struct PositionMask {
    pub channels: Channels,
    /// SPA channel-position IDs (`libspa::param::audio::AudioChannel`)
    /// required for a node's reported position array to match this layout.
    pub required: &'static [u32],
}

// Position IDs follow `libspa::param::audio::AudioChannel`'s numbering:
// FL=1 FR=2 FC=3 LFE=4 RL=5 RR=6 RC=9 SL=10 SR=11 TFL=19 TFR=21 TRL=22 TRR=24.
const FL: u32 = 1;
const FR: u32 = 2;
const FC: u32 = 3;
const LFE: u32 = 4;
const RL: u32 = 5;
const RR: u32 = 6;
const SL: u32 = 10;
const SR: u32 = 11;

pub const POSITION_MASKS: &[PositionMask] = &[
    PositionMask {
        channels: Channels::X71,
        required: &[FL, FR, FC, LFE, RL, RR, SL, SR],
    },
    PositionMask {
        channels: Channels::X61,
        required: &[FL, FR, FC, LFE, RL, RR, SL],
    },
    PositionMask {
        channels: Channels::X51,
        required: &[FL, FR, FC, LFE, SL, SR],
    },
    PositionMask {
        channels: Channels::X51,
        required: &[FL, FR, FC, LFE, RL, RR],
    },
    PositionMask {
        channels: Channels::Quad,
        required: &[FL, FR, RL, RR],
    },
    PositionMask {
        channels: Channels::Stereo,
        required: &[FL, FR],
    },
    PositionMask {
        channels: Channels::Mono,
        required: &[FC],
    },
];

/// Match a node's reported position array against [`POSITION_MASKS`],
/// trying largest to smallest; the first mask whose every required
/// position appears in `positions` wins.
pub fn match_position_mask(positions: &[u32]) -> Option<Channels> {
    POSITION_MASKS
        .iter()
        .find(|mask| mask.required.iter().all(|p| positions.contains(p)))
        .map(|mask| mask.channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_one_rear_matches_before_five_one_side() {
        let positions = [FL, FR, FC, LFE, RL, RR];
        assert_eq!(match_position_mask(&positions), Some(Channels::X51));
    }

    #[test]
    fn seven_one_beats_five_one_when_both_present() {
        let positions = [FL, FR, FC, LFE, RL, RR, SL, SR];
        assert_eq!(match_position_mask(&positions), Some(Channels::X71));
    }

    #[test]
    fn unrecognized_positions_return_none() {
        assert_eq!(match_position_mask(&[19, 21]), None);
    }
}
