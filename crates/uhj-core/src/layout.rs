//! Speaker layout tables and layout detection

use crate::{UhjError, UhjResult};

/// A single loudspeaker (or B-format) channel position, as it would be
/// read from an input file's channel map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPosition {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    RearLeft,
    RearRight,
    RearCenter,
    SideLeft,
    SideRight,
    TopFrontLeft,
    TopFrontRight,
    TopRearLeft,
    TopRearRight,
    AmbisonicW,
    AmbisonicX,
    AmbisonicY,
    AmbisonicZ,
}

/// One entry of a speaker map: a channel's identity and its panning
/// direction.
#[derive(Debug, Clone, Copy)]
pub struct SpeakerSlot {
    pub position: ChannelPosition,
    /// Azimuth in radians. Counter-clockwise, 0 = front, positive = left.
    pub azimuth: f64,
    /// Elevation in radians.
    pub elevation: f64,
}

const fn slot(position: ChannelPosition, azimuth_deg: f64, elevation_deg: f64) -> SpeakerSlot {
    SpeakerSlot {
        position,
        azimuth: azimuth_deg * std::f64::consts::PI / 180.0,
        elevation: elevation_deg * std::f64::consts::PI / 180.0,
    }
}

/// Recognized speaker layouts and direct ambisonic inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Stereo,
    Quad,
    X51,
    X51Rear,
    X71,
    X714,
    BFormatWxy,
    BFormatWxyz,
}

impl Layout {
    /// The ordered speaker map for this layout. Ambisonic layouts have no
    /// speaker map — they bypass panning entirely.
    pub fn speaker_map(self) -> &'static [SpeakerSlot] {
        use ChannelPosition::*;
        match self {
            Layout::Stereo => &[
                slot(FrontLeft, 30.0, 0.0),
                slot(FrontRight, -30.0, 0.0),
            ],
            Layout::Quad => &[
                slot(FrontLeft, 45.0, 0.0),
                slot(FrontRight, -45.0, 0.0),
                slot(RearLeft, 135.0, 0.0),
                slot(RearRight, -135.0, 0.0),
            ],
            Layout::X51 => &[
                slot(FrontLeft, 30.0, 0.0),
                slot(FrontRight, -30.0, 0.0),
                slot(FrontCenter, 0.0, 0.0),
                slot(Lfe, 0.0, 0.0),
                slot(SideLeft, 110.0, 0.0),
                slot(SideRight, -110.0, 0.0),
            ],
            Layout::X51Rear => &[
                slot(FrontLeft, 30.0, 0.0),
                slot(FrontRight, -30.0, 0.0),
                slot(FrontCenter, 0.0, 0.0),
                slot(Lfe, 0.0, 0.0),
                slot(RearLeft, 135.0, 0.0),
                slot(RearRight, -135.0, 0.0),
            ],
            Layout::X71 => &[
                slot(FrontLeft, 30.0, 0.0),
                slot(FrontRight, -30.0, 0.0),
                slot(FrontCenter, 0.0, 0.0),
                slot(Lfe, 0.0, 0.0),
                slot(SideLeft, 90.0, 0.0),
                slot(SideRight, -90.0, 0.0),
                slot(RearLeft, 150.0, 0.0),
                slot(RearRight, -150.0, 0.0),
            ],
            Layout::X714 => &[
                slot(FrontLeft, 30.0, 0.0),
                slot(FrontRight, -30.0, 0.0),
                slot(FrontCenter, 0.0, 0.0),
                slot(Lfe, 0.0, 0.0),
                slot(SideLeft, 90.0, 0.0),
                slot(SideRight, -90.0, 0.0),
                slot(RearLeft, 150.0, 0.0),
                slot(RearRight, -150.0, 0.0),
                slot(TopFrontLeft, 45.0, 35.0),
                slot(TopFrontRight, -45.0, 35.0),
                slot(TopRearLeft, 135.0, 35.0),
                slot(TopRearRight, -135.0, 35.0),
            ],
            Layout::BFormatWxy | Layout::BFormatWxyz => &[],
        }
    }

    pub fn channel_count(self) -> usize {
        match self {
            Layout::BFormatWxy => 3,
            Layout::BFormatWxyz => 4,
            other => other.speaker_map().len(),
        }
    }

    pub fn is_ambisonic(self) -> bool {
        matches!(self, Layout::BFormatWxy | Layout::BFormatWxyz)
    }
}

/// A mask used to recognize a speaker layout from an explicit channel map:
/// every position listed must be present in the input.
struct LayoutMask {
    layout: Layout,
    required: &'static [ChannelPosition],
}

const LAYOUT_MASKS: &[LayoutMask] = &[
    LayoutMask {
        layout: Layout::X714,
        required: &[
            ChannelPosition::FrontLeft,
            ChannelPosition::FrontRight,
            ChannelPosition::FrontCenter,
            ChannelPosition::SideLeft,
            ChannelPosition::SideRight,
            ChannelPosition::RearLeft,
            ChannelPosition::RearRight,
            ChannelPosition::TopFrontLeft,
            ChannelPosition::TopFrontRight,
            ChannelPosition::TopRearLeft,
            ChannelPosition::TopRearRight,
        ],
    },
    LayoutMask {
        layout: Layout::X71,
        required: &[
            ChannelPosition::FrontLeft,
            ChannelPosition::FrontRight,
            ChannelPosition::FrontCenter,
            ChannelPosition::SideLeft,
            ChannelPosition::SideRight,
            ChannelPosition::RearLeft,
            ChannelPosition::RearRight,
        ],
    },
    LayoutMask {
        layout: Layout::X51,
        required: &[
            ChannelPosition::FrontLeft,
            ChannelPosition::FrontRight,
            ChannelPosition::FrontCenter,
            ChannelPosition::SideLeft,
            ChannelPosition::SideRight,
        ],
    },
    LayoutMask {
        layout: Layout::X51Rear,
        required: &[
            ChannelPosition::FrontLeft,
            ChannelPosition::FrontRight,
            ChannelPosition::FrontCenter,
            ChannelPosition::RearLeft,
            ChannelPosition::RearRight,
        ],
    },
    LayoutMask {
        layout: Layout::Quad,
        required: &[
            ChannelPosition::FrontLeft,
            ChannelPosition::FrontRight,
            ChannelPosition::RearLeft,
            ChannelPosition::RearRight,
        ],
    },
    LayoutMask {
        layout: Layout::Stereo,
        required: &[ChannelPosition::FrontLeft, ChannelPosition::FrontRight],
    },
];

/// Detect a B-format identity from an explicit channel map, if the special
/// ambisonic channel-position IDs are present.
fn detect_bformat(map: &[ChannelPosition]) -> Option<Layout> {
    let has = |p: ChannelPosition| map.contains(&p);
    if has(ChannelPosition::AmbisonicW)
        && has(ChannelPosition::AmbisonicX)
        && has(ChannelPosition::AmbisonicY)
    {
        if has(ChannelPosition::AmbisonicZ) {
            return Some(Layout::BFormatWxyz);
        }
        return Some(Layout::BFormatWxy);
    }
    None
}

/// Detect the speaker layout of an input file from its explicit channel map
/// (if any) or its channel count.
pub fn detect_layout(
    num_channels: usize,
    explicit_map: Option<&[ChannelPosition]>,
) -> UhjResult<Layout> {
    if let Some(map) = explicit_map {
        if let Some(bformat) = detect_bformat(map) {
            return Ok(bformat);
        }

        for mask in LAYOUT_MASKS {
            if mask.layout.channel_count() == num_channels
                && mask.required.iter().all(|p| map.contains(p))
            {
                return Ok(mask.layout);
            }
        }

        let unknown: Vec<String> = map.iter().map(|p| format!("{p:?}")).collect();
        log::warn!("unrecognized channel map for {num_channels}-channel input: {unknown:?}");
        return Err(UhjError::UnrecognizedChannelMap(unknown));
    }

    // No explicit map: fall back to WFX ordering by channel count. Ambisonic
    // files conventionally carry no positional channel mask at all, so a
    // bare 3- or 4-channel file is assumed to be B-format.
    match num_channels {
        2 => Ok(Layout::Stereo),
        3 => Ok(Layout::BFormatWxy),
        4 => Ok(Layout::BFormatWxyz),
        6 => Ok(Layout::X51),
        8 => Ok(Layout::X71),
        other => {
            log::warn!("unrecognized channel count with no channel map: {other}");
            Err(UhjError::UnrecognizedChannelMap(vec![format!(
                "{other} channels, no map"
            )]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelPosition::*;

    #[test]
    fn stereo_falls_back_to_wfx_without_a_map() {
        assert_eq!(detect_layout(2, None).unwrap(), Layout::Stereo);
    }

    #[test]
    fn five_one_falls_back_to_wfx_without_a_map() {
        assert_eq!(detect_layout(6, None).unwrap(), Layout::X51);
    }

    #[test]
    fn four_channels_without_a_map_is_assumed_bformat() {
        assert_eq!(detect_layout(4, None).unwrap(), Layout::BFormatWxyz);
    }

    #[test]
    fn detects_five_one_rear_from_explicit_map() {
        let map = [FrontLeft, FrontRight, FrontCenter, Lfe, RearLeft, RearRight];
        assert_eq!(detect_layout(6, Some(&map)).unwrap(), Layout::X51Rear);
    }

    #[test]
    fn detects_five_one_side_from_explicit_map() {
        let map = [FrontLeft, FrontRight, FrontCenter, Lfe, SideLeft, SideRight];
        assert_eq!(detect_layout(6, Some(&map)).unwrap(), Layout::X51);
    }

    #[test]
    fn detects_bformat_wxyz() {
        let map = [AmbisonicW, AmbisonicX, AmbisonicY, AmbisonicZ];
        assert_eq!(detect_layout(4, Some(&map)).unwrap(), Layout::BFormatWxyz);
    }

    #[test]
    fn detects_quad_when_not_bformat() {
        let map = [FrontLeft, FrontRight, RearLeft, RearRight];
        assert_eq!(detect_layout(4, Some(&map)).unwrap(), Layout::Quad);
    }

    #[test]
    fn unrecognized_map_is_an_error() {
        let map = [TopFrontLeft, TopFrontRight, TopRearLeft];
        assert!(detect_layout(3, Some(&map)).is_err());
    }
}
