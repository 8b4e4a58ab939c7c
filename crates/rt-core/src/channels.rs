//! Device channel layout enumeration

/// Speaker layout reported by a device node.
///
/// Mirrors the set of layouts a node's `EnumFormat` position array can be
/// matched against (see `rt_backend::node_proxy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    Mono,
    Stereo,
    Quad,
    X51,
    X61,
    X71,
    Ambi3D,
    Invalid,
}

impl Channels {
    /// Number of channels this layout carries, or `None` for `Invalid`.
    pub fn count(self) -> Option<u32> {
        match self {
            Channels::Mono => Some(1),
            Channels::Stereo => Some(2),
            Channels::Quad => Some(4),
            Channels::X51 => Some(6),
            Channels::X61 => Some(7),
            Channels::X71 => Some(8),
            Channels::Ambi3D => Some(4),
            Channels::Invalid => None,
        }
    }

    /// Fallback heuristic used when a node reports a channel count but no
    /// explicit position array.
    pub fn from_count(count: u32) -> Self {
        if count >= 2 { Channels::Stereo } else { Channels::Mono }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Channels::Invalid
    }
}
