//! Shared tagged-sum parser over the server's POD-encoded `EnumFormat`
//! values.
//!
//! A single-value field may arrive three ways: a bare value (`None`), an
//! inclusive range (`Range`), or an explicit default-plus-alternatives
//! list (`Enum`). `node_proxy`'s rate field and `metadata_proxy`'s default
//! device payload both need this same three-way switch, so it lives here
//! once.

use libspa::utils::{Choice, ChoiceEnum};

/// A single int-valued POD field, resolved from its wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodValue {
    None(i32),
    Range { default: i32, min: i32, max: i32 },
    Enum { default: i32, alternatives: Vec<i32> },
}

impl PodValue {
    pub fn from_choice(choice: &Choice<i32>) -> Self {
        match &choice.1 {
            ChoiceEnum::None(v) => PodValue::None(*v),
            ChoiceEnum::Range { default, min, max } => PodValue::Range {
                default: *default,
                min: *min,
                max: *max,
            },
            ChoiceEnum::Enum { default, alternatives } => PodValue::Enum {
                default: *default,
                alternatives: alternatives.clone(),
            },
            // Step/Flags choices do not appear on the fields this parser
            // handles (rate, default-device payload); treat conservatively.
            _ => PodValue::None(0),
        }
    }

    /// The value to prefer before range validation.
    fn default_value(&self) -> i32 {
        match self {
            PodValue::None(v) => *v,
            PodValue::Range { default, .. } => *default,
            PodValue::Enum { default, .. } => *default,
        }
    }

    /// Resolve to a single rate within `[min_rate, max_rate]`:
    /// prefer the default clamped into range; for `Enum`, if the default
    /// falls outside the range, take the first alternative inside it.
    pub fn resolve_rate(&self, min_rate: u32, max_rate: u32) -> u32 {
        let in_range = |v: i32| v >= min_rate as i32 && v <= max_rate as i32;
        let default = self.default_value();

        if in_range(default) {
            return default as u32;
        }

        if let PodValue::Enum { alternatives, .. } = self {
            if let Some(&alt) = alternatives.iter().find(|&&a| in_range(a)) {
                return alt as u32;
            }
        }

        default.clamp(min_rate as i32, max_rate as i32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_value_clamps_into_range() {
        let v = PodValue::None(4_000);
        assert_eq!(v.resolve_rate(8_000, 192_000), 8_000);
    }

    #[test]
    fn range_prefers_in_range_default() {
        let v = PodValue::Range { default: 48_000, min: 8_000, max: 192_000 };
        assert_eq!(v.resolve_rate(8_000, 192_000), 48_000);
    }

    #[test]
    fn enum_falls_back_to_first_in_range_alternative() {
        let v = PodValue::Enum {
            default: 384_000,
            alternatives: vec![384_000, 96_000, 44_100],
        };
        assert_eq!(v.resolve_rate(8_000, 192_000), 96_000);
    }

    #[test]
    fn enum_prefers_default_when_in_range() {
        let v = PodValue::Enum {
            default: 48_000,
            alternatives: vec![44_100, 96_000],
        };
        assert_eq!(v.resolve_rate(8_000, 192_000), 48_000);
    }
}
