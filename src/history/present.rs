//! Presentation rules for history diffs.
//!
//! Whether a change is good news depends on the metric, not on the sign of the delta, so this
//! mapping lives apart from the diff itself.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Favorability {
    Favorable,
    Unfavorable,
    Neutral,
}

impl Favorability {
    fn from_sign(value: i64) -> Self {
        match value.signum() {
            1 => Favorability::Favorable,
            -1 => Favorability::Unfavorable,
            _ => Favorability::Neutral,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Favorability::Favorable => "better",
            Favorability::Unfavorable => "worse",
            Favorability::Neutral => "unchanged",
        }
    }
}

/// More clusters means more distinct behaviour groups were surfaced.
pub fn cluster_delta_favorability(delta: i64) -> Favorability {
    Favorability::from_sign(delta)
}

/// Fewer noise steps is the improvement, so the sign is inverted.
pub fn noise_delta_favorability(delta: i64) -> Favorability {
    Favorability::from_sign(-delta)
}

/// `+3`, `-2`, `0`.
pub fn signed(delta: i64) -> String {
    if delta > 0 {
        format!("+{delta}")
    } else {
        delta.to_string()
    }
}
