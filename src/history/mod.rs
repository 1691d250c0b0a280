//! Comparison of past clustering runs.

mod compare;
mod present;

pub use compare::{
    compare_selected, ComparisonReport, ComparisonResult, HistorySelection, LabelOutcome,
};
pub use present::{cluster_delta_favorability, noise_delta_favorability, signed, Favorability};
