use crate::error::{ClientError, Result};
use crate::gateway::ClusterGateway;
use crate::model::HistoryRecord;
use serde::Serialize;
use std::collections::BTreeSet;

/// Record ids the user ticked in the history table, in the order they were ticked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySelection {
    ids: Vec<i64>,
}

impl HistorySelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add ids to the selection, ignoring ones already selected.
    pub fn select_all(&mut self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Comparison is offered only for exactly two records.
    pub fn can_compare(&self) -> bool {
        self.ids.len() == 2
    }

    pub fn pair(&self) -> Result<(i64, i64)> {
        match self.ids.as_slice() {
            [a, b] => Ok((*a, *b)),
            other => Err(ClientError::InvalidSelection {
                selected: other.len(),
            }),
        }
    }
}

impl FromIterator<i64> for HistorySelection {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        let mut selection = Self::new();
        selection.select_all(iter);
        selection
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    pub cluster_count_delta: i64,
    pub noise_count_delta: i64,
    pub new_labels: BTreeSet<String>,
    pub disappeared_labels: BTreeSet<String>,
    pub common_labels: BTreeSet<String>,
}

/// How the label sets of two runs relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOutcome {
    /// Neither run carried any labels.
    NoLabelData,
    Identical,
    Changed,
}

impl ComparisonResult {
    pub fn label_outcome(&self) -> LabelOutcome {
        if self.new_labels.is_empty() && self.disappeared_labels.is_empty() {
            if self.common_labels.is_empty() {
                LabelOutcome::NoLabelData
            } else {
                LabelOutcome::Identical
            }
        } else {
            LabelOutcome::Changed
        }
    }
}

fn delta(later: u64, earlier: u64) -> i64 {
    let later = i64::try_from(later).unwrap_or(i64::MAX);
    let earlier = i64::try_from(earlier).unwrap_or(i64::MAX);
    later.saturating_sub(earlier)
}

/// Diff two runs. `records` must hold exactly the two selected runs, older-selected first.
pub fn compare(
    records: &[HistoryRecord],
    labels1: &BTreeSet<String>,
    labels2: &BTreeSet<String>,
) -> Result<ComparisonResult> {
    let [record1, record2] = records else {
        return Err(ClientError::InvalidSelection {
            selected: records.len(),
        });
    };

    Ok(ComparisonResult {
        cluster_count_delta: delta(record2.total_clusters, record1.total_clusters),
        noise_count_delta: delta(record2.noise_count, record1.noise_count),
        new_labels: labels2.difference(labels1).cloned().collect(),
        disappeared_labels: labels1.difference(labels2).cloned().collect(),
        common_labels: labels1.intersection(labels2).cloned().collect(),
    })
}

/// Both runs and their diff, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub record1: HistoryRecord,
    pub record2: HistoryRecord,
    pub result: ComparisonResult,
}

/// Compare the two selected runs. An invalid selection fails before any request is made.
pub async fn compare_selected(
    gateway: &dyn ClusterGateway,
    selection: &HistorySelection,
) -> Result<ComparisonReport> {
    let (id1, id2) = selection.pair()?;
    let response = gateway.compare_history(id1, id2).await?;

    let common: BTreeSet<String> = response.common_labels.into_iter().collect();
    let labels1: BTreeSet<String> = response
        .disappeared_labels
        .into_iter()
        .chain(common.iter().cloned())
        .collect();
    let labels2: BTreeSet<String> = response
        .new_labels
        .into_iter()
        .chain(common.iter().cloned())
        .collect();

    let records = [response.record1, response.record2];
    let result = compare(&records, &labels1, &labels2)?;
    let [record1, record2] = records;
    Ok(ComparisonReport {
        record1,
        record2,
        result,
    })
}
