//! Text rendering for CLI output.
//!
//! Everything here turns engine state into human-readable lines; nothing talks to the network.

use crate::history::{
    cluster_delta_favorability, noise_delta_favorability, signed, ComparisonReport,
    ComparisonResult, Favorability, LabelOutcome,
};
use crate::import::{FieldResolution, FieldRow, MappingPresentation};
use crate::model::{
    ClusterDetail, ClusterInfo, ClusterSummary, HistoryRecord, ImportReport, ImportStatus,
    InitialView,
};
use crate::orchestrator::RunningProgress;

/// `1m 5s`, `42s`, or `-` when unknown.
pub(crate) fn format_elapsed(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() && s > 0.0 => {
            let total = s.round() as u64;
            let (m, s) = (total / 60, total % 60);
            if m > 0 {
                format!("{m}m {s}s")
            } else {
                format!("{s}s")
            }
        }
        _ => "-".to_string(),
    }
}

pub(crate) fn progress_line(p: &RunningProgress) -> String {
    format!(
        "[{}/{}] {} {:>3}% ({}) {}",
        p.phase_index,
        p.total_phases,
        p.phase_name,
        p.overall_progress,
        format_elapsed(Some(p.elapsed_seconds)),
        p.display_detail()
    )
}

pub(crate) fn summary_line(r: &ClusterSummary) -> String {
    format!(
        "Clustering complete: {} clusters, {} noise steps (threshold {:.2})",
        r.total_clusters, r.noise_count, r.threshold
    )
}

pub(crate) fn initial_view_line(view: &InitialView) -> String {
    match view {
        InitialView::Running(p) => format!("Clustering in progress: {}", progress_line(p)),
        InitialView::Available {
            cluster_count,
            last_result,
        } => match last_result {
            Some(r) => format!(
                "{cluster_count} clusters available ({} noise steps, threshold {:.2})",
                r.noise_count, r.threshold
            ),
            None => format!("{cluster_count} clusters available"),
        },
        InitialView::NotYetRun => "Clustering has not been run yet".to_string(),
        InitialView::Failed { message } => format!("Last clustering run failed: {message}"),
    }
}

pub(crate) fn cluster_lines(clusters: &[ClusterInfo]) -> Vec<String> {
    if clusters.is_empty() {
        return vec!["No clusters".to_string()];
    }
    let mut lines = vec![format!("{:>6}  {:>6}  {:>6}  LABEL", "ID", "STEPS", "CASES")];
    for c in clusters {
        let label = if c.label.is_empty() { "-" } else { &c.label };
        lines.push(format!(
            "{:>6}  {:>6}  {:>6}  {label}",
            c.cluster_id, c.step_count, c.case_count
        ));
    }
    lines
}

pub(crate) fn cluster_detail_lines(detail: &ClusterDetail) -> Vec<String> {
    let c = &detail.cluster;
    let mut lines = vec![
        format!("Cluster #{}: {}", c.cluster_id, c.label),
        format!("Steps: {}  Cases: {}", c.step_count, c.case_count),
    ];
    if detail.steps.is_empty() {
        lines.push("No steps".to_string());
        return lines;
    }
    lines.push(format!("{:<14}  {:>4}  {:<24}  OPERATION", "CASE", "STEP", "TITLE"));
    for s in &detail.steps {
        lines.push(format!(
            "{:<14}  {:>4}  {:<24}  {}",
            s.case_id, s.step_no, s.case_title, s.operation
        ));
    }
    lines
}

pub(crate) fn history_lines(records: &[HistoryRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No clustering history".to_string()];
    }
    let mut lines = vec![format!(
        "  {:>5}  {:<19}  {:<16}  {:>9}  {:>8}  {:>5}  {:>5}  {:>7}",
        "ID", "RUN TIME", "MODEL", "THRESHOLD", "CLUSTERS", "NOISE", "STEPS", "ELAPSED"
    )];
    for r in records {
        let marker = if r.is_current { '*' } else { ' ' };
        let threshold = r
            .similarity_threshold
            .map(|t| format!("{t:.2}"))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{marker} {:>5}  {:<19}  {:<16}  {:>9}  {:>8}  {:>5}  {:>5}  {:>7}",
            r.id,
            r.run_time.as_deref().unwrap_or("-"),
            r.model_label(),
            threshold,
            r.total_clusters,
            r.noise_count,
            r.total_steps,
            format_elapsed(r.elapsed_seconds),
        ));
    }
    lines.push("(* current result)".to_string());
    lines
}

fn run_heading(r: &HistoryRecord) -> String {
    format!(
        "#{} {} ({}, threshold {})",
        r.id,
        r.run_time.as_deref().unwrap_or("-"),
        r.model_label(),
        r.similarity_threshold
            .map(|t| format!("{t:.2}"))
            .unwrap_or_else(|| "-".to_string()),
    )
}

fn delta_text(before: u64, after: u64, delta: i64, favorability: Favorability) -> String {
    format!(
        "{before} -> {after} ({}, {})",
        signed(delta),
        favorability.label()
    )
}

pub(crate) fn comparison_lines(report: &ComparisonReport) -> Vec<String> {
    let result = &report.result;
    let mut lines = vec![
        format!("Run A: {}", run_heading(&report.record1)),
        format!("Run B: {}", run_heading(&report.record2)),
        format!(
            "Clusters: {}",
            delta_text(
                report.record1.total_clusters,
                report.record2.total_clusters,
                result.cluster_count_delta,
                cluster_delta_favorability(result.cluster_count_delta),
            )
        ),
        format!(
            "Noise:    {}",
            delta_text(
                report.record1.noise_count,
                report.record2.noise_count,
                result.noise_count_delta,
                noise_delta_favorability(result.noise_count_delta),
            )
        ),
    ];
    lines.extend(label_lines(result));
    lines
}

fn label_lines(result: &ComparisonResult) -> Vec<String> {
    match result.label_outcome() {
        LabelOutcome::NoLabelData => vec!["No label data for either run".to_string()],
        LabelOutcome::Identical => vec![format!(
            "Labels identical ({} shared)",
            result.common_labels.len()
        )],
        LabelOutcome::Changed => {
            let mut lines = vec![format!("New labels ({}):", result.new_labels.len())];
            lines.extend(result.new_labels.iter().map(|l| format!("  + {l}")));
            lines.push(format!(
                "Disappeared labels ({}):",
                result.disappeared_labels.len()
            ));
            lines.extend(result.disappeared_labels.iter().map(|l| format!("  - {l}")));
            lines.push(format!("Unchanged labels: {}", result.common_labels.len()));
            lines
        }
    }
}

fn mapping_row(row: &FieldRow, headers: &[String]) -> String {
    let state = match &row.resolution {
        FieldResolution::Resolved { index, column } => format!("{column} (column {index})"),
        FieldResolution::Prompt { selected: Some(i) } => {
            let column = headers.get(*i).map(String::as_str).unwrap_or("?");
            format!("{column} (column {i}, selected)")
        }
        FieldResolution::Prompt { selected: None } => "-- Select Column --".to_string(),
        FieldResolution::Missing => "not found".to_string(),
    };
    format!(
        "{:<10} {:<12} {state}",
        row.field.as_str(),
        row.field.description()
    )
}

pub(crate) fn mapping_lines(view: &MappingPresentation) -> Vec<String> {
    let mut lines: Vec<String> = view
        .rows
        .iter()
        .map(|row| mapping_row(row, &view.headers))
        .collect();
    if !view.extra_columns.is_empty() {
        lines.push(format!("Extra columns: {}", view.extra_columns.join(", ")));
    }
    if view.auto_confirmed {
        lines.push("All required columns were detected automatically".to_string());
    } else {
        lines.push(format!("Available columns: {}", view.headers.join(", ")));
    }
    lines
}

pub(crate) fn import_report_lines(report: &ImportReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Imported {} cases, {} steps",
        report.cases_imported, report.steps_imported
    )];
    lines.extend(report.warnings.iter().map(|w| format!("warning: {w}")));
    lines
}

pub(crate) fn import_status_line(status: &ImportStatus) -> String {
    format!(
        "{} cases, {} steps (last import: {})",
        status.case_count,
        status.step_count,
        status.last_import_time.as_deref().unwrap_or("never")
    )
}
