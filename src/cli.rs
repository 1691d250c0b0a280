use crate::config::{Overrides, Settings};
use crate::error::ClientError;
use crate::gateway::{ClusterGateway, HttpGateway, ImportGateway};
use crate::history::{compare_selected, HistorySelection};
use crate::import::{ColumnReconciler, RequiredField};
use crate::model::{ClusterInfo, ClusterSummary, InitialView, JobEvent};
use crate::orchestrator::{JobController, JobStatus, ResultsRefresher, TokioScheduler};
use crate::text_summary;
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Notify};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "casecluster",
    version,
    about = "Client for the test-case clustering service"
)]
pub struct Cli {
    /// Base URL of the clustering service (overrides the settings file)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Interval between status polls while a job runs (e.g. 2s, 500ms)
    #[arg(long, global = true)]
    pub poll_interval: Option<humantime::Duration>,

    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start a clustering run and watch it until it finishes
    Run {
        /// Similarity threshold (server accepts 0.5 to 0.95)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Show the clustering job state
    Status {
        /// Keep watching if a job is running
        #[arg(long)]
        watch: bool,
    },
    /// List clusters of the current result or of a history record
    Clusters {
        #[arg(long)]
        history_id: Option<i64>,
        /// Show one cluster of the current result with its steps
        #[arg(long, conflicts_with = "history_id")]
        id: Option<i64>,
    },
    /// Download the current result as a zip of Excel workbooks
    Export {
        #[arg(short, long, default_value = "clustering_results.zip")]
        output: PathBuf,
    },
    /// Past clustering runs
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Import test cases from an Excel workbook
    Import {
        #[command(subcommand)]
        action: ImportCommand,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum HistoryCommand {
    List,
    /// Compare exactly two runs
    Compare { ids: Vec<i64> },
    /// Make a past run the current result
    Activate { id: i64 },
    Delete { id: i64 },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ImportCommand {
    /// Upload a workbook, resolve its columns and confirm the import
    Upload {
        file: PathBuf,
        /// Column for a field the server could not detect, as field=column (name or index).
        /// An empty column clears an earlier choice.
        #[arg(long = "map", value_parser = parse_column_choice)]
        map: Vec<(RequiredField, Option<String>)>,
        /// Show the resolved mapping without importing
        #[arg(long)]
        dry_run: bool,
    },
    /// Show how many cases and steps are stored
    Status,
}

fn parse_column_choice(s: &str) -> std::result::Result<(RequiredField, Option<String>), String> {
    let (field, column) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=column, got \"{s}\""))?;
    let column = column.trim();
    let column = (!column.is_empty()).then(|| column.to_string());
    Ok((field.parse()?, column))
}

/// Exit status for a failed command: 2 when the input was rejected before reaching the server.
pub fn failure_code(err: &anyhow::Error) -> u8 {
    let local = err
        .chain()
        .find_map(|e| e.downcast_ref::<ClientError>())
        .is_some_and(ClientError::is_local);
    if local {
        2
    } else {
        1
    }
}

/// Verbosity flag to a default log filter.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

struct App {
    settings: Settings,
    gateway: Arc<HttpGateway>,
    json: bool,
    out: mpsc::UnboundedSender<OutputLine>,
}

impl App {
    fn stdout(&self, line: impl Into<String>) {
        let _ = self.out.send(OutputLine::Stdout(line.into()));
    }

    fn stderr(&self, line: impl Into<String>) {
        let _ = self.out.send(OutputLine::Stderr(line.into()));
    }

    fn lines(&self, lines: Vec<String>) {
        for line in lines {
            self.stdout(line);
        }
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.stdout(serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// A JSON body stamped with the time it was observed.
#[derive(Serialize)]
struct Observed<'a, T: Serialize> {
    #[serde(flatten)]
    body: &'a T,
    observed_at: String,
}

fn observed<T: Serialize>(body: &T) -> Result<Observed<'_, T>> {
    let observed_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format timestamp")?;
    Ok(Observed { body, observed_at })
}

/// How a watched job ended, as printed in `--json` mode.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum JobOutcome {
    Completed {
        result: ClusterSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        clusters: Option<Vec<ClusterInfo>>,
    },
    Failed {
        message: String,
    },
    /// Watching stopped before the job finished.
    Detached {
        status: JobStatus,
    },
}

/// Loads the cluster list once a job completes, so it can be printed with the outcome.
struct ClusterCache {
    gateway: Arc<dyn ClusterGateway>,
    clusters: Mutex<Option<Vec<ClusterInfo>>>,
    done: Notify,
}

impl ClusterCache {
    fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self {
            gateway,
            clusters: Mutex::new(None),
            done: Notify::new(),
        }
    }

    fn take(&self) -> Option<Vec<ClusterInfo>> {
        self.clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl ResultsRefresher for ClusterCache {
    async fn refresh(&self) -> crate::error::Result<()> {
        let result = self.gateway.list_clusters(None).await;
        let outcome = result.map(|clusters| {
            *self.clusters.lock().unwrap_or_else(PoisonError::into_inner) = Some(clusters);
        });
        self.done.notify_one();
        outcome
    }
}

pub async fn run(args: Cli) -> Result<ExitCode> {
    let settings = Settings::load(args.config.as_deref())
        .context("failed to load settings")?
        .apply(Overrides {
            base_url: args.base_url.clone(),
            poll_interval: args.poll_interval.map(Into::into),
        })?;
    info!(
        "Using {} (poll every {})",
        settings.base_url,
        humantime::format_duration(settings.poll_interval)
    );
    let gateway = Arc::new(HttpGateway::new(&settings)?);

    let (out_tx, out_handle) = spawn_output_writer();
    let app = App {
        settings,
        gateway,
        json: args.json,
        out: out_tx,
    };

    let result = match args.command {
        Command::Run { threshold } => run_job(&app, threshold).await,
        Command::Status { watch } => show_status(&app, watch).await,
        Command::Clusters {
            id: Some(id), ..
        } => show_cluster(&app, id).await,
        Command::Clusters { history_id, .. } => list_clusters(&app, history_id).await,
        Command::Export { output } => export(&app, &output).await,
        Command::History { action } => history(&app, action).await,
        Command::Import { action } => import(&app, action).await,
    };

    drop(app);
    let _ = out_handle.await;
    result
}

fn controller(
    app: &App,
    refresher: Option<Arc<ClusterCache>>,
) -> (JobController, mpsc::UnboundedReceiver<JobEvent>) {
    let gateway: Arc<dyn ClusterGateway> = app.gateway.clone();
    JobController::new(
        gateway,
        Arc::new(TokioScheduler),
        app.settings.poll_interval,
        refresher.map(|r| r as Arc<dyn ResultsRefresher>),
    )
}

async fn run_job(app: &App, threshold: Option<f64>) -> Result<ExitCode> {
    let threshold = threshold.unwrap_or(app.settings.default_threshold);
    let cache = Arc::new(ClusterCache::new(app.gateway.clone()));
    let (controller, events) = controller(app, Some(cache.clone()));

    controller
        .start(threshold)
        .await
        .context("clustering was not started")?;
    controller.poll().await;
    watch(app, &controller, events, &cache).await
}

async fn show_status(app: &App, keep_watching: bool) -> Result<ExitCode> {
    let cache = Arc::new(ClusterCache::new(app.gateway.clone()));
    let (controller, mut events) = controller(app, Some(cache.clone()));

    let view = controller
        .check_initial_status()
        .await
        .context("failed to fetch job status")?;
    // The view is printed below; the queued events only repeat it.
    while events.try_recv().is_ok() {}

    if app.json {
        app.print_json(&observed(&view)?)?;
    } else {
        app.stdout(text_summary::initial_view_line(&view));
        if !controller.start_enabled() && !keep_watching {
            app.stderr("A run is in progress; use --watch to follow it");
        }
    }

    match view {
        InitialView::Running(_) if keep_watching => watch(app, &controller, events, &cache).await,
        InitialView::Failed { .. } => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}

/// Follow job events until the job finishes or the user presses Ctrl-C.
async fn watch(
    app: &App,
    controller: &JobController,
    mut events: mpsc::UnboundedReceiver<JobEvent>,
    cache: &ClusterCache,
) -> Result<ExitCode> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let terminal = loop {
        tokio::select! {
            ev = events.recv() => {
                let Some(ev) = ev else { break None };
                if ev.is_terminal() {
                    break Some(ev);
                }
                if !app.json {
                    if let Some(msg) = ev.to_message() {
                        app.stderr(msg);
                    }
                }
            }
            _ = &mut ctrl_c => {
                if controller.is_polling() {
                    controller.stop_observing();
                    app.stderr("Stopped watching; the job keeps running on the server");
                }
                break None;
            }
        }
    };

    let (outcome, code) = match terminal {
        Some(JobEvent::Completed(result)) => {
            // The refresher runs right after the completion event.
            if !until_interrupted(cache.done.notified(), &mut ctrl_c).await {
                app.stderr("Stopped waiting for the cluster list");
            }
            while let Ok(ev) = events.try_recv() {
                if let JobEvent::RefreshFailed { message } = ev {
                    app.stderr(format!("Could not load clusters: {message}"));
                }
            }
            let clusters = cache.take();
            if !app.json {
                app.stdout(text_summary::summary_line(&result));
                if let Some(clusters) = &clusters {
                    app.lines(text_summary::cluster_lines(clusters));
                }
            }
            (JobOutcome::Completed { result, clusters }, ExitCode::SUCCESS)
        }
        Some(JobEvent::JobFailed { message }) | Some(JobEvent::StartRejected { message }) => {
            if !app.json {
                app.stderr(format!("Clustering error: {message}"));
            }
            (JobOutcome::Failed { message }, ExitCode::FAILURE)
        }
        _ => (
            JobOutcome::Detached {
                status: controller.status(),
            },
            ExitCode::SUCCESS,
        ),
    };

    if app.json {
        app.print_json(&observed(&outcome)?)?;
    }
    Ok(code)
}

async fn list_clusters(app: &App, history_id: Option<i64>) -> Result<ExitCode> {
    let clusters = app
        .gateway
        .list_clusters(history_id)
        .await
        .context("failed to list clusters")?;
    if app.json {
        app.print_json(&clusters)?;
    } else {
        app.lines(text_summary::cluster_lines(&clusters));
    }
    Ok(ExitCode::SUCCESS)
}

/// Wait for `done` unless `interrupt` fires first. Returns false when interrupted.
async fn until_interrupted(done: impl Future, interrupt: impl Future) -> bool {
    tokio::select! {
        _ = done => true,
        _ = interrupt => false,
    }
}

async fn show_cluster(app: &App, id: i64) -> Result<ExitCode> {
    let detail = app
        .gateway
        .cluster_detail(id)
        .await
        .with_context(|| format!("failed to load cluster {id}"))?;
    if app.json {
        app.print_json(&detail)?;
    } else {
        app.lines(text_summary::cluster_detail_lines(&detail));
    }
    Ok(ExitCode::SUCCESS)
}

async fn export(app: &App, output: &std::path::Path) -> Result<ExitCode> {
    let archive = app
        .gateway
        .export_results()
        .await
        .context("failed to export results")?;
    tokio::fs::write(output, &archive)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Wrote {} bytes to {}", archive.len(), output.display());
    app.stderr(format!("Saved results to {}", output.display()));
    Ok(ExitCode::SUCCESS)
}

async fn history(app: &App, action: HistoryCommand) -> Result<ExitCode> {
    match action {
        HistoryCommand::List => {
            let records = app
                .gateway
                .list_history()
                .await
                .context("failed to load history")?;
            if app.json {
                app.print_json(&records)?;
            } else {
                app.lines(text_summary::history_lines(&records));
            }
        }
        HistoryCommand::Compare { ids } => {
            let selection: HistorySelection = ids.into_iter().collect();
            if !selection.can_compare() {
                app.stderr(format!(
                    "Select exactly two history records to compare ({} selected)",
                    selection.len()
                ));
                if selection.is_empty() {
                    app.stderr("Run `casecluster history list` to see record ids");
                }
                return Ok(ExitCode::from(2));
            }
            let report = compare_selected(app.gateway.as_ref(), &selection).await?;
            if app.json {
                app.print_json(&report)?;
            } else {
                app.lines(text_summary::comparison_lines(&report));
            }
        }
        HistoryCommand::Activate { id } => {
            app.gateway
                .activate_history(id)
                .await
                .with_context(|| format!("failed to activate history record {id}"))?;
            app.stderr(format!("History record {id} is now the current result"));
        }
        HistoryCommand::Delete { id } => {
            app.gateway
                .delete_history(id)
                .await
                .with_context(|| format!("failed to delete history record {id}"))?;
            app.stderr(format!("Deleted history record {id}"));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn import(app: &App, action: ImportCommand) -> Result<ExitCode> {
    match action {
        ImportCommand::Upload { file, map, dry_run } => {
            import_upload(app, &file, &map, dry_run).await
        }
        ImportCommand::Status => {
            let status = app
                .gateway
                .import_status()
                .await
                .context("failed to load import status")?;
            if app.json {
                app.print_json(&status)?;
            } else {
                app.stdout(text_summary::import_status_line(&status));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn import_upload(
    app: &App,
    file: &std::path::Path,
    choices: &[(RequiredField, Option<String>)],
    dry_run: bool,
) -> Result<ExitCode> {
    let gateway: &dyn ImportGateway = app.gateway.as_ref();
    let mut reconciler = ColumnReconciler::new();
    crate::import::upload(gateway, &mut reconciler, file)
        .await
        .with_context(|| format!("failed to upload {}", file.display()))?;

    if let Err(e) = apply_choices(app, &mut reconciler, choices) {
        reconciler.cancel();
        return Err(e);
    }

    let view = reconciler.presentation()?;
    if !app.json {
        app.lines(text_summary::mapping_lines(&view));
    }

    if dry_run {
        let mapping = reconciler.final_mapping();
        if app.json {
            app.print_json(&view)?;
        }
        reconciler.cancel();
        return match mapping {
            Ok(_) => Ok(ExitCode::SUCCESS),
            Err(e) => {
                app.stderr(e.to_string());
                Ok(ExitCode::from(2))
            }
        };
    }

    let report = match reconciler.confirm(gateway).await {
        Ok(report) => report,
        Err(e) if e.is_local() && reconciler.has_session() => {
            app.stderr(e.to_string());
            app.stderr("Pick the missing columns with --map field=column");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };
    if app.json {
        app.print_json(&report)?;
    } else {
        app.lines(text_summary::import_report_lines(&report));
    }
    Ok(ExitCode::SUCCESS)
}

fn apply_choices(
    app: &App,
    reconciler: &mut ColumnReconciler,
    choices: &[(RequiredField, Option<String>)],
) -> Result<()> {
    for (field, column) in choices {
        let Some(column) = column else {
            reconciler.deselect(*field)?;
            continue;
        };
        let index = reconciler
            .column_for(column)?
            .with_context(|| format!("no column named \"{column}\""))?;
        if !reconciler.select(*field, index)? {
            app.stderr(format!(
                "{field} was detected automatically, ignoring --map {field}={column}"
            ));
        }
    }
    Ok(())
}
