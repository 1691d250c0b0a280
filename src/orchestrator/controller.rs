//! Clustering job lifecycle controller.
//!
//! Owns start/poll/terminal handling and the single poll timer, and emits events for
//! presentation layers. State changes go through `progress::transition`; this module only
//! decides what happens around them (timer, start control, refresh).

use super::progress::{transition, JobStatus, StatusEvent};
use super::scheduler::Scheduler;
use crate::error::Result;
use crate::gateway::ClusterGateway;
use crate::model::{InitialView, JobEvent};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Reloads the cluster results view after a job completes.
#[async_trait]
pub trait ResultsRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// Internal handle for the live poll loop.
struct PollTimer {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOrigin {
    Timer(u64),
    Manual,
}

struct Session {
    status: JobStatus,
    start_enabled: bool,
    timer: Option<PollTimer>,
    next_timer_id: u64,
    // Poll sequence numbers: a response older than the last applied one is dropped.
    issued_seq: u64,
    applied_seq: u64,
}

impl Session {
    fn owns_timer(&self, id: u64) -> bool {
        self.timer.as_ref().map(|t| t.id) == Some(id)
    }
}

struct Inner {
    gateway: Arc<dyn ClusterGateway>,
    scheduler: Arc<dyn Scheduler>,
    refresher: Option<Arc<dyn ResultsRefresher>>,
    poll_interval: Duration,
    event_tx: UnboundedSender<JobEvent>,
    session: Mutex<Session>,
}

pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        scheduler: Arc<dyn Scheduler>,
        poll_interval: Duration,
        refresher: Option<Arc<dyn ResultsRefresher>>,
    ) -> (Self, UnboundedReceiver<JobEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            gateway,
            scheduler,
            refresher,
            poll_interval,
            event_tx,
            session: Mutex::new(Session {
                status: JobStatus::Idle,
                start_enabled: true,
                timer: None,
                next_timer_id: 0,
                issued_seq: 0,
                applied_seq: 0,
            }),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().status.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    pub fn start_enabled(&self) -> bool {
        self.inner.lock().start_enabled
    }

    /// Ask the server to start a clustering run and begin polling once it accepts.
    ///
    /// On rejection the start control is restored and the server's message is emitted as is;
    /// no timer is installed.
    pub async fn start(&self, threshold: f64) -> Result<()> {
        {
            let mut s = self.inner.lock();
            self.inner.set_start_enabled(&mut s, false);
            self.inner.emit(JobEvent::DisplayCleared);
        }

        if let Err(e) = self.inner.gateway.start(threshold).await {
            warn!("Clustering start rejected: {e}");
            let mut s = self.inner.lock();
            self.inner.set_start_enabled(&mut s, true);
            self.inner.emit(JobEvent::StartRejected {
                message: e.to_string(),
            });
            return Err(e);
        }

        info!("Clustering started with threshold={threshold:.2}");
        let mut s = self.inner.lock();
        // Anything still in flight was asked about the previous run.
        s.applied_seq = s.issued_seq;
        s.status = transition(&s.status, StatusEvent::StartAccepted);
        if let JobStatus::Running(p) = &s.status {
            self.inner.emit(JobEvent::Progress(p.clone()));
        }
        self.inner.install_timer(&mut s);
        Ok(())
    }

    /// Fetch the job status once and apply it. Fetch failures are ignored.
    pub async fn poll(&self) {
        self.inner.poll_once(PollOrigin::Manual).await;
    }

    /// Decide what the job view shows on entry. A running job is picked up and polled.
    pub async fn check_initial_status(&self) -> Result<InitialView> {
        let seq = self.inner.issue_seq();
        let response = self.inner.gateway.status().await?;

        let (view, last_result) = {
            let mut s = self.inner.lock();
            if seq > s.applied_seq {
                s.applied_seq = seq;
                s.status = transition(&s.status, StatusEvent::Reported(response.into()));
            }
            match s.status.clone() {
                JobStatus::Running(p) => {
                    self.inner.set_start_enabled(&mut s, false);
                    self.inner.install_timer(&mut s);
                    (Some(InitialView::Running(p)), None)
                }
                JobStatus::Error { message } => (Some(InitialView::Failed { message }), None),
                JobStatus::Completed { result } => (None, Some(result)),
                JobStatus::Idle => (None, None),
            }
        };

        let view = match view {
            Some(view) => view,
            None => {
                let clusters = self.inner.gateway.list_clusters(None).await?;
                if clusters.is_empty() {
                    InitialView::NotYetRun
                } else {
                    InitialView::Available {
                        cluster_count: clusters.len(),
                        last_result,
                    }
                }
            }
        };
        self.inner.emit(JobEvent::Initial(view.clone()));
        Ok(view)
    }

    /// Stop the local timer. The remote job, if any, keeps running unobserved.
    pub fn stop_observing(&self) {
        let mut s = self.inner.lock();
        if self.inner.stop_timer(&mut s, PollOrigin::Manual) {
            info!("Stopped watching the clustering job; the server keeps running it");
        }
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.handle.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_start_enabled(&self, s: &mut Session, enabled: bool) {
        if s.start_enabled != enabled {
            s.start_enabled = enabled;
            self.emit(JobEvent::StartControl { enabled });
        }
    }

    fn issue_seq(&self) -> u64 {
        let mut s = self.lock();
        s.issued_seq += 1;
        s.issued_seq
    }

    /// Replace whatever timer is live with a fresh one.
    fn install_timer(self: &Arc<Self>, s: &mut Session) {
        if let Some(old) = s.timer.take() {
            debug!("[POLL] replacing timer #{}", old.id);
            old.handle.abort();
        }
        s.next_timer_id += 1;
        let id = s.next_timer_id;
        let mut ticker = self.scheduler.ticker(self.poll_interval);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if !inner.poll_once(PollOrigin::Timer(id)).await {
                    break;
                }
            }
            debug!("[POLL] timer #{id} finished");
        });
        s.timer = Some(PollTimer { id, handle });
        self.emit(JobEvent::PollingStarted);
    }

    /// Returns false when there was no timer to stop.
    fn stop_timer(&self, s: &mut Session, origin: PollOrigin) -> bool {
        let Some(timer) = s.timer.take() else {
            return false;
        };
        // The loop that reached a terminal state ends by itself; aborting it would also
        // cancel the refresh it is about to run.
        if origin != PollOrigin::Timer(timer.id) {
            timer.handle.abort();
        }
        self.emit(JobEvent::PollingStopped);
        true
    }

    /// One status round trip. Returns whether the calling timer should keep going.
    async fn poll_once(&self, origin: PollOrigin) -> bool {
        let seq = {
            let mut s = self.lock();
            if let PollOrigin::Timer(id) = origin {
                if !s.owns_timer(id) {
                    return false;
                }
            }
            s.issued_seq += 1;
            s.issued_seq
        };

        let response = match self.gateway.status().await {
            Ok(r) => r,
            Err(e) => {
                debug!("[POLL] status fetch failed, retrying on next tick: {e}");
                return true;
            }
        };

        let completed = {
            let mut s = self.lock();
            if let PollOrigin::Timer(id) = origin {
                if !s.owns_timer(id) {
                    debug!("[POLL] dropping response of retired timer #{id}");
                    return false;
                }
            }
            if seq <= s.applied_seq {
                debug!("[POLL] dropping stale response #{seq} (applied #{})", s.applied_seq);
                return true;
            }
            s.applied_seq = seq;
            s.status = transition(&s.status, StatusEvent::Reported(response.into()));

            match s.status.clone() {
                JobStatus::Running(p) => {
                    self.emit(JobEvent::Progress(p));
                    false
                }
                JobStatus::Completed { result } => {
                    self.stop_timer(&mut s, origin);
                    self.set_start_enabled(&mut s, true);
                    info!(
                        "Clustering completed: {} clusters, {} noise steps",
                        result.total_clusters, result.noise_count
                    );
                    self.emit(JobEvent::Completed(result));
                    true
                }
                JobStatus::Error { message } => {
                    self.stop_timer(&mut s, origin);
                    self.set_start_enabled(&mut s, true);
                    warn!("Clustering failed: {message}");
                    self.emit(JobEvent::JobFailed { message });
                    false
                }
                JobStatus::Idle => false,
            }
        };

        if completed {
            self.refresh_results().await;
        }

        match origin {
            PollOrigin::Timer(id) => self.lock().owns_timer(id),
            PollOrigin::Manual => true,
        }
    }

    async fn refresh_results(&self) {
        let Some(refresher) = &self.refresher else {
            return;
        };
        if let Err(e) = refresher.refresh().await {
            warn!("Results refresh failed: {e}");
            self.emit(JobEvent::RefreshFailed {
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{status, transport_failure, FakeGateway};
    use crate::model::{
        ClusterDetail, ClusterInfo, ClusterSummary, CompareResponse, HistoryRecord, StatusResponse,
    };
    use crate::orchestrator::scheduler::manual::ManualScheduler;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    const INTERVAL: Duration = Duration::from_millis(2000);

    fn controller(
        gw: &Arc<FakeGateway>,
        sched: &ManualScheduler,
        refresher: Option<Arc<dyn ResultsRefresher>>,
    ) -> (JobController, UnboundedReceiver<JobEvent>) {
        JobController::new(gw.clone(), Arc::new(sched.clone()), INTERVAL, refresher)
    }

    fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn count(events: &[JobEvent], wanted: &JobEvent) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    fn running(progress: u64) -> StatusResponse {
        status(json!({
            "status": "running",
            "phase_name": "Computing embeddings",
            "phase_index": 2,
            "total_phases": 4,
            "elapsed_seconds": 3.5,
            "overall_progress": progress
        }))
    }

    fn completed() -> StatusResponse {
        status(json!({
            "status": "completed",
            "result": {"total_clusters": 14, "noise_count": 3, "threshold": 0.8}
        }))
    }

    fn summary() -> ClusterSummary {
        ClusterSummary {
            total_clusters: 14,
            noise_count: 3,
            threshold: 0.8,
        }
    }

    fn cluster(id: i64) -> ClusterInfo {
        ClusterInfo {
            cluster_id: id,
            label: format!("cluster {id}"),
            step_count: 4,
            case_count: 2,
        }
    }

    #[tokio::test]
    async fn completed_run_stops_timer_and_reenables_start_once() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(running(10));
        gw.push_status(running(60));
        gw.push_status(completed());
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        ctl.start(0.8).await.unwrap();
        assert!(ctl.is_polling());
        assert!(!ctl.start_enabled());

        for _ in 0..3 {
            assert_eq!(sched.fire().await, 1);
        }
        assert!(!ctl.is_polling());
        assert!(ctl.start_enabled());
        assert_eq!(ctl.status(), JobStatus::Completed { result: summary() });

        // nothing left to tick
        assert_eq!(sched.fire().await, 0);
        assert_eq!(gw.status_calls.load(Ordering::SeqCst), 3);

        let events = drain(&mut rx);
        assert_eq!(count(&events, &JobEvent::PollingStopped), 1);
        assert_eq!(count(&events, &JobEvent::StartControl { enabled: true }), 1);
        assert_eq!(count(&events, &JobEvent::StartControl { enabled: false }), 1);
        assert_eq!(count(&events, &JobEvent::Completed(summary())), 1);
        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress(p) => Some(p.overall_progress),
                _ => None,
            })
            .collect();
        // the "Starting..." placeholder, then both running reports
        assert_eq!(progress, vec![0, 10, 60]);
    }

    #[tokio::test]
    async fn starting_twice_leaves_a_single_timer() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(running(10));
        gw.push_status(running(20));
        let sched = ManualScheduler::default();
        let (ctl, _rx) = controller(&gw, &sched, None);

        ctl.start(0.8).await.unwrap();
        ctl.start(0.8).await.unwrap();

        assert_eq!(sched.fire().await, 1);
        assert_eq!(gw.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sched.live_tickers(), 1);
    }

    #[tokio::test]
    async fn rejected_start_restores_control_without_polling() {
        let gw = Arc::new(FakeGateway::default());
        gw.reject_start("Clustering is already running");
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        let err = ctl.start(0.8).await.unwrap_err();
        assert_eq!(err.to_string(), "Clustering is already running");
        assert!(ctl.start_enabled());
        assert!(!ctl.is_polling());
        assert_eq!(ctl.status(), JobStatus::Idle);
        assert_eq!(sched.fire().await, 0);
        assert_eq!(gw.status_calls.load(Ordering::SeqCst), 0);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                JobEvent::StartControl { enabled: false },
                JobEvent::DisplayCleared,
                JobEvent::StartControl { enabled: true },
                JobEvent::StartRejected {
                    message: "Clustering is already running".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn transport_failures_while_polling_are_silent() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status_error(transport_failure());
        gw.push_status(running(40));
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        ctl.start(0.8).await.unwrap();
        let before = ctl.status();
        drain(&mut rx);

        assert_eq!(sched.fire().await, 1);
        assert!(ctl.is_polling());
        assert_eq!(ctl.status(), before);
        assert!(drain(&mut rx).is_empty());

        assert_eq!(sched.fire().await, 1);
        match ctl.status() {
            JobStatus::Running(p) => assert_eq!(p.overall_progress, 40),
            other => panic!("expected running, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn job_error_is_surfaced_verbatim() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(status(json!({
            "status": "error",
            "error": "No test steps found. Please import data first."
        })));
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        ctl.start(0.8).await.unwrap();
        assert_eq!(sched.fire().await, 1);

        assert!(!ctl.is_polling());
        assert!(ctl.start_enabled());
        let events = drain(&mut rx);
        assert!(events.contains(&JobEvent::JobFailed {
            message: "No test steps found. Please import data first.".into()
        }));
        assert_eq!(count(&events, &JobEvent::PollingStopped), 1);
    }

    #[tokio::test]
    async fn idle_report_keeps_polling() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(status(json!({"status": "idle"})));
        gw.push_status(completed());
        let sched = ManualScheduler::default();
        let (ctl, _rx) = controller(&gw, &sched, None);

        ctl.start(0.8).await.unwrap();
        assert_eq!(sched.fire().await, 1);
        assert!(ctl.is_polling());
        assert_eq!(ctl.status(), JobStatus::Idle);
        assert_eq!(sched.fire().await, 1);
        assert!(!ctl.is_polling());
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ResultsRefresher for CountingRefresher {
        async fn refresh(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(transport_failure())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn refresher_runs_once_after_completion() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(completed());
        let sched = ManualScheduler::default();
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let (ctl, _rx) = controller(&gw, &sched, Some(refresher.clone()));

        ctl.start(0.8).await.unwrap();
        assert_eq!(sched.fire().await, 1);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresher_failure_does_not_touch_controller_state() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(completed());
        let sched = ManualScheduler::default();
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let (ctl, mut rx) = controller(&gw, &sched, Some(refresher.clone()));

        ctl.start(0.8).await.unwrap();
        assert_eq!(sched.fire().await, 1);

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.status(), JobStatus::Completed { result: summary() });
        assert!(ctl.start_enabled());
        assert!(!ctl.is_polling());
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, JobEvent::RefreshFailed { .. })));
    }

    #[tokio::test]
    async fn initial_check_resumes_a_running_job() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(running(30));
        gw.push_status(completed());
        let sched = ManualScheduler::default();
        let (ctl, _rx) = controller(&gw, &sched, None);

        let view = ctl.check_initial_status().await.unwrap();
        assert!(matches!(view, InitialView::Running(ref p) if p.overall_progress == 30));
        assert!(ctl.is_polling());
        assert!(!ctl.start_enabled());

        assert_eq!(sched.fire().await, 1);
        assert!(!ctl.is_polling());
        assert!(ctl.start_enabled());
        assert_eq!(gw.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_initial_checks_keep_one_timer() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(running(30));
        gw.push_status(running(35));
        gw.push_status(running(40));
        let sched = ManualScheduler::default();
        let (ctl, _rx) = controller(&gw, &sched, None);

        ctl.check_initial_status().await.unwrap();
        ctl.check_initial_status().await.unwrap();
        assert_eq!(sched.fire().await, 1);
    }

    #[tokio::test]
    async fn initial_check_reports_saved_results() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(completed());
        gw.set_clusters(vec![cluster(1), cluster(2)]);
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        let view = ctl.check_initial_status().await.unwrap();
        assert_eq!(
            view,
            InitialView::Available {
                cluster_count: 2,
                last_result: Some(summary())
            }
        );
        assert!(!ctl.is_polling());
        assert_eq!(drain(&mut rx), vec![JobEvent::Initial(view)]);
    }

    #[tokio::test]
    async fn initial_check_without_results_is_not_yet_run() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(status(json!({"status": "idle"})));
        let sched = ManualScheduler::default();
        let (ctl, _rx) = controller(&gw, &sched, None);

        assert_eq!(ctl.check_initial_status().await.unwrap(), InitialView::NotYetRun);
        assert_eq!(gw.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn initial_check_reports_failed_job() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status(status(json!({"status": "error", "error": "Embedding model not found"})));
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        let view = ctl.check_initial_status().await.unwrap();
        assert_eq!(
            view,
            InitialView::Failed {
                message: "Embedding model not found".into()
            }
        );
        assert!(!ctl.is_polling());
        assert!(ctl.start_enabled());
        assert_eq!(gw.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(drain(&mut rx), vec![JobEvent::Initial(view)]);
    }

    #[tokio::test]
    async fn initial_check_fetch_failure_is_returned() {
        let gw = Arc::new(FakeGateway::default());
        gw.push_status_error(transport_failure());
        let sched = ManualScheduler::default();
        let (ctl, _rx) = controller(&gw, &sched, None);

        assert!(ctl.check_initial_status().await.is_err());
        assert!(!ctl.is_polling());
    }

    #[tokio::test]
    async fn stop_observing_and_drop_release_the_timer() {
        let gw = Arc::new(FakeGateway::default());
        let sched = ManualScheduler::default();
        let (ctl, mut rx) = controller(&gw, &sched, None);

        ctl.start(0.8).await.unwrap();
        ctl.stop_observing();
        assert!(!ctl.is_polling());
        assert!(drain(&mut rx).contains(&JobEvent::PollingStopped));
        assert_eq!(sched.fire().await, 0);
        ctl.stop_observing();
        assert!(drain(&mut rx).is_empty());

        ctl.start(0.8).await.unwrap();
        drop(ctl);
        assert_eq!(sched.fire().await, 0);
        assert_eq!(gw.status_calls.load(Ordering::SeqCst), 0);
    }

    /// Gateway whose status responses are released by the test, in any order.
    #[derive(Default)]
    struct GatedGateway {
        gates: Mutex<VecDeque<oneshot::Receiver<StatusResponse>>>,
    }

    #[async_trait]
    impl ClusterGateway for GatedGateway {
        async fn status(&self) -> Result<StatusResponse> {
            let gate = self.gates.lock().unwrap().pop_front();
            match gate {
                Some(rx) => rx.await.map_err(|_| transport_failure()),
                None => Err(transport_failure()),
            }
        }
        async fn start(&self, _t: f64) -> Result<()> {
            Ok(())
        }
        async fn list_clusters(&self, _h: Option<i64>) -> Result<Vec<ClusterInfo>> {
            Ok(Vec::new())
        }
        async fn cluster_detail(&self, _id: i64) -> Result<ClusterDetail> {
            Err(transport_failure())
        }
        async fn export_results(&self) -> Result<Bytes> {
            Err(transport_failure())
        }
        async fn list_history(&self) -> Result<Vec<HistoryRecord>> {
            Ok(Vec::new())
        }
        async fn activate_history(&self, _id: i64) -> Result<()> {
            Ok(())
        }
        async fn delete_history(&self, _id: i64) -> Result<()> {
            Ok(())
        }
        async fn compare_history(&self, _a: i64, _b: i64) -> Result<CompareResponse> {
            Err(transport_failure())
        }
    }

    #[tokio::test]
    async fn late_response_from_an_older_poll_is_discarded() {
        let gw = Arc::new(GatedGateway::default());
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        gw.gates.lock().unwrap().extend([first_rx, second_rx]);
        let (ctl, _rx) = JobController::new(
            gw.clone(),
            Arc::new(ManualScheduler::default()),
            INTERVAL,
            None,
        );
        let ctl = Arc::new(ctl);

        let slow = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.poll().await }
        });
        while gw.gates.lock().unwrap().len() > 1 {
            tokio::task::yield_now().await;
        }
        let fast = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.poll().await }
        });
        while !gw.gates.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        second_tx.send(running(60)).unwrap();
        fast.await.unwrap();
        first_tx.send(running(20)).unwrap();
        slow.await.unwrap();

        match ctl.status() {
            JobStatus::Running(p) => assert_eq!(p.overall_progress, 60),
            other => panic!("expected running, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_requested_before_a_new_start_is_ignored() {
        let gw = Arc::new(GatedGateway::default());
        let (old_tx, old_rx) = oneshot::channel();
        gw.gates.lock().unwrap().push_back(old_rx);
        let sched = ManualScheduler::default();
        let (ctl, _rx) = JobController::new(gw.clone(), Arc::new(sched.clone()), INTERVAL, None);
        let ctl = Arc::new(ctl);

        let earlier = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.poll().await }
        });
        while !gw.gates.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        ctl.start(0.8).await.unwrap();
        old_tx.send(completed()).unwrap();
        earlier.await.unwrap();

        assert!(matches!(ctl.status(), JobStatus::Running(_)));
        assert!(ctl.is_polling());
        assert!(!ctl.start_enabled());
        assert_eq!(sched.live_tickers(), 1);
    }
}
