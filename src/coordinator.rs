//! Cycle coordination.
//!
//! Every inbound change set starts a new cycle that immediately becomes the
//! current one. Cycles run on the execution [`Pool`], each one closing the
//! previous cycle's report before asking the analyzer for a new one, so the
//! analyzer never has two reports open. When a cycle's issues arrive they are
//! only delivered if the cycle is still current; results of superseded
//! cycles are dropped.

use crate::analyzer::Analyzer;
use crate::change::ChangeSet;
use crate::channel::{InboundMessage, IssueSink, OutboundMessage};
use crate::error::{CheckError, CheckResult};
use crate::issue::{Issue, IssueFilter};
use crate::pool::{Done, Pool};
use crate::report::{Dependencies, Report};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type SharedValue<T> = Shared<BoxFuture<'static, Option<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    CycleStarting,
    CycleRunning,
    CycleSettling,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Waiting for a pool slot.
    Starting,
    /// Connecting, closing the previous report or extracting results.
    Running,
    /// Results are in; the pool slot is being released.
    Settling,
    Delivered,
    Discarded,
}

/// Process-wide run flags, fixed at startup.
#[derive(Debug)]
pub struct Session {
    watching: bool,
    initialized: AtomicBool,
}

impl Session {
    pub fn new(watching: bool) -> Self {
        Self {
            watching,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn watching(&self) -> bool {
        self.watching
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Returns `true` only for the first caller.
    fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }
}

/// Working set of one cycle.
pub struct CycleState {
    id: Uuid,
    started_at: Instant,
    change: ChangeSet,
    report: SharedValue<Arc<Report>>,
    dependencies: SharedValue<Dependencies>,
    issues: SharedValue<Vec<Issue>>,
    phase: Arc<Mutex<CyclePhase>>,
}

impl CycleState {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn change(&self) -> &ChangeSet {
        &self.change
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.phase.lock() = phase;
    }

    /// The report produced for this cycle, `None` when producing it failed.
    pub async fn report(&self) -> Option<Arc<Report>> {
        self.report.clone().await
    }

    pub async fn dependencies(&self) -> Option<Dependencies> {
        self.dependencies.clone().await
    }

    pub async fn issues(&self) -> Option<Vec<Issue>> {
        self.issues.clone().await
    }

    pub fn issues_pending(&self) -> bool {
        self.issues.peek().is_none()
    }
}

impl std::fmt::Debug for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleState")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub watching: bool,
    pub max_concurrency: usize,
    /// How long the one-shot run waits quietly before logging that issues
    /// are still being computed.
    pub grace_period: Duration,
    pub filter: IssueFilter,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            watching: true,
            max_concurrency: 1,
            grace_period: Duration::from_millis(10),
            filter: IssueFilter::accept_all(),
        }
    }
}

pub struct Coordinator {
    analyzer: Arc<dyn Analyzer>,
    sink: Arc<dyn IssueSink>,
    pool: Pool,
    filter: IssueFilter,
    session: Session,
    grace_period: Duration,
    current: Mutex<Option<Arc<CycleState>>>,
    closed: AtomicBool,
}

impl Coordinator {
    /// Must be called from within a tokio runtime; the pool workers are
    /// spawned here.
    pub fn new(analyzer: Arc<dyn Analyzer>, sink: Arc<dyn IssueSink>, options: CoordinatorOptions) -> Self {
        Self {
            analyzer,
            sink,
            pool: Pool::new(options.max_concurrency),
            filter: options.filter,
            session: Session::new(options.watching),
            grace_period: options.grace_period,
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn current(&self) -> Option<Arc<CycleState>> {
        self.current.lock().clone()
    }

    pub fn is_current(&self, cycle: &Arc<CycleState>) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, cycle))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CoordinatorState {
        if self.is_closed() {
            return CoordinatorState::Closed;
        }
        match self.current.lock().as_ref().map(|cycle| cycle.phase()) {
            Some(CyclePhase::Starting) => CoordinatorState::CycleStarting,
            Some(CyclePhase::Running) => CoordinatorState::CycleRunning,
            Some(CyclePhase::Settling) => CoordinatorState::CycleSettling,
            Some(CyclePhase::Delivered) | Some(CyclePhase::Discarded) | None => CoordinatorState::Idle,
        }
    }

    /// Starts a new cycle for `change` and makes it current.
    pub fn start_cycle(&self, change: ChangeSet) -> CheckResult<Arc<CycleState>> {
        if self.is_closed() {
            return Err(CheckError::Closed);
        }
        if self.pool.is_closed() {
            return Err(CheckError::PoolClosed);
        }

        let mut current = self.current.lock();

        let id = Uuid::new_v4();
        let (dependencies_tx, dependencies_rx) = oneshot::channel();
        let (issues_tx, issues_rx) = oneshot::channel();
        let phase = Arc::new(Mutex::new(CyclePhase::Starting));

        let job = CycleJob {
            id,
            analyzer: Arc::clone(&self.analyzer),
            change: change.clone(),
            previous_report: current.as_ref().map(|cycle| cycle.report.clone()),
            dependencies: dependencies_tx,
            issues: issues_tx,
            phase: Arc::clone(&phase),
        };
        let submission = self.pool.submit(move |done| job.run(done));

        let cycle = Arc::new(CycleState {
            id,
            started_at: Instant::now(),
            change,
            report: submission.map(Option::flatten).boxed().shared(),
            dependencies: dependencies_rx.map(|r| r.ok().flatten()).boxed().shared(),
            issues: issues_rx.map(|r| r.ok().flatten()).boxed().shared(),
            phase,
        });

        if let Some(previous) = current.replace(Arc::clone(&cycle)) {
            debug!(previous = %previous.id, cycle = %id, "cycle superseded");
        }
        debug!(
            cycle = %id,
            changed = cycle.change.changed_files.len(),
            deleted = cycle.change.deleted_files.len(),
            "cycle started"
        );

        Ok(cycle)
    }

    /// Waits for `cycle`'s issues and delivers them if the cycle is still
    /// current. Returns the delivered message, or `None` for a stale cycle.
    pub async fn settle(&self, cycle: &Arc<CycleState>) -> CheckResult<Option<OutboundMessage>> {
        let issues = cycle.issues().await.unwrap_or_default();

        if !self.is_current(cycle) {
            debug!(cycle = %cycle.id, "discarding issues of a superseded cycle");
            cycle.set_phase(CyclePhase::Discarded);
            return Ok(None);
        }

        let issues = self.filter.apply(issues);
        let message = OutboundMessage::IssueList {
            time: cycle.started_at.elapsed().as_millis() as u64,
            issues,
        };
        cycle.set_phase(CyclePhase::Delivered);
        self.sink.deliver(message.clone())?;
        Ok(Some(message))
    }

    /// Starts a cycle for `change` and settles it.
    pub async fn check(&self, change: ChangeSet) -> CheckResult<Option<OutboundMessage>> {
        let cycle = self.start_cycle(change)?;
        log_progress(&cycle);
        self.settle(&cycle).await
    }

    /// Continuous mode: starts a cycle per inbound change notification, in
    /// arrival order, and delivers whichever results are still current. Shuts
    /// the coordinator down once the inbound channel closes.
    pub async fn watch(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) -> CheckResult<()> {
        info!("Checker loaded");
        let mut deliveries = JoinSet::new();

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(InboundMessage::ChangedFiles { files }) = message else { break };
                    let cycle = self.start_cycle(files)?;
                    log_progress(&cycle);

                    let coordinator = Arc::clone(&self);
                    deliveries.spawn(async move {
                        if let Err(e) = coordinator.settle(&cycle).await {
                            warn!(cycle = %cycle.id, error = %e, "failed to deliver issue list");
                        }
                    });
                }
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "issue delivery task failed");
                    }
                }
            }
        }

        while let Some(joined) = deliveries.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "issue delivery task failed");
            }
        }
        self.shutdown().await
    }

    /// One-shot mode: runs a single full cycle, delivers its issues and
    /// disconnects the analyzer. Only the first call has any effect.
    pub async fn run_once(&self) -> CheckResult<Option<OutboundMessage>> {
        if !self.session.mark_initialized() {
            debug!("one-shot run already performed");
            return Ok(None);
        }

        let cycle = self.start_cycle(ChangeSet::empty())?;
        info!("Issues checking in progress...");

        if cycle.issues_pending()
            && tokio::time::timeout(self.grace_period, cycle.issues()).await.is_err()
        {
            debug!(cycle = %cycle.id, "issues still being computed after grace period");
        }

        let delivered = self.settle(&cycle).await;
        let closed = self.shutdown().await;
        let delivered = delivered?;
        closed?;
        Ok(delivered)
    }

    /// Closes the current report, stops the pool and disconnects the
    /// analyzer. Later calls are no-ops.
    pub async fn shutdown(&self) -> CheckResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.pool.close();
        let current = self.current.lock().clone();

        let mut result = Ok(());
        if let Some(cycle) = current {
            if let Some(report) = cycle.report().await {
                if let Err(e) = report.close().await {
                    warn!(cycle = %cycle.id, error = %e, "failed to close report");
                    result = Err(e);
                }
            }
        }

        if let Err(e) = self.analyzer.disconnect().await {
            warn!(analyzer = self.analyzer.name(), error = %e, "failed to disconnect analyzer");
            result = result.and(Err(e));
        }

        info!("Checker closed");
        result
    }
}

fn log_progress(cycle: &CycleState) {
    if cycle.issues_pending() {
        info!(cycle = %cycle.id, "Issues checking in progress...");
    }
}

/// Everything the pool job of one cycle needs.
struct CycleJob {
    id: Uuid,
    analyzer: Arc<dyn Analyzer>,
    change: ChangeSet,
    previous_report: Option<SharedValue<Arc<Report>>>,
    dependencies: oneshot::Sender<Option<Dependencies>>,
    issues: oneshot::Sender<Option<Vec<Issue>>>,
    phase: Arc<Mutex<CyclePhase>>,
}

impl CycleJob {
    async fn run(self, done: Done) -> Option<Arc<Report>> {
        let CycleJob {
            id,
            analyzer,
            change,
            previous_report,
            dependencies,
            issues,
            phase,
        } = self;
        *phase.lock() = CyclePhase::Running;

        let produced = produce_report(analyzer.as_ref(), &change, previous_report).await;

        let report = match produced {
            Ok(report) => Arc::new(report),
            Err(e) => {
                match e {
                    CheckError::Cancelled => debug!(cycle = %id, "report request canceled"),
                    _ => warn!(cycle = %id, analyzer = analyzer.name(), error = %e, "analysis cycle failed"),
                }
                let _ = dependencies.send(None);
                *phase.lock() = CyclePhase::Settling;
                let _ = issues.send(None);
                done.complete();
                return None;
            }
        };

        // Issues are only read once dependency extraction has settled.
        let extracting = Arc::clone(&report);
        tokio::spawn(async move {
            let found = match extracting.dependencies().await {
                Ok(found) => Some(found),
                Err(e) => {
                    warn!(cycle = %id, error = %e, "dependency extraction failed");
                    None
                }
            };
            let _ = dependencies.send(found);

            let found = match extracting.issues().await {
                Ok(found) => Some(found),
                Err(e) => {
                    warn!(cycle = %id, error = %e, "issue extraction failed");
                    None
                }
            };
            *phase.lock() = CyclePhase::Settling;
            let _ = issues.send(found);
            done.complete();
        });

        Some(report)
    }
}

async fn produce_report(
    analyzer: &dyn Analyzer,
    change: &ChangeSet,
    previous_report: Option<SharedValue<Arc<Report>>>,
) -> CheckResult<Report> {
    let connected = analyzer.connect().await;

    // A failed connect still closes the previous report.
    if let Some(previous) = previous_report {
        if let Some(previous) = previous.await {
            if let Err(e) = previous.close().await {
                warn!(error = %e, "failed to close previous report");
            }
        }
    }

    connected?;
    analyzer.report(change).await
}
