#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use recheck::{Analyzer, ChangeSet, CheckError, CheckResult, Dependencies, Issue, IssueOrigin, Report, Severity};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scriptable analyzer that records how the coordinator drives it.
pub struct StubAnalyzer {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reports: AtomicUsize,
    pub dependency_runs: Arc<AtomicUsize>,
    pub issue_runs: Arc<AtomicUsize>,
    pub open: Arc<AtomicUsize>,
    pub max_open: Arc<AtomicUsize>,
    pub seen: Mutex<Vec<ChangeSet>>,
    fail: AtomicBool,
    failing_connects: Mutex<Vec<usize>>,
    delays: Mutex<VecDeque<Duration>>,
    issues: Mutex<Vec<Issue>>,
}

impl StubAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            reports: AtomicUsize::new(0),
            dependency_runs: Arc::new(AtomicUsize::new(0)),
            issue_runs: Arc::new(AtomicUsize::new(0)),
            open: Arc::new(AtomicUsize::new(0)),
            max_open: Arc::new(AtomicUsize::new(0)),
            seen: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            failing_connects: Mutex::new(Vec::new()),
            delays: Mutex::new(VecDeque::new()),
            issues: Mutex::new(Vec::new()),
        })
    }

    /// Every `report` call fails from now on.
    pub fn failing(self: Arc<Self>) -> Arc<Self> {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// The listed `connect` calls (1-based) fail.
    pub fn failing_connects(self: Arc<Self>, calls: impl IntoIterator<Item = usize>) -> Arc<Self> {
        self.failing_connects.lock().extend(calls);
        self
    }

    /// Issue extraction of the n-th report takes `delays[n]`.
    pub fn with_delays(self: Arc<Self>, delays: impl IntoIterator<Item = u64>) -> Arc<Self> {
        self.delays
            .lock()
            .extend(delays.into_iter().map(Duration::from_millis));
        self
    }

    /// Issues returned by every report, before the per-call marker issue.
    pub fn with_issues(self: Arc<Self>, issues: Vec<Issue>) -> Arc<Self> {
        *self.issues.lock() = issues;
        self
    }

    pub fn port(self: &Arc<Self>) -> Arc<dyn Analyzer> {
        Arc::clone(self) as Arc<dyn Analyzer>
    }
}

/// The marker issue carries the report's call number and the changed files it
/// was produced for.
pub fn marker(call: usize, change: &ChangeSet) -> Issue {
    let files: Vec<String> = change
        .changed_files
        .iter()
        .map(|file| file.display().to_string())
        .collect();
    Issue::new(
        IssueOrigin::Typescript,
        Severity::Warning,
        format!("call-{}", call),
        files.join(","),
    )
}

pub fn changed(files: &[&str]) -> ChangeSet {
    ChangeSet::new(files.iter().copied(), Vec::<PathBuf>::new())
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    fn name(&self) -> &str {
        "stub"
    }

    async fn connect(&self) -> CheckResult<()> {
        let call = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_connects.lock().contains(&call) {
            return Err(CheckError::Connect {
                analyzer: "stub".to_string(),
                reason: format!("scripted failure on connect {}", call),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> CheckResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn report(&self, change: &ChangeSet) -> CheckResult<Report> {
        let call = self.reports.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().push(change.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CheckError::analysis("stub", "scripted failure"));
        }

        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);

        let delay = self.delays.lock().pop_front().unwrap_or_default();
        let mut issues = self.issues.lock().clone();
        issues.push(marker(call, change));
        let files: BTreeSet<PathBuf> = change.changed_files.clone();

        let dependency_runs = Arc::clone(&self.dependency_runs);
        let issue_runs = Arc::clone(&self.issue_runs);
        let open = Arc::clone(&self.open);

        Ok(Report::new(
            async move {
                dependency_runs.fetch_add(1, Ordering::SeqCst);
                Ok(Dependencies {
                    files,
                    ..Default::default()
                })
            },
            async move {
                issue_runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(issues)
            },
        )
        .on_close(async move {
            open.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}
