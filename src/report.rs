//! Per-cycle report handle.
//!
//! A [`Report`] carries two lazily evaluated computations, the dependency
//! set and the issue list. Each one runs at most once no matter how many
//! times it is awaited, and [`Report::close`] waits for any computation that
//! has already started before releasing the report's resources.

use crate::error::{CheckError, CheckResult};
use crate::issue::Issue;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Files and directories an analysis pass touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    pub files: BTreeSet<PathBuf>,
    pub dirs: BTreeSet<PathBuf>,
    pub excluded: BTreeSet<PathBuf>,
    pub extensions: BTreeSet<String>,
}

impl Dependencies {
    pub fn merge(mut self, other: Dependencies) -> Self {
        self.files.extend(other.files);
        self.dirs.extend(other.dirs);
        self.excluded.extend(other.excluded);
        self.extensions.extend(other.extensions);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

type SharedResult<T> = Shared<BoxFuture<'static, CheckResult<T>>>;

struct Memo<T: Clone> {
    future: SharedResult<T>,
    started: AtomicBool,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new<F>(future: F) -> Self
    where
        F: Future<Output = CheckResult<T>> + Send + 'static,
    {
        Self {
            future: future.boxed().shared(),
            started: AtomicBool::new(false),
        }
    }

    /// Marks the computation as started and hands out a handle to it.
    fn start(&self) -> SharedResult<T> {
        self.started.store(true, Ordering::Release);
        self.future.clone()
    }

    /// Drives a computation that was started but has not finished yet.
    async fn settle(&self) {
        if self.started.load(Ordering::Acquire) && self.future.peek().is_none() {
            let _ = self.future.clone().await;
        }
    }
}

type CloseHook = BoxFuture<'static, CheckResult<()>>;

pub struct Report {
    dependencies: Memo<Dependencies>,
    issues: Memo<Vec<Issue>>,
    close_hook: Mutex<Option<CloseHook>>,
    /// Guards both the closed flag and the start of a computation, so no
    /// computation can start once `close` has begun.
    closed: Mutex<bool>,
}

impl Report {
    /// Builds a report from the two derived computations. Neither future is
    /// polled until the matching accessor is awaited.
    pub fn new<D, I>(dependencies: D, issues: I) -> Self
    where
        D: Future<Output = CheckResult<Dependencies>> + Send + 'static,
        I: Future<Output = CheckResult<Vec<Issue>>> + Send + 'static,
    {
        Self {
            dependencies: Memo::new(dependencies),
            issues: Memo::new(issues),
            close_hook: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }

    /// A report whose computations resolve immediately.
    pub fn ready(dependencies: Dependencies, issues: Vec<Issue>) -> Self {
        Self::new(future::ready(Ok(dependencies)), future::ready(Ok(issues)))
    }

    /// Chains a release step that runs when the report is closed, after any
    /// hook registered earlier.
    pub fn on_close<F>(self, hook: F) -> Self
    where
        F: Future<Output = CheckResult<()>> + Send + 'static,
    {
        {
            let mut slot = self.close_hook.lock();
            let chained: CloseHook = match slot.take() {
                Some(previous) => async move {
                    previous.await?;
                    hook.await
                }
                .boxed(),
                None => hook.boxed(),
            };
            *slot = Some(chained);
        }
        self
    }

    /// Merges several reports into one. Dependencies are unioned, issues are
    /// concatenated in the order of `parts`, and closing the aggregate closes
    /// every part.
    pub fn aggregate(parts: Vec<Report>) -> Self {
        let parts = Arc::new(parts);
        let dependency_parts = Arc::clone(&parts);
        let issue_parts = Arc::clone(&parts);

        Report::new(
            async move {
                let all = future::try_join_all(dependency_parts.iter().map(|part| part.dependencies())).await?;
                Ok::<_, CheckError>(all.into_iter().fold(Dependencies::default(), Dependencies::merge))
            },
            async move {
                let all = future::try_join_all(issue_parts.iter().map(|part| part.issues())).await?;
                Ok::<_, CheckError>(all.concat())
            },
        )
        .on_close(async move {
            let mut first_error = None;
            for part in parts.iter() {
                if let Err(e) = part.close().await {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    pub async fn dependencies(&self) -> CheckResult<Dependencies> {
        self.read(&self.dependencies).await
    }

    pub async fn issues(&self) -> CheckResult<Vec<Issue>> {
        self.read(&self.issues).await
    }

    async fn read<T>(&self, memo: &Memo<T>) -> CheckResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let computation = {
            let closed = self.closed.lock();
            if *closed && memo.future.peek().is_none() {
                return Err(CheckError::ReportClosed);
            }
            memo.start()
        };
        computation.await
    }

    /// Releases the report. Safe to call more than once and safe to call
    /// when neither computation was ever awaited.
    pub async fn close(&self) -> CheckResult<()> {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        self.dependencies.settle().await;
        self.issues.settle().await;

        let hook = self.close_hook.lock().take();
        match hook {
            Some(hook) => hook.await,
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Report")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
