use crate::change::ChangeSet;
use crate::error::{CheckError, CheckResult};
use crate::report::Report;
use async_trait::async_trait;
use futures::future;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Uniform contract every checking engine is driven through.
///
/// `connect` is called before every cycle and must be cheap when the analyzer
/// is already connected. `report` is never called again on the same instance
/// until the previously returned [`Report`] has been closed.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> CheckResult<()>;

    async fn disconnect(&self) -> CheckResult<()>;

    async fn report(&self, change: &ChangeSet) -> CheckResult<Report>;
}

/// Drives several analyzers as one.
///
/// Only one aggregated report may be open at a time. Requests that arrive
/// while a report is open queue their change sets; the next request to get
/// through merges everything queued so far, and requests whose changes were
/// already taken fail with [`CheckError::Cancelled`].
///
/// The coordinator closes the previous report before requesting the next, so
/// under it the gate is always free and nothing queues. Merging only happens
/// for callers that request reports concurrently on their own.
pub struct AggregatedAnalyzer {
    analyzers: Vec<Arc<dyn Analyzer>>,
    gate: Arc<Semaphore>,
    queued: Mutex<Vec<ChangeSet>>,
}

impl AggregatedAnalyzer {
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        Self {
            analyzers,
            gate: Arc::new(Semaphore::new(1)),
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}

#[async_trait]
impl Analyzer for AggregatedAnalyzer {
    fn name(&self) -> &str {
        "aggregated"
    }

    async fn connect(&self) -> CheckResult<()> {
        for analyzer in &self.analyzers {
            analyzer.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> CheckResult<()> {
        let mut first_error = None;
        for analyzer in &self.analyzers {
            if let Err(e) = analyzer.disconnect().await {
                warn!(analyzer = analyzer.name(), error = %e, "disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn report(&self, change: &ChangeSet) -> CheckResult<Report> {
        self.queued.lock().push(change.clone());

        let permit = Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| CheckError::Closed)?;

        let queued = std::mem::take(&mut *self.queued.lock());
        if queued.is_empty() {
            debug!("report request superseded by a later request");
            return Err(CheckError::Cancelled);
        }
        let change = ChangeSet::aggregate(queued);

        let results = future::join_all(self.analyzers.iter().map(|analyzer| analyzer.report(&change))).await;

        let mut reports = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(error) = first_error {
            for report in &reports {
                if let Err(e) = report.close().await {
                    warn!(error = %e, "failed to close partial report");
                }
            }
            return Err(error);
        }

        Ok(Report::aggregate(reports).on_close(async move {
            drop(permit);
            Ok(())
        }))
    }
}
