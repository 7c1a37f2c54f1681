use thiserror::Error;

/// Errors raised by analyzers, reports and the coordinator.
///
/// Kept `Clone` so a failure can be observed by every waiter of a memoized
/// report computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("{analyzer} is not supported: {reason}")]
    Unsupported { analyzer: String, reason: String },

    #[error("failed to connect {analyzer}: {reason}")]
    Connect { analyzer: String, reason: String },

    #[error("{analyzer} analysis failed: {reason}")]
    Analysis { analyzer: String, reason: String },

    #[error("report request canceled, a newer request took over its changes")]
    Cancelled,

    #[error("report is already closed")]
    ReportClosed,

    #[error("execution pool is closed")]
    PoolClosed,

    #[error("coordinator is closed")]
    Closed,

    #[error("message channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CheckError {
    pub fn analysis(analyzer: impl Into<String>, reason: impl ToString) -> Self {
        CheckError::Analysis {
            analyzer: analyzer.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(analyzer: impl Into<String>, reason: impl ToString) -> Self {
        CheckError::Unsupported {
            analyzer: analyzer.into(),
            reason: reason.to_string(),
        }
    }
}

pub type CheckResult<T> = std::result::Result<T, CheckError>;
