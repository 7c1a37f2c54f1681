pub mod analyzer;
pub mod change;
pub mod channel;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod eslint;
pub mod file_discovery;
pub mod formatter;
pub mod issue;
pub mod logging;
pub mod pool;
pub mod report;
pub mod typescript;

pub use analyzer::{AggregatedAnalyzer, Analyzer};
pub use change::ChangeSet;
pub use channel::{spawn_reader, InboundMessage, IssueSink, OutboundMessage, StdoutSink};
pub use checker::Checker;
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorOptions, CoordinatorState, CycleState};
pub use error::{CheckError, CheckResult};
pub use formatter::FormatterKind;
pub use issue::{Issue, IssueFilter, IssueMatch, IssueOrigin, Severity};
pub use pool::Pool;
pub use report::{Dependencies, Report};

pub type Result<T> = anyhow::Result<T>;
