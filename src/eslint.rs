use crate::analyzer::Analyzer;
use crate::change::ChangeSet;
use crate::config::EsLintConfig;
use crate::error::{CheckError, CheckResult};
use crate::file_discovery::{locate_executable, SourceDiscovery};
use crate::issue::{Issue, IssueOrigin, Severity};
use crate::report::Report;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

const NAME: &str = "eslint";

pub fn assert_support(config: &EsLintConfig, context: &Path) -> CheckResult<()> {
    if config.files.is_empty() {
        return Err(CheckError::unsupported(NAME, "no files to lint were configured"));
    }
    if locate_executable(&config.command, context).is_none() {
        return Err(CheckError::unsupported(
            NAME,
            format!("'{}' was not found in node_modules/.bin or PATH", config.command),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LintResult {
    file_path: PathBuf,
    #[serde(default)]
    messages: Vec<LintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LintMessage {
    rule_id: Option<String>,
    severity: u8,
    message: String,
    line: Option<u32>,
    column: Option<u32>,
}

impl LintMessage {
    fn into_issue(self, file: &Path) -> Issue {
        let severity = if self.severity >= 2 { Severity::Error } else { Severity::Warning };
        let mut issue = Issue::new(
            IssueOrigin::Eslint,
            severity,
            self.rule_id.unwrap_or_else(|| "eslint".to_string()),
            self.message,
        );
        issue.file = Some(file.to_path_buf());
        issue.line = self.line;
        issue.column = self.column;
        issue
    }
}

/// Parses `eslint --format json` output into per-file issue lists.
pub fn parse_output(output: &str) -> CheckResult<BTreeMap<PathBuf, Vec<Issue>>> {
    let results: Vec<LintResult> =
        serde_json::from_str(output).map_err(|e| CheckError::analysis(NAME, format!("unreadable output: {}", e)))?;

    Ok(results
        .into_iter()
        .map(|result| {
            let issues = result
                .messages
                .into_iter()
                .map(|message| message.into_issue(&result.file_path))
                .collect();
            (result.file_path, issues)
        })
        .collect())
}

type LintCache = Arc<Mutex<Option<BTreeMap<PathBuf, Vec<Issue>>>>>;

/// Lints incrementally: the first run lints every configured pattern, later
/// runs only re-lint changed files and forget deleted ones.
pub struct EsLintAnalyzer {
    config: EsLintConfig,
    context: PathBuf,
    cache: LintCache,
    connected: AtomicBool,
}

enum LintPlan {
    Full(Vec<OsString>),
    Partial {
        targets: Vec<PathBuf>,
        deleted: Vec<PathBuf>,
    },
}

impl EsLintAnalyzer {
    /// `context` is resolved to an absolute path, matching the `filePath`
    /// keys eslint reports.
    pub fn new(config: EsLintConfig, context: impl Into<PathBuf>) -> Self {
        let context = context.into();
        Self {
            config,
            context: std::fs::canonicalize(&context).unwrap_or(context),
            cache: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
        }
    }

    fn discovery(&self) -> SourceDiscovery {
        SourceDiscovery::new(&self.context, &self.config.extensions)
    }

    fn plan(&self, change: &ChangeSet) -> LintPlan {
        let warm = self.cache.lock().is_some();
        if !warm || change.is_empty() {
            return LintPlan::Full(self.config.files.iter().map(OsString::from).collect());
        }

        let discovery = self.discovery();
        LintPlan::Partial {
            targets: change
                .changed_files
                .iter()
                .filter(|file| discovery.is_source_file(file) && !discovery.is_ignored(file))
                .cloned()
                .collect(),
            deleted: change.deleted_files.iter().cloned().collect(),
        }
    }

    fn command(&self, targets: Vec<OsString>) -> Command {
        let program =
            locate_executable(&self.config.command, &self.context).unwrap_or_else(|| PathBuf::from(&self.config.command));
        let mut command = Command::new(program);
        command
            .arg("--format")
            .arg("json")
            .arg("--no-error-on-unmatched-pattern")
            .args(&self.config.extra_args)
            .args(targets)
            .current_dir(&self.context)
            .kill_on_drop(true);
        command
    }
}

async fn run_lint(mut command: Command) -> CheckResult<BTreeMap<PathBuf, Vec<Issue>>> {
    let output = command
        .output()
        .await
        .map_err(|e| CheckError::analysis(NAME, format!("failed to run eslint: {}", e)))?;

    // Exit status 1 only means lint errors were found.
    if output.status.code().map_or(true, |code| code > 1) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CheckError::analysis(
            NAME,
            format!("eslint exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    parse_output(&String::from_utf8_lossy(&output.stdout))
}

fn flatten(cache: &BTreeMap<PathBuf, Vec<Issue>>) -> Vec<Issue> {
    cache.values().flatten().cloned().collect()
}

#[async_trait]
impl Analyzer for EsLintAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    async fn connect(&self) -> CheckResult<()> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if !self.context.is_dir() {
            self.connected.store(false, Ordering::Release);
            return Err(CheckError::Connect {
                analyzer: NAME.to_string(),
                reason: format!("context {} is not a directory", self.context.display()),
            });
        }
        debug!(analyzer = NAME, "connected");
        Ok(())
    }

    async fn disconnect(&self) -> CheckResult<()> {
        self.connected.store(false, Ordering::Release);
        self.cache.lock().take();
        debug!(analyzer = NAME, "disconnected");
        Ok(())
    }

    async fn report(&self, change: &ChangeSet) -> CheckResult<Report> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(CheckError::analysis(NAME, "analyzer is not connected"));
        }

        let discovery = self.discovery();
        let dependencies = async move {
            tokio::task::spawn_blocking(move || discovery.discover())
                .await
                .map_err(|e| CheckError::analysis(NAME, e))
        };

        let cache = Arc::clone(&self.cache);
        let issues: BoxFuture<'static, CheckResult<Vec<Issue>>> = match self.plan(change) {
            LintPlan::Full(patterns) => {
                info!(analyzer = NAME, patterns = patterns.len(), "linting all files");
                let command = self.command(patterns);
                async move {
                    let linted = run_lint(command).await?;
                    let issues = flatten(&linted);
                    *cache.lock() = Some(linted);
                    Ok::<_, CheckError>(issues)
                }
                .boxed()
            }
            LintPlan::Partial { targets, deleted } => {
                info!(analyzer = NAME, changed = targets.len(), deleted = deleted.len(), "linting changed files");
                let command = (!targets.is_empty())
                    .then(|| self.command(targets.iter().map(OsString::from).collect()));
                let stale: Vec<PathBuf> = deleted
                    .iter()
                    .chain(targets.iter())
                    .map(|file| self.context.join(file))
                    .collect();
                async move {
                    let linted = match command {
                        Some(command) => run_lint(command).await?,
                        None => BTreeMap::new(),
                    };

                    let mut guard = cache.lock();
                    let entries = guard.get_or_insert_with(BTreeMap::new);
                    for file in &stale {
                        entries.remove(file);
                    }
                    entries.extend(linted);
                    Ok::<_, CheckError>(flatten(entries))
                }
                .boxed()
            }
        };

        Ok(Report::new(dependencies, issues))
    }
}
