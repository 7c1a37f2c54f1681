use crate::analyzer::Analyzer;
use crate::change::ChangeSet;
use crate::config::TypeScriptConfig;
use crate::error::{CheckError, CheckResult};
use crate::file_discovery::{locate_executable, SourceDiscovery};
use crate::issue::{Issue, IssueOrigin, Severity};
use crate::report::Report;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

const NAME: &str = "typescript";
const ORIGIN: IssueOrigin = IssueOrigin::Typescript;

/// Fails fast when the TypeScript toolchain or project config is missing.
pub fn assert_support(config: &TypeScriptConfig, context: &Path) -> CheckResult<()> {
    let config_file = context.join(&config.config_file);
    if !config_file.is_file() {
        return Err(CheckError::unsupported(
            NAME,
            format!("config file {} does not exist", config_file.display()),
        ));
    }
    if locate_executable(&config.command, context).is_none() {
        return Err(CheckError::unsupported(
            NAME,
            format!("'{}' was not found in node_modules/.bin or PATH", config.command),
        ));
    }
    Ok(())
}

/// Parses `tsc --pretty false` output.
#[derive(Debug, Clone)]
pub struct DiagnosticParser {
    located: Regex,
    global: Regex,
}

impl DiagnosticParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            located: Regex::new(
                r"^(?P<file>.+?)\((?P<line>\d+),(?P<column>\d+)\): (?P<severity>error|warning|message) (?P<code>TS\d+): (?P<message>.*)$",
            )?,
            global: Regex::new(r"^(?P<severity>error|warning|message) (?P<code>TS\d+): (?P<message>.*)$")?,
        })
    }

    pub fn parse(&self, output: &str, context: &Path) -> Vec<Issue> {
        let mut issues: Vec<Issue> = Vec::new();

        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(caps) = self.located.captures(line) {
                let file = PathBuf::from(&caps["file"]);
                let file = if file.is_absolute() { file } else { context.join(file) };
                issues.push(
                    Issue::new(ORIGIN, severity(&caps["severity"]), &caps["code"], &caps["message"]).at(
                        file,
                        caps["line"].parse().unwrap_or(0),
                        caps["column"].parse().unwrap_or(0),
                    ),
                );
            } else if let Some(caps) = self.global.captures(line) {
                issues.push(Issue::new(
                    ORIGIN,
                    severity(&caps["severity"]),
                    &caps["code"],
                    &caps["message"],
                ));
            } else if line.starts_with(char::is_whitespace) {
                // Continuation of a multi-line message
                if let Some(last) = issues.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line.trim_end());
                }
            }
        }

        issues
    }
}

fn severity(raw: &str) -> Severity {
    match raw {
        "error" => Severity::Error,
        _ => Severity::Warning,
    }
}

pub struct TypeScriptAnalyzer {
    config: TypeScriptConfig,
    context: PathBuf,
    parser: Arc<DiagnosticParser>,
    connected: AtomicBool,
}

impl TypeScriptAnalyzer {
    pub fn new(config: TypeScriptConfig, context: impl Into<PathBuf>) -> CheckResult<Self> {
        let parser = DiagnosticParser::new().map_err(|e| CheckError::Config(e.to_string()))?;
        Ok(Self {
            config,
            context: context.into(),
            parser: Arc::new(parser),
            connected: AtomicBool::new(false),
        })
    }

    fn discovery(&self) -> SourceDiscovery {
        let mut extensions = vec!["ts", "tsx"];
        if self.config.vue {
            extensions.push("vue");
        }
        SourceDiscovery::new(&self.context, extensions)
    }
}

#[async_trait]
impl Analyzer for TypeScriptAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    async fn connect(&self) -> CheckResult<()> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.context.is_dir() {
            return Err(CheckError::Connect {
                analyzer: NAME.to_string(),
                reason: format!("context {} is not a directory", self.context.display()),
            });
        }
        self.connected.store(true, Ordering::Release);
        debug!(analyzer = NAME, "connected");
        Ok(())
    }

    async fn disconnect(&self) -> CheckResult<()> {
        self.connected.store(false, Ordering::Release);
        debug!(analyzer = NAME, "disconnected");
        Ok(())
    }

    async fn report(&self, change: &ChangeSet) -> CheckResult<Report> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(CheckError::analysis(NAME, "analyzer is not connected"));
        }
        info!(
            analyzer = NAME,
            changed = change.changed_files.len(),
            deleted = change.deleted_files.len(),
            "type checking"
        );

        let discovery = self.discovery();
        let dependencies = async move {
            tokio::task::spawn_blocking(move || discovery.discover())
                .await
                .map_err(|e| CheckError::analysis(NAME, e))
        };

        let mut command = Command::new(
            locate_executable(&self.config.command, &self.context).unwrap_or_else(|| PathBuf::from(&self.config.command)),
        );
        command
            .arg("--noEmit")
            .arg("--pretty")
            .arg("false")
            .arg("-p")
            .arg(&self.config.config_file)
            .args(&self.config.extra_args)
            .current_dir(&self.context)
            .kill_on_drop(true);
        let parser = Arc::clone(&self.parser);
        let context = self.context.clone();

        let issues = async move {
            let output = command
                .output()
                .await
                .map_err(|e| CheckError::analysis(NAME, format!("failed to run tsc: {}", e)))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let issues = parser.parse(&stdout, &context);

            if !output.status.success() && issues.is_empty() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(CheckError::analysis(
                    NAME,
                    format!("tsc exited with {}: {}", output.status, stderr.trim()),
                ));
            }
            Ok(issues)
        };

        Ok(Report::new(dependencies, issues))
    }
}
