use crate::error::{CheckError, CheckResult};
use ignore::overrides::{Override, OverrideBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// Which analyzer produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueOrigin {
    Typescript,
    Eslint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub origin: IssueOrigin,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Issue {
    pub fn new(
        origin: IssueOrigin,
        severity: Severity,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            severity,
            code: code.into(),
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// One include/exclude rule from the `[issue]` configuration table. Every
/// field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueMatch {
    pub origin: Option<IssueOrigin>,
    pub severity: Option<Severity>,
    pub code: Option<String>,
    /// Gitignore-style glob, relative to the checker context.
    pub file: Option<String>,
}

struct CompiledMatch {
    rule: IssueMatch,
    root: PathBuf,
    file: Option<Override>,
}

impl CompiledMatch {
    fn compile(rule: &IssueMatch, root: &Path) -> CheckResult<Self> {
        let file = match &rule.file {
            Some(glob) => {
                let mut builder = OverrideBuilder::new(root);
                builder
                    .add(glob)
                    .map_err(|e| CheckError::Config(format!("invalid issue file glob '{}': {}", glob, e)))?;
                let matcher = builder
                    .build()
                    .map_err(|e| CheckError::Config(format!("invalid issue file glob '{}': {}", glob, e)))?;
                Some(matcher)
            }
            None => None,
        };

        Ok(Self {
            rule: rule.clone(),
            root: root.to_path_buf(),
            file,
        })
    }

    fn matches(&self, issue: &Issue) -> bool {
        if let Some(origin) = self.rule.origin {
            if issue.origin != origin {
                return false;
            }
        }
        if let Some(severity) = self.rule.severity {
            if issue.severity != severity {
                return false;
            }
        }
        if let Some(ref code) = self.rule.code {
            if &issue.code != code {
                return false;
            }
        }
        if let Some(ref matcher) = self.file {
            match issue.file {
                Some(ref file) => {
                    // Globs are relative to the context; analyzers may report absolute paths.
                    let relative = file.strip_prefix(&self.root).unwrap_or(file);
                    if !matcher.matched(relative, false).is_whitelist() {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

type Predicate = dyn Fn(&Issue) -> bool + Send + Sync;

/// Predicate applied to the final issue list right before delivery.
#[derive(Clone)]
pub struct IssueFilter {
    predicate: Arc<Predicate>,
}

impl IssueFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Issue) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Keeps every issue.
    pub fn accept_all() -> Self {
        Self::new(|_| true)
    }

    /// An issue passes when `include` is empty or one of its rules matches,
    /// and none of the `exclude` rules match.
    pub fn from_rules(include: &[IssueMatch], exclude: &[IssueMatch], context: &Path) -> CheckResult<Self> {
        let root = std::fs::canonicalize(context).unwrap_or_else(|_| context.to_path_buf());
        let include = include
            .iter()
            .map(|rule| CompiledMatch::compile(rule, &root))
            .collect::<CheckResult<Vec<_>>>()?;
        let exclude = exclude
            .iter()
            .map(|rule| CompiledMatch::compile(rule, &root))
            .collect::<CheckResult<Vec<_>>>()?;

        Ok(Self::new(move |issue| {
            let included = include.is_empty() || include.iter().any(|rule| rule.matches(issue));
            included && !exclude.iter().any(|rule| rule.matches(issue))
        }))
    }

    pub fn accepts(&self, issue: &Issue) -> bool {
        (self.predicate)(issue)
    }

    pub fn apply(&self, issues: Vec<Issue>) -> Vec<Issue> {
        filter(issues, |issue| self.accepts(issue))
    }
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl fmt::Debug for IssueFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssueFilter").finish_non_exhaustive()
    }
}

/// Keeps the issues accepted by `predicate`, preserving their order.
pub fn filter<F>(issues: Vec<Issue>, predicate: F) -> Vec<Issue>
where
    F: Fn(&Issue) -> bool,
{
    issues.into_iter().filter(|issue| predicate(issue)).collect()
}
