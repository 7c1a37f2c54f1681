use crate::channel::OutboundMessage;
use crate::issue::{Issue, Severity};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FormatterKind {
    /// Human readable issue blocks followed by a summary line
    Basic,
    /// One JSON document per line
    #[default]
    Json,
}

pub fn format_issue(issue: &Issue) -> String {
    let mut out = format!("{} in ", issue.severity);
    match (&issue.file, issue.line, issue.column) {
        (Some(file), Some(line), Some(column)) => {
            let _ = write!(out, "{}:{}:{}", file.display(), line, column);
        }
        (Some(file), _, _) => {
            let _ = write!(out, "{}", file.display());
        }
        _ => out.push_str("<global>"),
    }
    let _ = write!(out, "\n{}: {}", issue.code, issue.message);
    out
}

pub fn format_message(message: &OutboundMessage, kind: FormatterKind) -> String {
    match kind {
        FormatterKind::Json => serde_json::to_string(message).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"failed to serialize issue list: {}"}}"#, e)
        }),
        FormatterKind::Basic => {
            let OutboundMessage::IssueList { issues, time } = message;
            let mut out = String::new();
            for issue in issues {
                out.push_str(&format_issue(issue));
                out.push_str("\n\n");
            }
            out.push_str(&summary(issues, *time));
            out
        }
    }
}

fn summary(issues: &[Issue], time: u64) -> String {
    let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
    let warnings = issues.len() - errors;
    if issues.is_empty() {
        format!("No issues found in {} ms.", time)
    } else {
        format!(
            "Found {} {} and {} {} in {} ms.",
            errors,
            if errors == 1 { "error" } else { "errors" },
            warnings,
            if warnings == 1 { "warning" } else { "warnings" },
            time
        )
    }
}
