//! Message channel between the checker and its parent process.

use crate::change::ChangeSet;
use crate::error::{CheckError, CheckResult};
use crate::formatter::{format_message, FormatterKind};
use crate::issue::Issue;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    ChangedFiles { files: ChangeSet },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    IssueList { issues: Vec<Issue>, time: u64 },
}

impl OutboundMessage {
    pub fn issues(&self) -> &[Issue] {
        match self {
            OutboundMessage::IssueList { issues, .. } => issues,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.issues().iter().any(Issue::is_error)
    }
}

/// Receiving end for finished issue lists.
pub trait IssueSink: Send + Sync {
    fn deliver(&self, message: OutboundMessage) -> CheckResult<()>;
}

impl IssueSink for mpsc::UnboundedSender<OutboundMessage> {
    fn deliver(&self, message: OutboundMessage) -> CheckResult<()> {
        self.send(message)
            .map_err(|_| CheckError::Channel("issue receiver dropped".to_string()))
    }
}

/// Writes every outbound message to stdout.
#[derive(Debug, Clone, Copy)]
pub struct StdoutSink {
    format: FormatterKind,
}

impl StdoutSink {
    pub fn new(format: FormatterKind) -> Self {
        Self { format }
    }
}

impl IssueSink for StdoutSink {
    fn deliver(&self, message: OutboundMessage) -> CheckResult<()> {
        let text = format_message(&message, self.format);
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", text)
            .and_then(|_| stdout.flush())
            .map_err(|e| CheckError::Channel(e.to_string()))
    }
}

/// Reads newline-delimited JSON messages from `source` into a channel.
/// Blank and malformed lines are skipped; the channel closes at end of input.
pub fn spawn_reader<R>(source: R, capacity: usize) -> mpsc::Receiver<InboundMessage>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<InboundMessage>(line) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                debug!("inbound receiver dropped, stopping reader");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring malformed inbound message"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read inbound messages");
                    break;
                }
            }
        }
    });

    rx
}
