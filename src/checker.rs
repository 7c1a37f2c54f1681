use crate::analyzer::{AggregatedAnalyzer, Analyzer};
use crate::channel::{InboundMessage, IssueSink, OutboundMessage};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorOptions};
use crate::eslint::{self, EsLintAnalyzer};
use crate::typescript::{self, TypeScriptAnalyzer};
use anyhow::{bail, Context};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The assembled checker process: configuration, analyzers and coordinator.
pub struct Checker {
    config: Config,
    analyzers: Vec<String>,
    coordinator: Arc<Coordinator>,
}

impl Checker {
    /// Builds every analyzer the configuration enables. An enabled analyzer
    /// whose toolchain is missing is a startup error.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(mut config: Config, sink: Arc<dyn IssueSink>) -> crate::Result<Self> {
        config.validate()?;
        config.context = std::fs::canonicalize(&config.context)
            .with_context(|| format!("context {} is not accessible", config.context.display()))?;
        let analyzers = build_analyzers(&config)?;
        Self::with_analyzers(config, analyzers, sink)
    }

    /// Assembles a checker around already constructed analyzers.
    pub fn with_analyzers(
        config: Config,
        analyzers: Vec<Arc<dyn Analyzer>>,
        sink: Arc<dyn IssueSink>,
    ) -> crate::Result<Self> {
        if analyzers.is_empty() {
            warn!("no analyzers are enabled, every issue list will be empty");
        }

        let names = analyzers.iter().map(|a| a.name().to_string()).collect();
        let options = CoordinatorOptions {
            watching: config.watch,
            max_concurrency: config.pool.max_concurrency,
            grace_period: config.pool.grace_period(),
            filter: config.issue_filter()?,
        };
        let port: Arc<dyn Analyzer> = Arc::new(AggregatedAnalyzer::new(analyzers));
        let coordinator = Arc::new(Coordinator::new(port, sink, options));

        Ok(Self {
            config,
            analyzers: names,
            coordinator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn analyzers(&self) -> &[String] {
        &self.analyzers
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Runs the checker. In continuous mode this serves `inbound` until it
    /// closes; otherwise it performs the single one-shot check and returns
    /// the delivered message. A repeated one-shot call does nothing.
    pub async fn main(&self, inbound: Option<mpsc::Receiver<InboundMessage>>) -> crate::Result<Option<OutboundMessage>> {
        info!(
            watching = self.config.watch,
            context = %self.config.context.display(),
            analyzers = ?self.analyzers,
            "Started checker"
        );

        if self.config.watch {
            let Some(inbound) = inbound else {
                bail!("continuous mode needs an inbound message channel");
            };
            Arc::clone(&self.coordinator).watch(inbound).await?;
            return Ok(None);
        }

        Ok(self.coordinator.run_once().await?)
    }

    pub async fn shutdown(&self) -> crate::Result<()> {
        Ok(self.coordinator.shutdown().await?)
    }
}

fn build_analyzers(config: &Config) -> crate::Result<Vec<Arc<dyn Analyzer>>> {
    let mut analyzers: Vec<Arc<dyn Analyzer>> = Vec::new();

    if config.typescript.enabled {
        typescript::assert_support(&config.typescript, &config.context)?;
        analyzers.push(Arc::new(TypeScriptAnalyzer::new(
            config.typescript.clone(),
            &config.context,
        )?));
    }

    if config.eslint.enabled {
        eslint::assert_support(&config.eslint, &config.context)?;
        analyzers.push(Arc::new(EsLintAnalyzer::new(config.eslint.clone(), &config.context)));
    }

    Ok(analyzers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckError;

    #[tokio::test]
    async fn missing_toolchain_fails_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            context: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel::<OutboundMessage>();

        let error = Checker::new(config, Arc::new(tx)).err().unwrap();
        assert!(matches!(
            error.downcast_ref::<CheckError>(),
            Some(CheckError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn nothing_enabled_builds_no_analyzers() {
        let mut config = Config::default();
        config.typescript.enabled = false;
        assert!(build_analyzers(&config).unwrap().is_empty());
    }

    #[tokio::test]
    async fn watching_without_inbound_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let checker = Checker::with_analyzers(Config::default(), Vec::new(), Arc::new(tx)).unwrap();
        assert!(checker.main(None).await.is_err());
        checker.shutdown().await.unwrap();
    }
}
