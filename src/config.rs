use crate::formatter::FormatterKind;
use crate::issue::{IssueFilter, IssueMatch};
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, time::Duration};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Continuous mode when true, a single run otherwise
    #[serde(rename = "async")]
    pub watch: bool,
    pub context: PathBuf,
    pub typescript: TypeScriptConfig,
    pub eslint: EsLintConfig,
    pub issue: IssueConfig,
    pub formatter: FormatterConfig,
    pub logger: LoggerConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeScriptConfig {
    pub enabled: bool,
    pub config_file: PathBuf,
    pub command: String,
    pub vue: bool,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsLintConfig {
    pub enabled: bool,
    pub files: Vec<String>,
    pub command: String,
    pub extensions: Vec<String>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueConfig {
    pub include: Vec<IssueMatch>,
    pub exclude: Vec<IssueMatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub kind: FormatterKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerInfrastructure {
    #[default]
    Console,
    Silent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub infrastructure: LoggerInfrastructure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub grace_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch: true,
            context: PathBuf::from("."),
            typescript: TypeScriptConfig::default(),
            eslint: EsLintConfig::default(),
            issue: IssueConfig::default(),
            formatter: FormatterConfig::default(),
            logger: LoggerConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for TypeScriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config_file: PathBuf::from("tsconfig.json"),
            command: "tsc".to_string(),
            vue: false,
            extra_args: Vec::new(),
        }
    }
}

impl Default for EsLintConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            files: Vec::new(),
            command: "eslint".to_string(),
            extensions: vec![
                "js".to_string(),
                "jsx".to_string(),
                "ts".to_string(),
                "tsx".to_string(),
            ],
            extra_args: Vec::new(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            infrastructure: LoggerInfrastructure::Console,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            grace_period_ms: 10,
        }
    }
}

impl PoolConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Config {
    /// Get the default config file path (~/.recheck.toml)
    pub fn default_config_path() -> crate::Result<PathBuf> {
        let home_dir = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| anyhow!("Could not determine home directory"))?;
        Ok(PathBuf::from(home_dir).join(".recheck.toml"))
    }

    /// Load config from the default location, falling back to defaults if the file doesn't exist
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            info!(path = %config_path.display(), "loading configuration");
            Self::from_file(&config_path)
        } else {
            info!(path = %config_path.display(), "no config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load config from a specific file path
    pub fn from_file(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to a file
    pub fn to_file(&self, path: &PathBuf) -> crate::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Rejects settings the checker cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pool.max_concurrency == 0 {
            bail!("pool.max_concurrency must be at least 1");
        }
        if self.eslint.enabled && self.eslint.files.is_empty() {
            bail!("eslint.files must list at least one pattern when eslint is enabled");
        }
        if self.logger.level.parse::<tracing::Level>().is_err() {
            bail!("unknown logger.level '{}'", self.logger.level);
        }
        Ok(())
    }

    /// Builds the predicate applied to every delivered issue list.
    pub fn issue_filter(&self) -> crate::Result<IssueFilter> {
        Ok(IssueFilter::from_rules(&self.issue.include, &self.issue.exclude, &self.context)?)
    }

    /// Create a config file with all available options documented
    pub fn create_documented_config() -> String {
        r#"# recheck configuration file
# This file configures how recheck coordinates type checking and linting

# Keep running and re-check on every change notification (true),
# or run a single check and exit (false)
async = true

# Project directory the analyzers run in
context = "."

[typescript]
enabled = true
# Project file passed to `tsc -p`, relative to the context
config_file = "tsconfig.json"
# Resolved from node_modules/.bin first, then PATH
command = "tsc"
# Also track .vue files as dependencies
vue = false
extra_args = []

[eslint]
enabled = false
# Patterns passed to eslint on a full run
files = ["src/**/*.{js,jsx,ts,tsx}"]
command = "eslint"
# Changed files with these extensions are re-linted
extensions = ["js", "jsx", "ts", "tsx"]
extra_args = []

[issue]
# An issue is reported when it matches any include rule (or there are none)
# and no exclude rule. Rules may set origin, severity, code and file (glob).
include = []
exclude = [
    # { file = "**/__generated__/**" },
    # { origin = "eslint", severity = "warning" },
]

[formatter]
# "json" writes one message per line, "basic" prints readable issue blocks
kind = "json"

[logger]
# trace, debug, info, warn or error
level = "info"
# "console" logs to stderr, "silent" disables logging
infrastructure = "console"

[pool]
# How many check cycles may run at once
max_concurrency = 1
# One-shot runs wait this long before reporting that checking is in progress
grace_period_ms = 10
"#
        .to_string()
    }
}
