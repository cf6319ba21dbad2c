use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_EXCLUDE: &[&str] = &[
    "**/target/**",
    "**/node_modules/**",
    "**/dist/**",
    "**/out/**",
    "**/.git/**",
];

/// Identifies one runner configuration. Fixed for the lifetime of a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfig {
    pub workspace_folder: PathBuf,
    /// Runner config file, passed to every runner invocation
    pub config_file: PathBuf,
    /// Runner executable
    pub cli: String,
    /// Arguments placed before the runner subcommand
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub runner: RunnerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub cli: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relative to the config file's directory
    pub config_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Quiet period before a batch of file events is applied
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Glob patterns for paths the watcher ignores
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            exclude: default_exclude(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_exclude() -> Vec<String> {
    DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.runner.cli.trim().is_empty() {
            anyhow::bail!("runner.cli must not be empty");
        }
        if self.runner.config_file.trim().is_empty() {
            anyhow::bail!("runner.config_file must not be empty");
        }
        if self.watch.debounce_ms == 0 {
            anyhow::bail!("watch.debounce_ms must be greater than zero");
        }
        for pattern in &self.watch.exclude {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid watch.exclude pattern '{}'", pattern))?;
        }

        Ok(())
    }

    /// Runner identity rooted at `workspace_folder`
    pub fn test_config(&self, workspace_folder: &Path) -> TestConfig {
        TestConfig {
            workspace_folder: workspace_folder.to_path_buf(),
            config_file: workspace_folder.join(&self.runner.config_file),
            cli: self.runner.cli.clone(),
            args: self.runner.args.clone(),
        }
    }
}
