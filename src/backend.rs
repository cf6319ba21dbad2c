//! Runner backend
//!
//! The catalog reaches the test runner through [`TestBackend`]: one
//! synchronous file listing call and one asynchronous discovery call.
//! [`CommandBackend`] implements both by spawning the configured runner
//! command and decoding its JSON output.

use anyhow::Result;
use futures::future::BoxFuture;
use std::process::{Command, ExitStatus, Output, Stdio};
use thiserror::Error;
use tracing::debug;

use crate::config::TestConfig;
use crate::test_model::{Entry, ListFilesReport};

const LIST_FILES_COMMAND: &str = "list-files";
const LIST_TESTS_COMMAND: &str = "list-tests";

/// Access to the external test runner
pub trait TestBackend: Send + Sync {
    /// Enumerate projects and their test files.
    ///
    /// An error is treated as a transient failure: the catalog keeps its
    /// current state.
    fn list_files(&self, config: &TestConfig) -> Result<ListFilesReport>;

    /// Discover the tests in `files`, returning one entry per project
    fn list_tests(&self, config: &TestConfig, files: &[String]) -> BoxFuture<'static, Result<Vec<Entry>>>;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn `{cli}`: {source}")]
    Spawn {
        cli: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{cli} {command}` exited with {status}: {stderr}")]
    Failed {
        cli: String,
        command: &'static str,
        status: ExitStatus,
        stderr: String,
    },
    #[error("could not decode `{command}` output: {source}")]
    Decode {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Backend that shells out to the runner command from the config
#[derive(Debug, Clone, Default)]
pub struct CommandBackend;

impl CommandBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TestBackend for CommandBackend {
    fn list_files(&self, config: &TestConfig) -> Result<ListFilesReport> {
        debug!(cli = %config.cli, "listing files");
        let output = Command::new(&config.cli)
            .args(&config.args)
            .arg(LIST_FILES_COMMAND)
            .arg("--config")
            .arg(&config.config_file)
            .current_dir(&config.workspace_folder)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| BackendError::Spawn { cli: config.cli.clone(), source })?;

        Ok(decode_output(config, LIST_FILES_COMMAND, &output)?)
    }

    fn list_tests(&self, config: &TestConfig, files: &[String]) -> BoxFuture<'static, Result<Vec<Entry>>> {
        Box::pin(run_list_tests(config.clone(), files.to_vec()))
    }
}

async fn run_list_tests(config: TestConfig, files: Vec<String>) -> Result<Vec<Entry>> {
    debug!(cli = %config.cli, files = files.len(), "listing tests");
    let output = tokio::process::Command::new(&config.cli)
        .args(&config.args)
        .arg(LIST_TESTS_COMMAND)
        .arg("--config")
        .arg(&config.config_file)
        .args(&files)
        .current_dir(&config.workspace_folder)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| BackendError::Spawn { cli: config.cli.clone(), source })?;

    Ok(decode_output(&config, LIST_TESTS_COMMAND, &output)?)
}

fn decode_output<T: serde::de::DeserializeOwned>(
    config: &TestConfig,
    command: &'static str,
    output: &Output,
) -> std::result::Result<T, BackendError> {
    if !output.status.success() {
        return Err(BackendError::Failed {
            cli: config.cli.clone(),
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|source| BackendError::Decode { command, source })
}
