//! Shared test model
//!
//! [`TestModel`] is the public face of the catalog: it calls the runner
//! backend, applies the merge steps from [`crate::catalog`] and fires one
//! change notification per mutating call. Discovery is the only
//! asynchronous step and runs without holding the catalog, so listings and
//! change batches may land while it is in flight.

use std::collections::HashSet;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::TestBackend;
use crate::catalog::TestCatalog;
use crate::config::TestConfig;
use crate::events::{ChangeNotifier, Subscription};
use crate::test_model::{Entry, ListFilesReport, WorkspaceChange};

struct Inner {
    config: TestConfig,
    backend: Arc<dyn TestBackend>,
    catalog: Mutex<TestCatalog>,
    notifier: ChangeNotifier,
}

/// Cheaply cloneable handle to one catalog
#[derive(Clone)]
pub struct TestModel {
    inner: Arc<Inner>,
}

impl TestModel {
    pub fn new(config: TestConfig, backend: Arc<dyn TestBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                catalog: Mutex::new(TestCatalog::new()),
                notifier: ChangeNotifier::new(),
            }),
        }
    }

    pub fn config(&self) -> &TestConfig {
        &self.inner.config
    }

    /// Call `callback` after every update until the subscription drops
    pub fn on_updated<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe(callback)
    }

    /// Receiver that yields one `()` per update
    pub fn updates(&self) -> Receiver<()> {
        self.inner.notifier.channel()
    }

    /// Run `f` against the current catalog state
    pub fn read<R>(&self, f: impl FnOnce(&TestCatalog) -> R) -> R {
        f(&*self.catalog())
    }

    /// Copy of the current catalog state
    pub fn snapshot(&self) -> TestCatalog {
        self.catalog().clone()
    }

    pub fn all_files(&self) -> HashSet<String> {
        self.catalog().all_files().clone()
    }

    pub fn project_names(&self) -> Vec<String> {
        self.catalog().project_names()
    }

    /// Flattened, deduplicated tests of a project
    pub fn test_entries(&self, project: &str) -> Vec<Entry> {
        self.catalog().test_entries(project)
    }

    /// Full listing followed by one update notification
    pub fn list_files(&self) {
        // The runner call blocks; readers keep the catalog meanwhile.
        if let Some(report) = self.fetch_listing() {
            let mut catalog = self.catalog();
            catalog.merge_listing(&report);
            info!(
                projects = catalog.projects().len(),
                files = catalog.all_files().len(),
                "catalog listed"
            );
        }
        self.inner.notifier.fire();
    }

    /// Apply a batch of workspace changes.
    ///
    /// Fires one notification when projects or files were added or removed.
    /// Changed files that were already discovered are rediscovered on a
    /// spawned task, which fires its own notification; its handle is
    /// returned so callers can wait for it.
    pub fn apply_change(&self, change: &WorkspaceChange) -> Option<JoinHandle<()>> {
        let relist = if self.read(|c| c.has_created_test_files(change)) {
            self.fetch_listing()
        } else {
            None
        };
        let outcome = self.catalog().workspace_changed(change, || relist);
        debug!(
            changes = change.len(),
            structure_changed = outcome.structure_changed,
            rediscover = outcome.files_to_load.len(),
            "workspace change applied"
        );

        if outcome.structure_changed {
            self.inner.notifier.fire();
        }

        if outcome.files_to_load.is_empty() {
            return None;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let model = self.clone();
                Some(handle.spawn(async move { model.list_tests(&outcome.files_to_load).await }))
            }
            Err(_) => {
                warn!(
                    files = outcome.files_to_load.len(),
                    "no async runtime, skipping rediscovery of changed files"
                );
                None
            }
        }
    }

    /// Discover tests in `files` and merge the results.
    ///
    /// Files unknown to the catalog are dropped first; if none remain the
    /// runner is not called and nothing fires. A failed discovery leaves the
    /// catalog untouched.
    pub async fn list_tests(&self, files: &[String]) {
        let files_to_load = self.catalog().files_to_load(files);
        if files_to_load.is_empty() {
            return;
        }

        let discovery = self
            .inner
            .backend
            .list_tests(&self.inner.config, &files_to_load);
        let project_entries = match discovery.await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, files = files_to_load.len(), "test discovery failed");
                return;
            }
        };

        self.catalog().update_projects(&project_entries, &files_to_load);
        debug!(files = files_to_load.len(), "discovery merged");
        self.inner.notifier.fire();
    }

    /// Merge the tree a test run reported for `project`
    pub fn update_from_running_project(&self, project: &str, projects: &[Entry]) {
        let updated = self.catalog().update_from_running_project(project, projects);
        if updated {
            self.inner.notifier.fire();
        }
    }

    fn fetch_listing(&self) -> Option<ListFilesReport> {
        match self.inner.backend.list_files(&self.inner.config) {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "listing files failed, keeping catalog as is");
                None
            }
        }
    }

    fn catalog(&self) -> MutexGuard<'_, TestCatalog> {
        self.inner.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TestModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestModel")
            .field("config", &self.inner.config)
            .field("notifier", &self.inner.notifier)
            .finish()
    }
}
