//! Workspace watcher
//!
//! Turns filesystem events into [`WorkspaceChange`] batches and applies them
//! to a [`TestModel`].

use anyhow::Result;
use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::model::TestModel;
use crate::test_model::WorkspaceChange;

/// Accumulates file events until the debounce window closes
#[derive(Debug, Default)]
pub struct ChangeBatch {
    change: WorkspaceChange,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.change.is_empty()
    }

    /// Fold one notify event into the batch
    pub fn record(&mut self, event: &Event) {
        match event.kind {
            EventKind::Create(_) => event.paths.iter().for_each(|p| self.created(p)),
            EventKind::Remove(_) => event.paths.iter().for_each(|p| self.deleted(p)),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.deleted(from);
                    // The target may be an existing file replaced by an atomic save.
                    self.replaced(to);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                event.paths.iter().for_each(|p| self.deleted(p))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                event.paths.iter().for_each(|p| self.created(p))
            }
            // One event per path, without telling which side of the rename it is.
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
                for path in &event.paths {
                    if path.exists() {
                        self.created(path);
                    } else {
                        self.deleted(path);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => event.paths.iter().for_each(|p| self.changed(p)),
            _ => {}
        }
    }

    /// Take the accumulated change, leaving the batch empty
    pub fn take(&mut self) -> WorkspaceChange {
        std::mem::take(&mut self.change)
    }

    fn created(&mut self, path: &Path) {
        let path = path_key(path);
        // Deleted and recreated within one batch: the content may differ.
        if self.change.deleted.remove(&path) {
            self.change.changed.insert(path.clone());
        }
        self.change.created.insert(path);
    }

    fn replaced(&mut self, path: &Path) {
        let path = path_key(path);
        self.change.deleted.remove(&path);
        self.change.changed.insert(path.clone());
        self.change.created.insert(path);
    }

    fn changed(&mut self, path: &Path) {
        let path = path_key(path);
        if !self.change.created.contains(&path) && !self.change.deleted.contains(&path) {
            self.change.changed.insert(path);
        }
    }

    fn deleted(&mut self, path: &Path) {
        let path = path_key(path);
        self.change.created.remove(&path);
        self.change.changed.remove(&path);
        self.change.deleted.insert(path);
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Watches a workspace and feeds change batches to the model
pub struct WorkspaceWatcher {
    model: TestModel,
    root: PathBuf,
    debounce: Duration,
    exclude: Vec<Pattern>,
}

impl WorkspaceWatcher {
    pub fn new(model: TestModel, root: &Path, config: &WatchConfig) -> Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            model,
            root: root.to_path_buf(),
            debounce: Duration::from_millis(config.debounce_ms),
            exclude,
        })
    }

    /// Watch until the event source goes away. Blocks the calling thread.
    pub fn start(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => warn!(error = %err, "watch error"),
            },
            Config::default(),
        )?;

        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        debug!(root = %self.root.display(), "watching workspace");

        self.event_loop(rx);

        Ok(())
    }

    fn event_loop(&self, rx: Receiver<Event>) {
        let mut batch = ChangeBatch::new();

        loop {
            let event = if batch.is_empty() {
                match rx.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                }
            } else {
                match rx.recv_timeout(self.debounce) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        self.flush(&mut batch);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            if event.paths.iter().all(|p| self.is_excluded(p)) {
                continue;
            }
            batch.record(&self.without_excluded(event));
        }

        self.flush(&mut batch);
    }

    fn flush(&self, batch: &mut ChangeBatch) {
        let change = batch.take();
        if change.is_empty() {
            return;
        }
        debug!(
            created = change.created.len(),
            changed = change.changed.len(),
            deleted = change.deleted.len(),
            "applying workspace change"
        );
        self.model.apply_change(&change);
    }

    fn without_excluded(&self, mut event: Event) -> Event {
        // A rename needs both paths to keep its from/to pairing.
        if !matches!(event.kind, EventKind::Modify(ModifyKind::Name(RenameMode::Both))) {
            event.paths.retain(|p| !self.is_excluded(p));
        }
        event
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|pattern| pattern.matches_path(path))
    }
}
