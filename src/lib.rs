//! Test catalog
//!
//! Keeps an in-memory catalog of test projects, files and discovered tests
//! in sync with:
//! - full listings from an external test runner
//! - on-demand test discovery for a subset of files
//! - filesystem change batches from a workspace watcher
//! - the tree reported back by a finished test run

pub mod backend;
pub mod catalog;
pub mod config;
pub mod events;
pub mod model;
pub mod test_model;
pub mod watcher;

pub use backend::{BackendError, CommandBackend, TestBackend};
pub use catalog::{ChangeOutcome, TestCatalog};
pub use config::{Config, TestConfig, WatchConfig};
pub use events::{ChangeNotifier, Subscription};
pub use model::TestModel;
pub use test_model::{
    Entry, EntryKind, FileEntries, ListFilesReport, Location, ProjectListFilesReport, TestFile,
    TestProject, WorkspaceChange,
};
pub use watcher::{ChangeBatch, WorkspaceWatcher};
