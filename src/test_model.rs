//! Test model definitions
//!
//! Core data structures for the test catalog: projects, files, the entry
//! trees reported by the runner, and the change batches fed in by the
//! workspace watcher.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Kind of a reported entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Project,
    File,
    Suite,
    Test,
    /// Anything the runner reports that the catalog does not interpret
    #[serde(other)]
    Other,
}

/// Source position of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// A node of the tree reported by the runner (project, file, suite or test)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub title: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Entry>>,
}

impl Entry {
    pub fn is_test(&self) -> bool {
        self.kind == EntryKind::Test
    }

    /// Children, or an empty slice when the runner sent none
    pub fn children(&self) -> &[Entry] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Key used to collapse duplicate test nodes: `file:line:title`
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.location.file, self.location.line, self.title)
    }
}

/// Discovery state of a file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileEntries {
    /// Discovery was never attempted for this file
    #[default]
    NotDiscovered,
    /// Discovery ran; the list may be empty
    Discovered(Vec<Entry>),
}

impl FileEntries {
    pub fn is_discovered(&self) -> bool {
        matches!(self, FileEntries::Discovered(_))
    }

    pub fn as_slice(&self) -> Option<&[Entry]> {
        match self {
            FileEntries::NotDiscovered => None,
            FileEntries::Discovered(entries) => Some(entries),
        }
    }
}

/// A source file tracked under a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    /// Name of the owning project
    pub project: String,
    pub file: String,
    pub entries: FileEntries,
}

impl TestFile {
    pub fn new(project: &str, file: &str) -> Self {
        Self {
            project: project.to_string(),
            file: file.to_string(),
            entries: FileEntries::NotDiscovered,
        }
    }
}

/// A named runner project with its own test directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestProject {
    pub name: String,
    /// Raw prefix used to decide whether a created file may belong here
    pub test_dir: String,
    /// First project in the runner's reported order
    pub is_first: bool,
    pub files: HashMap<String, TestFile>,
}

impl TestProject {
    pub fn new(name: &str, test_dir: &str, is_first: bool) -> Self {
        Self {
            name: name.to_string(),
            test_dir: test_dir.to_string(),
            is_first,
            files: HashMap::new(),
        }
    }

    pub fn file(&self, path: &str) -> Option<&TestFile> {
        self.files.get(path)
    }

    /// Number of files whose discovery already ran
    pub fn discovered_count(&self) -> usize {
        self.files
            .values()
            .filter(|f| f.entries.is_discovered())
            .count()
    }
}

/// One project of a full listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectListFilesReport {
    pub name: String,
    #[serde(rename = "testDir")]
    pub test_dir: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Authoritative project/file enumeration from the runner
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListFilesReport {
    #[serde(default)]
    pub projects: Vec<ProjectListFilesReport>,
}

/// A batch of filesystem changes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkspaceChange {
    pub created: HashSet<String>,
    pub changed: HashSet<String>,
    pub deleted: HashSet<String>,
}

impl WorkspaceChange {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.changed.len() + self.deleted.len()
    }
}
