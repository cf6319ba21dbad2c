//! Catalog store and reconciliation
//!
//! Owns the project -> file -> entry tree and the flat index of every known
//! file path. All merge steps live here as synchronous operations; the
//! runner calls and change notifications are wired up by [`crate::model`].

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::test_model::{
    Entry, FileEntries, ListFilesReport, ProjectListFilesReport, TestFile, TestProject,
    WorkspaceChange,
};

/// What a change batch did to the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeOutcome {
    /// Projects or files were added or removed
    pub structure_changed: bool,
    /// Already discovered files that need discovery again
    pub files_to_load: Vec<String>,
}

/// In-memory tree of projects, files and discovered entries
#[derive(Debug, Clone, Default)]
pub struct TestCatalog {
    projects: HashMap<String, TestProject>,
    all_files: HashSet<String>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projects(&self) -> &HashMap<String, TestProject> {
        &self.projects
    }

    pub fn project(&self, name: &str) -> Option<&TestProject> {
        self.projects.get(name)
    }

    pub fn file(&self, project: &str, path: &str) -> Option<&TestFile> {
        self.projects.get(project).and_then(|p| p.files.get(path))
    }

    /// Project names, the first project leading and the rest sorted
    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<&TestProject> = self.projects.values().collect();
        names.sort_by(|a, b| b.is_first.cmp(&a.is_first).then_with(|| a.name.cmp(&b.name)));
        names.into_iter().map(|p| p.name.clone()).collect()
    }

    /// Every file path known to any project
    pub fn all_files(&self) -> &HashSet<String> {
        &self.all_files
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Merge a full listing into the catalog.
    ///
    /// Projects and files are created or pruned to match the report. Files
    /// that survive keep whatever discovery already produced for them.
    pub fn merge_listing(&mut self, report: &ListFilesReport) {
        let mut projects_to_keep = HashSet::new();

        for (index, project_report) in report.projects.iter().enumerate() {
            projects_to_keep.insert(project_report.name.clone());
            let project = self
                .projects
                .entry(project_report.name.clone())
                .or_insert_with(|| {
                    TestProject::new(&project_report.name, &project_report.test_dir, index == 0)
                });
            project.is_first = index == 0;
            update_project(project, project_report);
        }

        self.projects.retain(|name, _| {
            let keep = projects_to_keep.contains(name);
            if !keep {
                debug!(project = %name, "dropping project missing from listing");
            }
            keep
        });

        self.recalculate_all_files();
    }

    /// Whether a created file lands under some project's test directory
    pub fn has_created_test_files(&self, change: &WorkspaceChange) -> bool {
        // Raw string prefix, not path-segment aware.
        self.projects.values().any(|project| {
            change
                .created
                .iter()
                .any(|file| file.starts_with(&project.test_dir))
        })
    }

    /// Apply a batch of filesystem changes.
    ///
    /// `relist` is asked for a fresh listing when a created file lands under
    /// some project's test directory; `None` leaves the catalog as it is.
    pub fn workspace_changed<F>(&mut self, change: &WorkspaceChange, relist: F) -> ChangeOutcome
    where
        F: FnOnce() -> Option<ListFilesReport>,
    {
        let mut outcome = ChangeOutcome::default();

        if !change.deleted.is_empty() {
            for project in self.projects.values_mut() {
                for file in &change.deleted {
                    if project.files.remove(file).is_some() {
                        debug!(project = %project.name, file = %file, "file deleted");
                        outcome.structure_changed = true;
                    }
                }
            }
        }

        if !change.created.is_empty() {
            if self.has_created_test_files(change) {
                if let Some(report) = relist() {
                    self.merge_listing(&report);
                }
                outcome.structure_changed = true;
            }
        }

        if !change.created.is_empty() || !change.deleted.is_empty() {
            self.recalculate_all_files();
        }

        if !change.changed.is_empty() {
            let mut files_to_load = HashSet::new();
            for project in self.projects.values() {
                for file in &change.changed {
                    let discovered = project
                        .files
                        .get(file)
                        .is_some_and(|f| f.entries.is_discovered());
                    if discovered {
                        files_to_load.insert(file.clone());
                    }
                }
            }
            let mut files_to_load: Vec<String> = files_to_load.into_iter().collect();
            files_to_load.sort();
            outcome.files_to_load = files_to_load;
        }

        outcome
    }

    /// Keep only the requested files the catalog knows about
    pub fn files_to_load(&self, files: &[String]) -> Vec<String> {
        files
            .iter()
            .filter(|f| self.all_files.contains(*f))
            .cloned()
            .collect()
    }

    /// Merge discovery results for `requested_files`.
    ///
    /// Reported files get their entries replaced; requested files the runner
    /// stayed silent about become discovered-but-empty. Projects and files
    /// that vanished while discovery was running are skipped.
    pub fn update_projects(&mut self, project_entries: &[Entry], requested_files: &[String]) {
        for project_entry in project_entries {
            let Some(project) = self.projects.get_mut(&project_entry.title) else {
                debug!(project = %project_entry.title, "discovery reported unknown project");
                continue;
            };

            let mut files_to_clear: HashSet<&str> =
                requested_files.iter().map(String::as_str).collect();
            for file_entry in project_entry.children() {
                files_to_clear.remove(file_entry.location.file.as_str());
                if let Some(file) = project.files.get_mut(&file_entry.location.file) {
                    file.entries = FileEntries::Discovered(file_entry.children().to_vec());
                }
            }

            // Requested but not reported back.
            for file in files_to_clear {
                if let Some(test_file) = project.files.get_mut(file) {
                    test_file.entries = FileEntries::Discovered(Vec::new());
                }
            }
        }
    }

    /// Merge the tree a test run reported for `project_name`.
    ///
    /// Returns false when the run did not report that project or the project
    /// no longer exists. Entries are only filled in for files that were never
    /// discovered, since a focused run may report a subset of a file's tests.
    pub fn update_from_running_project(&mut self, project_name: &str, projects: &[Entry]) -> bool {
        let Some(project_entry) = projects.iter().find(|p| p.title == project_name) else {
            return false;
        };
        let Some(project) = self.projects.get_mut(project_name) else {
            debug!(project = %project_name, "run reported a project that is gone");
            return false;
        };

        let mut reported_files = HashSet::new();
        for file_entry in project_entry.children() {
            reported_files.insert(file_entry.location.file.clone());
            let Some(children) = &file_entry.children else {
                continue;
            };
            let file = project
                .files
                .entry(file_entry.location.file.clone())
                .or_insert_with(|| TestFile::new(project_name, &file_entry.location.file));
            if !file.entries.is_discovered() {
                file.entries = FileEntries::Discovered(children.clone());
            }
        }

        project.files.retain(|file, _| reported_files.contains(file));
        self.recalculate_all_files();
        true
    }

    /// All test entries of a project, deduplicated by `file:line:title`
    pub fn test_entries(&self, project_name: &str) -> Vec<Entry> {
        let Some(project) = self.projects.get(project_name) else {
            return Vec::new();
        };

        let mut entries = HashMap::new();
        for file in project.files.values() {
            if let Some(file_entries) = file.entries.as_slice() {
                for entry in file_entries {
                    collect_tests(entry, &mut entries);
                }
            }
        }
        entries.into_values().collect()
    }

    fn recalculate_all_files(&mut self) {
        self.all_files = self
            .projects
            .values()
            .flat_map(|p| p.files.keys().cloned())
            .collect();
    }
}

fn update_project(project: &mut TestProject, report: &ProjectListFilesReport) {
    let files_to_keep: HashSet<&str> = report.files.iter().map(String::as_str).collect();

    for file in &report.files {
        if !project.files.contains_key(file) {
            let test_file = TestFile::new(&project.name, file);
            project.files.insert(file.clone(), test_file);
        }
    }

    project.files.retain(|file, _| files_to_keep.contains(file.as_str()));
}

fn collect_tests(entry: &Entry, entries: &mut HashMap<String, Entry>) {
    if entry.is_test() {
        entries.insert(entry.dedup_key(), entry.clone());
    }
    for child in entry.children() {
        collect_tests(child, entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_model::{EntryKind, Location};

    fn project_report(name: &str, test_dir: &str, files: &[&str]) -> ProjectListFilesReport {
        ProjectListFilesReport {
            name: name.to_string(),
            test_dir: test_dir.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn report(projects: Vec<ProjectListFilesReport>) -> ListFilesReport {
        ListFilesReport { projects }
    }

    fn test_entry(file: &str, line: u32, title: &str) -> Entry {
        Entry {
            kind: EntryKind::Test,
            title: title.to_string(),
            location: Location { file: file.to_string(), line, column: 0 },
            children: None,
        }
    }

    fn node(kind: EntryKind, file: &str, title: &str, children: Vec<Entry>) -> Entry {
        Entry {
            kind,
            title: title.to_string(),
            location: Location { file: file.to_string(), line: 0, column: 0 },
            children: Some(children),
        }
    }

    fn discovered(catalog: &TestCatalog, project: &str, file: &str) -> Option<Vec<Entry>> {
        catalog
            .file(project, file)
            .and_then(|f| f.entries.as_slice())
            .map(|e| e.to_vec())
    }

    const A: &str = "/proj/tests/a.spec.ts";
    const B: &str = "/proj/tests/b.spec.ts";

    fn chromium_catalog(files: &[&str]) -> TestCatalog {
        let mut catalog = TestCatalog::new();
        catalog.merge_listing(&report(vec![project_report("chromium", "/proj/tests", files)]));
        catalog
    }

    #[test]
    fn test_listing_creates_projects_and_files() {
        let mut catalog = TestCatalog::new();
        catalog.merge_listing(&report(vec![
            project_report("chromium", "/proj/tests", &[A, B]),
            project_report("firefox", "/proj/tests", &[A]),
        ]));

        assert_eq!(catalog.projects().len(), 2);
        assert!(catalog.project("chromium").unwrap().is_first);
        assert!(!catalog.project("firefox").unwrap().is_first);
        assert_eq!(catalog.project_names(), vec!["chromium", "firefox"]);
        assert_eq!(catalog.all_files().len(), 2);
        assert_eq!(catalog.file("firefox", A).unwrap().project, "firefox");
        assert!(discovered(&catalog, "chromium", A).is_none());
    }

    #[test]
    fn test_listing_is_idempotent() {
        let listing = report(vec![project_report("chromium", "/proj/tests", &[A, B])]);
        let mut catalog = TestCatalog::new();
        catalog.merge_listing(&listing);
        let before = catalog.clone();
        catalog.merge_listing(&listing);

        assert_eq!(catalog.projects(), before.projects());
        assert_eq!(catalog.all_files(), before.all_files());
    }

    #[test]
    fn test_listing_preserves_discovered_entries() {
        let mut catalog = chromium_catalog(&[A, B]);
        let entries = vec![test_entry(A, 1, "one"), test_entry(A, 2, "two")];
        catalog.update_projects(
            &[node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, A, A, entries.clone())])],
            &[A.to_string()],
        );

        catalog.merge_listing(&report(vec![project_report("chromium", "/proj/tests", &[A, B])]));
        assert_eq!(discovered(&catalog, "chromium", A), Some(entries));
    }

    #[test]
    fn test_listing_prunes_files_and_projects() {
        let mut catalog = TestCatalog::new();
        catalog.merge_listing(&report(vec![
            project_report("chromium", "/proj/tests", &[A, B]),
            project_report("firefox", "/proj/tests", &[A]),
        ]));

        catalog.merge_listing(&report(vec![project_report("firefox", "/proj/tests", &[A])]));

        assert!(catalog.project("chromium").is_none());
        assert!(catalog.project("firefox").unwrap().is_first);
        assert!(!catalog.all_files().contains(B));
        assert_eq!(catalog.all_files().len(), 1);
    }

    #[test]
    fn test_first_flag_follows_report_order() {
        let mut catalog = TestCatalog::new();
        catalog.merge_listing(&report(vec![
            project_report("chromium", "/proj/tests", &[A]),
            project_report("firefox", "/proj/tests", &[A]),
        ]));
        catalog.merge_listing(&report(vec![
            project_report("firefox", "/proj/tests", &[A]),
            project_report("chromium", "/proj/tests", &[A]),
        ]));

        assert!(catalog.project("firefox").unwrap().is_first);
        assert!(!catalog.project("chromium").unwrap().is_first);
    }

    #[test]
    fn test_deleted_files_are_removed() {
        let mut catalog = chromium_catalog(&[A, B]);
        let change = WorkspaceChange {
            deleted: [B.to_string()].into(),
            ..Default::default()
        };

        let outcome = catalog.workspace_changed(&change, || panic!("no relisting expected"));
        assert!(outcome.structure_changed);
        assert!(catalog.file("chromium", B).is_none());
        assert!(!catalog.all_files().contains(B));
    }

    #[test]
    fn test_deleting_unknown_file_changes_nothing() {
        let mut catalog = chromium_catalog(&[A]);
        let change = WorkspaceChange {
            deleted: ["/elsewhere/c.ts".to_string()].into(),
            ..Default::default()
        };

        let outcome = catalog.workspace_changed(&change, || None);
        assert_eq!(outcome, ChangeOutcome::default());
    }

    #[test]
    fn test_created_file_under_test_dir_relists() {
        let mut catalog = chromium_catalog(&[A]);
        let change = WorkspaceChange {
            created: [B.to_string()].into(),
            ..Default::default()
        };

        let mut relisted = 0;
        let outcome = catalog.workspace_changed(&change, || {
            relisted += 1;
            Some(report(vec![project_report("chromium", "/proj/tests", &[A, B])]))
        });

        assert_eq!(relisted, 1);
        assert!(outcome.structure_changed);
        assert!(outcome.files_to_load.is_empty());
        assert!(discovered(&catalog, "chromium", B).is_none());
        assert!(catalog.file("chromium", B).is_some());
        assert!(catalog.file("chromium", A).is_some());
        assert!(catalog.all_files().contains(B));
    }

    #[test]
    fn test_created_file_outside_test_dir_is_ignored() {
        let mut catalog = chromium_catalog(&[A]);
        let change = WorkspaceChange {
            created: ["/proj/src/util.ts".to_string()].into(),
            ..Default::default()
        };

        let outcome = catalog.workspace_changed(&change, || panic!("no relisting expected"));
        assert!(!outcome.structure_changed);
    }

    #[test]
    fn test_created_match_is_a_raw_prefix() {
        let mut catalog = chromium_catalog(&[A]);
        let change = WorkspaceChange {
            created: ["/proj/tests2/c.spec.ts".to_string()].into(),
            ..Default::default()
        };

        let mut relisted = false;
        catalog.workspace_changed(&change, || {
            relisted = true;
            None
        });
        assert!(relisted);
    }

    #[test]
    fn test_failed_relist_keeps_catalog() {
        let mut catalog = chromium_catalog(&[A]);
        let change = WorkspaceChange {
            created: [B.to_string()].into(),
            ..Default::default()
        };

        catalog.workspace_changed(&change, || None);
        assert_eq!(catalog.all_files().len(), 1);
    }

    #[test]
    fn test_changed_only_reloads_discovered_files() {
        let mut catalog = chromium_catalog(&[A, B]);
        catalog.update_projects(
            &[node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, A, A, vec![test_entry(A, 1, "one")])])],
            &[A.to_string()],
        );

        let change = WorkspaceChange {
            changed: [A.to_string(), B.to_string(), "/proj/tests/unknown.ts".to_string()].into(),
            ..Default::default()
        };
        let outcome = catalog.workspace_changed(&change, || None);

        assert!(!outcome.structure_changed);
        assert_eq!(outcome.files_to_load, vec![A.to_string()]);
    }

    #[test]
    fn test_files_to_load_filters_unknown_paths() {
        let catalog = chromium_catalog(&[A]);
        let files = catalog.files_to_load(&[A.to_string(), "/nope.ts".to_string()]);
        assert_eq!(files, vec![A.to_string()]);
    }

    #[test]
    fn test_update_projects_marks_unreported_files_empty() {
        let mut catalog = chromium_catalog(&[A, B]);
        catalog.update_projects(
            &[node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, A, A, vec![test_entry(A, 1, "one")])])],
            &[A.to_string(), B.to_string()],
        );

        assert_eq!(discovered(&catalog, "chromium", A).map(|e| e.len()), Some(1));
        assert_eq!(discovered(&catalog, "chromium", B), Some(Vec::new()));
    }

    #[test]
    fn test_update_projects_ignores_unknown_targets() {
        let mut catalog = chromium_catalog(&[A]);
        catalog.update_projects(
            &[
                node(EntryKind::Project, "", "webkit", vec![node(EntryKind::File, A, A, vec![test_entry(A, 1, "one")])]),
                node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, B, B, vec![test_entry(B, 1, "one")])]),
            ],
            &[A.to_string()],
        );

        assert!(catalog.project("webkit").is_none());
        assert!(catalog.file("chromium", B).is_none());
        assert_eq!(discovered(&catalog, "chromium", A), Some(Vec::new()));
    }

    #[test]
    fn test_update_projects_replaces_entries() {
        let mut catalog = chromium_catalog(&[A]);
        let project = |entries: Vec<Entry>| {
            vec![node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, A, A, entries)])]
        };
        catalog.update_projects(&project(vec![test_entry(A, 1, "one"), test_entry(A, 2, "two")]), &[A.to_string()]);
        catalog.update_projects(&project(vec![test_entry(A, 3, "three")]), &[A.to_string()]);

        assert_eq!(discovered(&catalog, "chromium", A), Some(vec![test_entry(A, 3, "three")]));
    }

    #[test]
    fn test_run_update_fills_only_undiscovered_files() {
        let mut catalog = chromium_catalog(&[A, B]);
        let full = vec![test_entry(A, 1, "one"), test_entry(A, 2, "two")];
        catalog.update_projects(
            &[node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, A, A, full.clone())])],
            &[A.to_string()],
        );

        let run = vec![node(
            EntryKind::Project,
            "",
            "chromium",
            vec![
                node(EntryKind::File, A, A, vec![test_entry(A, 1, "one")]),
                node(EntryKind::File, B, B, vec![test_entry(B, 7, "seven")]),
            ],
        )];
        assert!(catalog.update_from_running_project("chromium", &run));

        assert_eq!(discovered(&catalog, "chromium", A), Some(full));
        assert_eq!(discovered(&catalog, "chromium", B), Some(vec![test_entry(B, 7, "seven")]));
    }

    #[test]
    fn test_run_update_creates_and_prunes_files() {
        let mut catalog = chromium_catalog(&[A]);
        let run = vec![node(
            EntryKind::Project,
            "",
            "chromium",
            vec![node(EntryKind::File, B, B, vec![test_entry(B, 1, "one")])],
        )];

        assert!(catalog.update_from_running_project("chromium", &run));
        assert!(catalog.file("chromium", A).is_none());
        assert_eq!(catalog.file("chromium", B).unwrap().project, "chromium");
        assert!(catalog.all_files().contains(B));
        assert!(!catalog.all_files().contains(A));
    }

    #[test]
    fn test_run_update_keeps_reported_file_without_children() {
        let mut catalog = chromium_catalog(&[A]);
        let file_without_children = Entry {
            kind: EntryKind::File,
            title: A.to_string(),
            location: Location { file: A.to_string(), line: 0, column: 0 },
            children: None,
        };
        let run = vec![node(EntryKind::Project, "", "chromium", vec![file_without_children])];

        assert!(catalog.update_from_running_project("chromium", &run));
        assert!(catalog.file("chromium", A).is_some());
        assert!(discovered(&catalog, "chromium", A).is_none());
    }

    #[test]
    fn test_run_update_for_unreported_project_is_noop() {
        let mut catalog = chromium_catalog(&[A]);
        let run = vec![node(EntryKind::Project, "", "firefox", Vec::new())];

        assert!(!catalog.update_from_running_project("chromium", &run));
        assert!(catalog.file("chromium", A).is_some());
    }

    #[test]
    fn test_test_entries_flattens_and_dedups() {
        let mut catalog = chromium_catalog(&[A]);
        let suites = vec![
            node(EntryKind::Suite, A, "first", vec![test_entry(A, 4, "works"), test_entry(A, 9, "other")]),
            node(EntryKind::Suite, A, "second", vec![test_entry(A, 4, "works")]),
        ];
        catalog.update_projects(
            &[node(EntryKind::Project, "", "chromium", vec![node(EntryKind::File, A, A, suites)])],
            &[A.to_string()],
        );

        let mut titles: Vec<String> = catalog
            .test_entries("chromium")
            .into_iter()
            .map(|e| e.dedup_key())
            .collect();
        titles.sort();
        assert_eq!(titles, vec![format!("{A}:4:works"), format!("{A}:9:other")]);
        assert!(catalog.test_entries("webkit").is_empty());
    }
}
