//! Plain-text failure lists shared with the sync utilities.
//!
//! One entity per line, optionally followed by a tab and a free-form detail
//! (the utilities write `name<TAB>reason`, the concept check writes
//! `name<TAB>code`). Only the first field identifies the entity.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// One line of a failure list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub id: String,
    pub detail: Option<String>,
}

/// An ordered, de-duplicated set of failed entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureList {
    entries: Vec<FailureEntry>,
}

impl FailureList {
    /// Parses file contents. Blank lines are skipped and the first occurrence
    /// of a duplicate identifier wins.
    pub fn parse(text: &str) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for line in text.lines() {
            let mut fields = line.splitn(2, '\t');
            let id = fields.next().unwrap_or_default().trim();
            if id.is_empty() || !seen.insert(id.to_string()) {
                continue;
            }
            let detail = fields
                .next()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            entries.push(FailureEntry {
                id: id.to_string(),
                detail,
            });
        }
        Self { entries }
    }

    /// Reads a failure list; `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a failure list is moved aside while a retry pass consumes it.
pub fn retry_input_path(failure_file: &Path) -> PathBuf {
    let mut name = failure_file.as_os_str().to_os_string();
    name.push(".prev");
    PathBuf::from(name)
}

/// Removes a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_takes_first_field_and_dedups() {
        let list = FailureList::parse("人工智能\ttimeout\n\n机器人概念\t写入失败: x\n人工智能\tagain\n  \n");
        assert_eq!(list.ids(), vec!["人工智能", "机器人概念"]);
        assert_eq!(list.entries()[0].detail.as_deref(), Some("timeout"));
    }

    #[test]
    fn parse_accepts_bare_identifiers() {
        let list = FailureList::parse("885001\n885002\r\n885003");
        assert_eq!(list.ids(), vec!["885001", "885002", "885003"]);
        assert!(list.entries().iter().all(|e| e.detail.is_none()));
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = FailureList::load(&dir.path().join("failed_concepts.txt")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn retry_input_path_appends_suffix() {
        assert_eq!(
            retry_input_path(Path::new("work/failed-ths-industry-daily.txt")),
            PathBuf::from("work/failed-ths-industry-daily.txt.prev")
        );
    }

    #[test]
    fn remove_if_exists_is_quiet_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        assert!(!remove_if_exists(&path).unwrap());
        std::fs::write(&path, "x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
    }
}
