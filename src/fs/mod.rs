//! File access collaborators.
//!
//! The transfer engine never touches the filesystem directly. Hosts supply a
//! [`FileProvider`] that picks files, opens them for reading and creates
//! destinations; [`local::LocalFileProvider`] is the implementation backed
//! by the local disk.

pub mod local;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// A file or directory picked for upload.
#[async_trait::async_trait]
pub trait SourceFile: Send {
    /// Index of the top-level path this entry was found under.
    fn path_id(&self) -> u64;

    /// Path components relative to the parent of the chosen top-level path.
    fn rel_path(&self) -> &[String];

    fn size(&self) -> u64;

    fn is_dir(&self) -> bool;

    /// Read the next bytes into `buf`; `Ok(0)` means end of file.
    async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;

    async fn close(&mut self);

    /// Last path component, used for display and plain NAME messages.
    fn file_name(&self) -> &str {
        self.rel_path().last().map(String::as_str).unwrap_or("")
    }
}

/// A destination opened for a received NAME.
#[async_trait::async_trait]
pub trait SinkFile: Send {
    /// Name as sent by the remote.
    fn file_name(&self) -> &str;

    /// Top-level name actually used locally, after collision handling.
    fn local_name(&self) -> &str;

    fn is_dir(&self) -> bool;

    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()>;

    /// Close and remove whatever was written so far.
    async fn discard(&mut self) -> anyhow::Result<()>;
}

/// Destination directory chosen for a download.
#[derive(Debug, Clone)]
pub struct SaveTarget {
    pub root: PathBuf,
    /// Shown to the remote in the EXIT summary.
    pub display: String,
    assigned_names: HashMap<u64, String>,
}

impl SaveTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let display = root.display().to_string();
        Self {
            root,
            display,
            assigned_names: HashMap::new(),
        }
    }

    /// Local top-level name already chosen for `path_id`.
    pub fn assigned_name(&self, path_id: u64) -> Option<&str> {
        self.assigned_names.get(&path_id).map(String::as_str)
    }

    pub fn assign_name(&mut self, path_id: u64, name: impl Into<String>) {
        self.assigned_names.insert(path_id, name.into());
    }
}

/// One entry of a directory transfer as carried in the NAME message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub path_id: u64,
    pub path_name: Vec<String>,
    pub is_dir: bool,
}

impl PathEntry {
    pub fn from_source(source: &dyn SourceFile) -> Self {
        Self {
            path_id: source.path_id(),
            path_name: source.rel_path().to_vec(),
            is_dir: source.is_dir(),
        }
    }
}

/// A decoded NAME message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingName {
    /// Bare file name, used when the remote is not in directory mode.
    Plain(String),
    Entry(PathEntry),
}

impl IncomingName {
    /// Decode a NAME payload and reject anything that could escape the save directory.
    pub fn parse(text: &str, directory: bool) -> Result<Self> {
        let name = if directory {
            let entry: PathEntry =
                serde_json::from_str(text).map_err(|e| TransferError::malformed("NAME", e))?;
            if entry.path_name.is_empty() {
                return Err(TransferError::Protocol("empty path in NAME".to_string()));
            }
            for segment in &entry.path_name {
                validate_segment(segment)?;
            }
            IncomingName::Entry(entry)
        } else {
            validate_segment(text)?;
            IncomingName::Plain(text.to_string())
        };
        Ok(name)
    }

    pub fn file_name(&self) -> &str {
        match self {
            IncomingName::Plain(name) => name,
            IncomingName::Entry(entry) => entry
                .path_name
                .last()
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, IncomingName::Entry(entry) if entry.is_dir)
    }
}

/// A single path component: no separators, no `.`/`..`, no roots or prefixes.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(TransferError::Protocol("empty file name".to_string()));
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains('\0') {
        return Err(TransferError::Protocol(format!(
            "file name contains a separator: {}",
            segment
        )));
    }
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::Protocol(format!(
            "invalid file name: {}",
            segment
        ))),
    }
}

/// Host capability for choosing, reading and writing files.
#[async_trait::async_trait]
pub trait FileProvider: Send + Sync {
    /// Ask the user for files to upload. `None` or an empty list means cancelled.
    async fn choose_send_files(
        &self,
        directory: bool,
    ) -> anyhow::Result<Option<Vec<Box<dyn SourceFile>>>>;

    /// Ask the user where to save downloads. `None` means cancelled.
    async fn choose_save_directory(&self) -> anyhow::Result<Option<SaveTarget>>;

    /// Create the destination for one received NAME.
    async fn open_save_file(
        &self,
        target: &mut SaveTarget,
        name: &IncomingName,
        overwrite: bool,
    ) -> anyhow::Result<Box<dyn SinkFile>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        let name = IncomingName::parse("test.txt", false).unwrap();
        assert_eq!(name, IncomingName::Plain("test.txt".to_string()));
        assert_eq!(name.file_name(), "test.txt");
        assert!(!name.is_dir());
    }

    #[test]
    fn test_directory_entry() {
        let name = IncomingName::parse(
            r#"{"path_id":2,"path_name":["docs","a.md"],"is_dir":false}"#,
            true,
        )
        .unwrap();
        assert_eq!(name.file_name(), "a.md");
        match name {
            IncomingName::Entry(entry) => {
                assert_eq!(entry.path_id, 2);
                assert_eq!(entry.path_name, vec!["docs", "a.md"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_escaping_names() {
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b", "/etc"] {
            assert!(
                matches!(IncomingName::parse(bad, false), Err(TransferError::Protocol(_))),
                "{:?} accepted",
                bad
            );
        }
        let err = IncomingName::parse(
            r#"{"path_id":0,"path_name":["ok",".."],"is_dir":true}"#,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
        let err = IncomingName::parse(r#"{"path_id":0,"path_name":[],"is_dir":true}"#, true)
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[test]
    fn test_malformed_entry_json() {
        let err = IncomingName::parse("test.txt", true).unwrap_err();
        assert!(matches!(err, TransferError::MalformedPayload { .. }));
    }

    #[test]
    fn test_save_target_names() {
        let mut target = SaveTarget::new("/tmp/downloads");
        assert_eq!(target.display, "/tmp/downloads");
        assert_eq!(target.assigned_name(1), None);
        target.assign_name(1, "docs.0");
        assert_eq!(target.assigned_name(1), Some("docs.0"));
    }

    #[test]
    fn test_path_entry_json_shape() {
        let entry = PathEntry {
            path_id: 0,
            path_name: vec!["d".into(), "f".into()],
            is_dir: false,
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"path_id":0,"path_name":["d","f"],"is_dir":false}"#
        );
    }
}
