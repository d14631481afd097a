//! [`FileProvider`] backed by the local filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{FileProvider, IncomingName, SaveTarget, SinkFile, SourceFile};

/// Highest numeric suffix tried when a name is taken.
const MAX_NAME_SUFFIX: u32 = 1000;

/// The interactive part of choosing paths.
#[async_trait::async_trait]
pub trait PathChooser: Send + Sync {
    async fn choose_send_paths(&self, directory: bool) -> Result<Option<Vec<PathBuf>>>;

    async fn choose_save_directory(&self) -> Result<Option<PathBuf>>;
}

/// Chooser that always answers with the same paths.
#[derive(Debug, Clone, Default)]
pub struct StaticChooser {
    send_paths: Option<Vec<PathBuf>>,
    save_directory: Option<PathBuf>,
}

impl StaticChooser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.send_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_save_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_directory = Some(dir.into());
        self
    }
}

#[async_trait::async_trait]
impl PathChooser for StaticChooser {
    async fn choose_send_paths(&self, _directory: bool) -> Result<Option<Vec<PathBuf>>> {
        Ok(self.send_paths.clone())
    }

    async fn choose_save_directory(&self) -> Result<Option<PathBuf>> {
        Ok(self.save_directory.clone())
    }
}

pub struct LocalFileProvider {
    chooser: Arc<dyn PathChooser>,
}

impl LocalFileProvider {
    pub fn new(chooser: impl PathChooser + 'static) -> Self {
        Self {
            chooser: Arc::new(chooser),
        }
    }
}

#[async_trait::async_trait]
impl FileProvider for LocalFileProvider {
    async fn choose_send_files(
        &self,
        directory: bool,
    ) -> Result<Option<Vec<Box<dyn SourceFile>>>> {
        let paths = match self.chooser.choose_send_paths(directory).await? {
            Some(paths) if !paths.is_empty() => paths,
            _ => return Ok(None),
        };
        let sources = tokio::task::spawn_blocking(move || collect_sources(&paths, directory))
            .await
            .context("file scan task failed")??;
        Ok(Some(
            sources
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn SourceFile>)
                .collect(),
        ))
    }

    async fn choose_save_directory(&self) -> Result<Option<SaveTarget>> {
        let Some(dir) = self.chooser.choose_save_directory().await? else {
            return Ok(None);
        };
        let meta = fs::metadata(&dir)
            .await
            .with_context(|| format!("cannot access {}", dir.display()))?;
        if !meta.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        Ok(Some(SaveTarget::new(dir)))
    }

    async fn open_save_file(
        &self,
        target: &mut SaveTarget,
        name: &IncomingName,
        overwrite: bool,
    ) -> Result<Box<dyn SinkFile>> {
        let sink = match name {
            IncomingName::Plain(file_name) => {
                let local_name = if overwrite {
                    file_name.clone()
                } else {
                    get_new_name(&target.root, file_name).await?
                };
                let path = target.root.join(&local_name);
                LocalSinkFile::create_file(path, file_name.clone(), local_name).await?
            }
            IncomingName::Entry(entry) => {
                let top = &entry.path_name[0];
                let local_name = match target.assigned_name(entry.path_id) {
                    Some(name) => name.to_string(),
                    None => {
                        let name = if overwrite {
                            top.clone()
                        } else {
                            get_new_name(&target.root, top).await?
                        };
                        target.assign_name(entry.path_id, name.clone());
                        name
                    }
                };
                let mut path = target.root.join(&local_name);
                for segment in &entry.path_name[1..] {
                    path.push(segment);
                }
                let file_name = name.file_name().to_string();
                if entry.is_dir {
                    fs::create_dir_all(&path)
                        .await
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    LocalSinkFile {
                        file_name,
                        local_name,
                        path,
                        file: None,
                        is_dir: true,
                    }
                } else {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)
                            .await
                            .with_context(|| format!("cannot create {}", parent.display()))?;
                    }
                    LocalSinkFile::create_file(path, file_name, local_name).await?
                }
            }
        };
        tracing::debug!(path = %sink.path.display(), "opened save file");
        Ok(Box::new(sink))
    }
}

/// `name` if it is free in `dir`, otherwise the first free `name.N`.
pub async fn get_new_name(dir: &Path, name: &str) -> Result<String> {
    if !fs::try_exists(dir.join(name)).await? {
        return Ok(name.to_string());
    }
    for idx in 0..MAX_NAME_SUFFIX {
        let candidate = format!("{}.{}", name, idx);
        if !fs::try_exists(dir.join(&candidate)).await? {
            return Ok(candidate);
        }
    }
    bail!("no free name for {} in {}", name, dir.display())
}

// =============================================================================
// Sources
// =============================================================================

#[derive(Debug)]
pub struct LocalSourceFile {
    path_id: u64,
    rel_path: Vec<String>,
    path: PathBuf,
    size: u64,
    is_dir: bool,
    file: Option<File>,
}

#[async_trait::async_trait]
impl SourceFile for LocalSourceFile {
    fn path_id(&self) -> u64 {
        self.path_id
    }

    fn rel_path(&self) -> &[String] {
        &self.rel_path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path)
                .await
                .with_context(|| format!("cannot open {}", self.path.display()))?,
        };
        self.file
            .insert(file)
            .read(buf)
            .await
            .with_context(|| format!("cannot read {}", self.path.display()))
    }

    async fn close(&mut self) {
        self.file = None;
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

/// Expand the chosen paths into upload entries. Runs on a blocking thread.
fn collect_sources(paths: &[PathBuf], directory: bool) -> Result<Vec<LocalSourceFile>> {
    let mut out = Vec::new();
    for (idx, path) in paths.iter().enumerate() {
        let path_id = idx as u64;
        let meta = std::fs::metadata(path)
            .with_context(|| format!("{} does not exist", path.display()))?;
        let name = file_name_of(path)?;
        if meta.is_dir() {
            if !directory {
                bail!("{} is a directory", path.display());
            }
            walk_dir(path_id, path, vec![name], &mut out)?;
        } else if meta.is_file() {
            check_readable(path)?;
            out.push(LocalSourceFile {
                path_id,
                rel_path: vec![name],
                path: path.clone(),
                size: meta.len(),
                is_dir: false,
                file: None,
            });
        } else {
            bail!("{} is not a regular file", path.display());
        }
    }
    Ok(out)
}

fn walk_dir(
    path_id: u64,
    dir: &Path,
    rel_path: Vec<String>,
    out: &mut Vec<LocalSourceFile>,
) -> Result<()> {
    out.push(LocalSourceFile {
        path_id,
        rel_path: rel_path.clone(),
        path: dir.to_path_buf(),
        size: 0,
        is_dir: true,
        file: None,
    });

    let mut children = std::fs::read_dir(dir)
        .with_context(|| format!("cannot list {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("cannot list {}", dir.display()))?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("cannot stat {}", path.display()))?;
        let mut child_rel = rel_path.clone();
        child_rel.push(file_name_of(&path)?);
        if meta.is_dir() {
            walk_dir(path_id, &path, child_rel, out)?;
        } else if meta.is_file() {
            check_readable(&path)?;
            out.push(LocalSourceFile {
                path_id,
                rel_path: child_rel,
                path,
                size: meta.len(),
                is_dir: false,
                file: None,
            });
        } else {
            tracing::debug!(path = %path.display(), "skipping special file");
        }
    }
    Ok(())
}

fn check_readable(path: &Path) -> Result<()> {
    std::fs::File::open(path).with_context(|| format!("{} is not readable", path.display()))?;
    Ok(())
}

// =============================================================================
// Sinks
// =============================================================================

#[derive(Debug)]
pub struct LocalSinkFile {
    file_name: String,
    local_name: String,
    path: PathBuf,
    file: Option<File>,
    is_dir: bool,
}

impl LocalSinkFile {
    async fn create_file(path: PathBuf, file_name: String, local_name: String) -> Result<Self> {
        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            bail!("{} is a directory", path.display());
        }
        let file = File::create(&path)
            .await
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self {
            file_name,
            local_name,
            path,
            file: Some(file),
            is_dir: false,
        })
    }
}

#[async_trait::async_trait]
impl SinkFile for LocalSinkFile {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn local_name(&self) -> &str {
        &self.local_name
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .with_context(|| format!("{} is not open for writing", self.path.display()))?;
        file.write_all(data)
            .await
            .with_context(|| format!("cannot write {}", self.path.display()))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .with_context(|| format!("cannot flush {}", self.path.display()))?;
        }
        Ok(())
    }

    async fn discard(&mut self) -> Result<()> {
        self.file = None;
        if self.is_dir {
            return Ok(());
        }
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("cannot remove {}", self.path.display())),
        }
    }
}
