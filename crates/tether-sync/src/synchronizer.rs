// ABOUTME: Synchronizer backend seam and its filesystem implementation.
// ABOUTME: Endpoint methods delegate to a Synchronizer bound to one synchronization root.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tether_rpc::Client;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::error::{EndpointError, Result};
use crate::messages::{Change, Entry, EntryKind, FileContents, InitializeRequest};
use crate::session::{Configuration, ScanMode};

/// Operations one side of a synchronization session performs on its root.
///
/// Implemented by local backends and by [`crate::RemoteEndpoint`], so a
/// controller drives both ends of a session the same way.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// List the entries under the root. `full` forces a fresh walk.
    async fn scan(&self, full: bool) -> Result<Vec<Entry>>;

    /// Read the contents of the given root-relative files.
    async fn transmit(&self, paths: Vec<String>) -> Result<Vec<FileContents>>;

    /// Make the given changes under the root. Returns how many were applied.
    async fn apply(&self, changes: Vec<Change>) -> Result<usize>;

    /// Replace the session configuration.
    async fn update(&self, configuration: Configuration) -> Result<()>;

    /// Release the backend. Further calls may fail.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds the backend for an endpoint when the peer initializes it.
///
/// The client calls back to the peer that initialized the endpoint, for
/// backends that need to ask it something mid-operation.
pub type SynchronizerFactory =
    Arc<dyn Fn(&InitializeRequest, &Client) -> Result<Arc<dyn Synchronizer>> + Send + Sync>;

/// Factory producing a [`FilesystemSynchronizer`] rooted where the peer asks.
pub fn filesystem_factory() -> SynchronizerFactory {
    Arc::new(|request: &InitializeRequest, _peer: &Client| {
        let synchronizer: Arc<dyn Synchronizer> = Arc::new(FilesystemSynchronizer::new(
            expand_root(&request.root),
            request.configuration.clone(),
            request.alpha,
        ));
        Ok(synchronizer)
    })
}

/// Resolve `~` and relative roots against the home directory.
fn expand_root(root: &str) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(root);
    };
    if let Some(rest) = root.strip_prefix('~') {
        return home.join(rest.trim_start_matches(['/', '\\']));
    }
    let path = PathBuf::from(root);
    if path.is_relative() {
        home.join(path)
    } else {
        path
    }
}

/// Synchronizer over a directory on this machine.
#[derive(Debug)]
pub struct FilesystemSynchronizer {
    root: PathBuf,
    alpha: bool,
    configuration: RwLock<Configuration>,
    cache: RwLock<Option<Vec<Entry>>>,
    /// Bumped on every invalidation. A scan only caches its result if no
    /// invalidation happened while it walked.
    generation: AtomicU64,
}

impl FilesystemSynchronizer {
    pub fn new(root: impl Into<PathBuf>, configuration: Configuration, alpha: bool) -> Self {
        Self {
            root: root.into(),
            alpha,
            configuration: RwLock::new(configuration),
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_alpha(&self) -> bool {
        self.alpha
    }

    pub async fn configuration(&self) -> Configuration {
        self.configuration.read().await.clone()
    }

    /// Resolve a root-relative path, rejecting anything that would escape.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        let escapes = relative.is_empty()
            || candidate
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(EndpointError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(candidate))
    }

    async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *cache = None;
    }

    /// Cache `entries` unless the root changed since `generation` was read.
    async fn store(&self, generation: u64, entries: &[Entry]) -> bool {
        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding scan that raced with a change");
            return false;
        }
        *cache = Some(entries.to_vec());
        true
    }
}

#[async_trait]
impl Synchronizer for FilesystemSynchronizer {
    async fn scan(&self, full: bool) -> Result<Vec<Entry>> {
        let configuration = self.configuration().await;
        if configuration.scan_mode == ScanMode::Accelerated && !full {
            if let Some(entries) = self.cache.read().await.as_ref() {
                tracing::debug!(entries = entries.len(), "Reusing accelerated scan");
                return Ok(entries.clone());
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let root = self.root.clone();
        let entries = tokio::task::spawn_blocking(move || walk(&root, &configuration))
            .await
            .map_err(|e| EndpointError::Backend(format!("scan task failed: {e}")))??;

        tracing::debug!(root = %self.root.display(), entries = entries.len(), "Scanned root");
        self.store(generation, &entries).await;
        Ok(entries)
    }

    async fn transmit(&self, paths: Vec<String>) -> Result<Vec<FileContents>> {
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            let full = self.resolve(&path)?;
            let data = tokio::fs::read(&full)
                .await
                .map_err(|e| EndpointError::filesystem(&full, e))?;
            let metadata = tokio::fs::metadata(&full)
                .await
                .map_err(|e| EndpointError::filesystem(&full, e))?;
            contents.push(FileContents {
                path,
                data,
                executable: is_executable(&metadata),
            });
        }
        Ok(contents)
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<usize> {
        let mut applied = 0;
        for change in changes {
            let full = self.resolve(change.path())?;
            match change {
                Change::Write {
                    data, executable, ..
                } => {
                    if let Some(parent) = full.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| EndpointError::filesystem(parent, e))?;
                    }
                    tokio::fs::write(&full, &data)
                        .await
                        .map_err(|e| EndpointError::filesystem(&full, e))?;
                    set_executable(&full, executable)
                        .await
                        .map_err(|e| EndpointError::filesystem(&full, e))?;
                }
                Change::CreateDirectory { .. } => {
                    tokio::fs::create_dir_all(&full)
                        .await
                        .map_err(|e| EndpointError::filesystem(&full, e))?;
                }
                Change::Remove { .. } => remove(&full).await?,
            }
            applied += 1;
        }

        self.invalidate().await;
        Ok(applied)
    }

    async fn update(&self, configuration: Configuration) -> Result<()> {
        tracing::info!(scan_mode = ?configuration.scan_mode, "Updating configuration");
        *self.configuration.write().await = configuration;
        self.invalidate().await;
        Ok(())
    }
}

fn walk(root: &Path, configuration: &Configuration) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            EndpointError::filesystem(path, e.into())
        })?;

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if configuration.is_ignored(&relative) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| EndpointError::filesystem(entry.path(), e.into()))?;
        let kind = if entry.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        entries.push(Entry {
            path: relative,
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            executable: kind == EntryKind::File && is_executable(&metadata),
        });

        if configuration.max_entry_count > 0
            && entries.len() as u64 > configuration.max_entry_count
        {
            return Err(EndpointError::TooManyEntries {
                limit: configuration.max_entry_count,
            });
        }
    }

    Ok(entries)
}

async fn remove(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(EndpointError::filesystem(path, e)),
    };
    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(|e| EndpointError::filesystem(path, e))
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
async fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
    Ok(())
}
