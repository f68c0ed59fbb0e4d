use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use uuid::Uuid;

use super::error::RepositoryError;
use super::fs::FileSystem;
use crate::metrics::Metrics;

// ============================================================================
// Snapshot Store - One JSON Document Per Aggregate Type
// ============================================================================
//
// GENERIC persistence used by every file-backed repository:
// 1. Lazy, once-only initialisation (Uninitialized -> Initializing -> Ready)
// 2. All reads served from the in-memory document
// 3. Every mutation persists the whole document: write temp file, rename
//    over the real path. The rename is the atomicity boundary.
// 4. Writers are serialised by an internal lock, so overlapping saves never
//    share a temp path or interleave renames.
//
// A failed persist leaves the in-memory document ahead of disk until the next
// successful write. That is surfaced to the caller, never masked.
//
// ============================================================================

pub struct SnapshotStore<D> {
    aggregate: &'static str,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    metrics: Arc<Metrics>,
    document: RwLock<D>,
    write_lock: Mutex<()>,
    ready: OnceCell<()>,
}

impl<D> SnapshotStore<D>
where
    D: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    pub fn new(
        aggregate: &'static str,
        path: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            aggregate,
            path: path.into(),
            fs,
            metrics,
            document: RwLock::new(D::default()),
            write_lock: Mutex::new(()),
            ready: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Run `load` exactly once and install its document. Concurrent callers
    /// wait for the first; later callers return immediately.
    pub async fn initialize_with<F, Fut>(&self, load: F) -> Result<(), RepositoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<D, RepositoryError>>,
    {
        self.ready
            .get_or_try_init(|| async move {
                self.ensure_directory().await?;
                let document = load().await?;
                *self.document.write().await = document;

                tracing::info!(
                    aggregate = self.aggregate,
                    path = %self.path.display(),
                    "Repository ready"
                );
                Ok::<(), RepositoryError>(())
            })
            .await
            .map(|_| ())
    }

    async fn ensure_directory(&self) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                self.fs
                    .create_dir_all(parent)
                    .await
                    .map_err(|e| RepositoryError::persistence("create directory", parent, e))?;
            }
        }
        Ok(())
    }

    /// Raw bytes of the document on disk, if any
    pub async fn read_raw(&self) -> Result<Option<Vec<u8>>, RepositoryError> {
        self.fs
            .read(&self.path)
            .await
            .map_err(|e| RepositoryError::persistence("read", &self.path, e))
    }

    /// Parse the current-format document from disk; missing file = default
    pub async fn load_from_disk(&self) -> Result<D, RepositoryError> {
        match self.read_raw().await? {
            Some(bytes) => self.decode(&bytes),
            None => Ok(D::default()),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<D, RepositoryError> {
        serde_json::from_slice(bytes).map_err(|source| RepositoryError::Serialization {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn read<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        let document = self.document.read().await;
        f(&document)
    }

    /// Mutate the cached document and persist it
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut D) -> R) -> Result<R, RepositoryError> {
        self.mutate_if(|document| (f(document), true)).await
    }

    /// Mutate the cached document; persist only when `f` reports a change
    pub async fn mutate_if<R>(
        &self,
        f: impl FnOnce(&mut D) -> (R, bool),
    ) -> Result<R, RepositoryError> {
        let _writer = self.write_lock.lock().await;

        let (result, snapshot) = {
            let mut document = self.document.write().await;
            let (result, changed) = f(&mut document);
            (result, changed.then(|| (*document).clone()))
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot).await?;
        }

        Ok(result)
    }

    /// Atomic whole-document write: temp file + rename
    pub async fn persist(&self, document: &D) -> Result<(), RepositoryError> {
        let payload = serde_json::to_vec_pretty(document).map_err(|source| {
            RepositoryError::Serialization {
                path: self.path.clone(),
                source,
            }
        })?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = self.fs.write(&temp_path, &payload).await {
            self.metrics.record_persist_failure(self.aggregate);
            return Err(RepositoryError::persistence("write", &temp_path, e));
        }

        if let Err(e) = self.fs.rename(&temp_path, &self.path).await {
            self.metrics.record_persist_failure(self.aggregate);
            if let Err(cleanup) = self.fs.remove_file(&temp_path).await {
                tracing::debug!(
                    path = %temp_path.display(),
                    error = %cleanup,
                    "Could not remove temp file after failed rename"
                );
            }
            return Err(RepositoryError::persistence("rename", &self.path, e));
        }

        tracing::debug!(
            aggregate = self.aggregate,
            path = %self.path.display(),
            bytes = payload.len(),
            "Document persisted"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::store::fs::testing::CountingFileSystem;
    use crate::event_sourcing::store::fs::TokioFileSystem;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: BTreeMap<String, u32>,
    }

    fn store(dir: &TempDir, fs: Arc<dyn FileSystem>) -> SnapshotStore<Doc> {
        SnapshotStore::new(
            "test",
            dir.path().join("nested").join("doc.json"),
            fs,
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_initialize_creates_directory_and_runs_once() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, Arc::new(TokioFileSystem));
        let mut runs = 0;

        store
            .initialize_with(|| {
                runs += 1;
                async { Ok(Doc::default()) }
            })
            .await
            .unwrap();
        assert!(store.is_ready());
        assert!(tmp.path().join("nested").is_dir());

        store
            .initialize_with(|| async {
                Err(RepositoryError::NotFound { aggregate: "test", id: "second-load".into() })
            })
            .await
            .unwrap();
        assert_eq!(runs, 1);
    }

    #[tokio::test]
    async fn test_mutate_persists_atomically() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, Arc::new(TokioFileSystem));
        store.initialize_with(|| async { Ok(Doc::default()) }).await.unwrap();

        store.mutate(|doc| doc.items.insert("a".to_string(), 1)).await.unwrap();

        let on_disk = store.load_from_disk().await.unwrap();
        assert_eq!(on_disk.items.get("a"), Some(&1));

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_mutate_if_skips_unchanged_writes() {
        let tmp = TempDir::new().unwrap();
        let fs = CountingFileSystem::default();
        let store = store(&tmp, Arc::new(fs.clone()));
        store.initialize_with(|| async { Ok(Doc::default()) }).await.unwrap();

        store.mutate_if(|_doc| ((), false)).await.unwrap();
        assert_eq!(fs.renames(), 0);

        store.mutate_if(|doc| (doc.items.insert("b".into(), 2), true)).await.unwrap();
        assert_eq!(fs.renames(), 1);
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_previous_file_and_surfaces_error() {
        let tmp = TempDir::new().unwrap();
        let fs = CountingFileSystem::default();
        let store = store(&tmp, Arc::new(fs.clone()));
        store.initialize_with(|| async { Ok(Doc::default()) }).await.unwrap();

        store.mutate(|doc| doc.items.insert("kept".into(), 1)).await.unwrap();

        fs.fail_renames(true);
        let result = store.mutate(|doc| doc.items.insert("lost".into(), 2)).await;
        assert!(matches!(result, Err(RepositoryError::Persistence { operation: "rename", .. })));

        // Memory moved ahead, disk still holds the last good snapshot
        assert!(store.read(|doc| doc.items.contains_key("lost")).await);
        let on_disk = store.load_from_disk().await.unwrap();
        assert!(on_disk.items.contains_key("kept"));
        assert!(!on_disk.items.contains_key("lost"));
        assert_eq!(
            store.metrics().repository_persist_failures.with_label_values(&["test"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_mutations_all_land() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store(&tmp, Arc::new(TokioFileSystem)));
        store.initialize_with(|| async { Ok(Doc::default()) }).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.mutate(|doc| doc.items.insert(format!("k{i}"), i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let on_disk = store.load_from_disk().await.unwrap();
        assert_eq!(on_disk.items.len(), 16);
    }

    #[tokio::test]
    async fn test_malformed_document_is_serialization_error() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, Arc::new(TokioFileSystem));
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("doc.json"), b"{ not json").unwrap();

        let result = store.load_from_disk().await;
        assert!(matches!(result, Err(RepositoryError::Serialization { .. })));
    }
}
