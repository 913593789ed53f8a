//! Filesystem storage backend: one directory per bucket, one file per object

use super::traits::{
    ByteStream, ObjectEntry, ObjectReader, PutOutcome, StorageBackend, StorageError,
};
use async_trait::async_trait;
use futures::StreamExt;
use md5::{Digest, Md5};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tempfile::Builder;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Directory under the root holding in-flight uploads.
const STAGING_DIR: &str = ".staging";

const STAGING_PREFIX: &str = "put-";

/// ENOTDIR raw error code on Linux and macOS.
const ENOTDIR: i32 = 20;

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;

/// Async-safe directory check
async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// True when the error means "nothing at this path", including a path whose
/// parent component is a regular file.
fn is_missing(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(ENOTDIR)
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Other(format!("spawn_blocking join failed: {}", e))
}

/// Filesystem storage backend
///
/// Storage layout:
/// ```text
/// {root}/.staging/put-XXXXXX    # uploads in flight
/// {root}/{bucket}/              # one directory per bucket
/// {root}/{bucket}/{key...}      # one file per object, '/' in keys nests
/// ```
///
/// Uploads are written to the staging directory, fsynced and renamed into
/// place, so the staging directory must live on the same filesystem as the
/// buckets.
pub struct FilesystemBackend {
    /// Root directory for all data
    root: PathBuf,
    staging: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating the root
    /// and staging directories if needed.
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        Ok(Self { root, staging })
    }

    /// Remove staging files left behind by a crash. Returns the count removed.
    pub async fn purge_staging(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if is_missing(&e) => {}
                Err(e) => warn!("Could not remove staging file {:?}: {}", entry.path(), e),
            }
        }
        if removed > 0 {
            warn!(
                "Removed {} stale staging file(s) left by interrupted uploads",
                removed
            );
        }
        Ok(removed)
    }

    /// Get the bucket directory
    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Get the full path for an object
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.bucket_dir(bucket), |path, segment| path.join(segment))
    }

    /// Create the directories between the bucket and the object, one level at
    /// a time so a concurrently deleted bucket is never re-created.
    async fn ensure_key_dirs(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut dir = self.bucket_dir(bucket);
        let mut segments: Vec<&str> = key.split('/').collect();
        segments.pop();

        for segment in segments {
            dir.push(segment);
            match fs::create_dir(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(self.missing_bucket_or(bucket, e).await),
            }
        }
        Ok(())
    }

    /// A path lookup failed. Blame the bucket only if it is really gone;
    /// a key nested under an existing object also fails this way.
    async fn missing_bucket_or(&self, bucket: &str, e: std::io::Error) -> StorageError {
        if is_missing(&e) && !is_dir(&self.bucket_dir(bucket)).await {
            StorageError::BucketNotFound(bucket.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    /// Depth-first removal of a directory tree. Entries that disappear while
    /// walking are treated as already removed.
    fn remove_tree(dir: &Path) -> WalkFuture<'_> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if is_missing(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    Self::remove_tree(&path).await?;
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if is_missing(&e) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            match fs::remove_dir(dir).await {
                Ok(()) => Ok(()),
                Err(e) if is_missing(&e) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Recursively walk a bucket, producing one entry per regular file with
    /// its key relative to the bucket directory.
    fn walk_objects<'a>(
        bucket_dir: &'a Path,
        current_dir: &'a Path,
        results: &'a mut Vec<ObjectEntry>,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(current_dir).await {
                Ok(entries) => entries,
                // A subdirectory removed mid-walk simply has no entries
                Err(e) if is_missing(&e) && current_dir != bucket_dir => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let ft = entry.file_type().await?;
                if ft.is_dir() {
                    Self::walk_objects(bucket_dir, &path, results).await?;
                    continue;
                }
                if !ft.is_file() {
                    continue;
                }

                let size = match entry.metadata().await {
                    Ok(m) => m.len(),
                    Err(e) if is_missing(&e) => continue,
                    Err(e) => return Err(e.into()),
                };

                match relative_key(bucket_dir, &path) {
                    Some(key) => results.push(ObjectEntry { key, size }),
                    None => debug!("Skipping non UTF-8 object path {:?}", path),
                }
            }
            Ok(())
        })
    }
}

/// Join the components of `path` below `base` with '/'.
fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    // === Bucket operations ===

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let bucket_dir = self.bucket_dir(bucket);
        match fs::create_dir(&bucket_dir).await {
            Ok(()) => {
                debug!("Created bucket directory: {:?}", bucket_dir);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(bucket.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let bucket_dir = self.bucket_dir(bucket);
        if !is_dir(&bucket_dir).await {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Self::remove_tree(&bucket_dir).await?;
        debug!("Deleted bucket directory: {:?}", bucket_dir);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let mut buckets = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    buckets.push(name.to_string());
                }
            }
        }
        buckets.sort();
        debug!("Listed {} filesystem buckets", buckets.len());
        Ok(buckets)
    }

    // === Object operations ===

    #[instrument(skip(self, body))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
    ) -> Result<PutOutcome, StorageError> {
        if !is_dir(&self.bucket_dir(bucket)).await {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let staging = self.staging.clone();
        let tmp = tokio::task::spawn_blocking(move || {
            Builder::new().prefix(STAGING_PREFIX).tempfile_in(&staging)
        })
        .await
        .map_err(join_error)??;

        // The TempPath deletes the staging file when dropped, which covers
        // stream errors and a cancelled request alike.
        let (std_file, temp_path) = tmp.into_parts();
        let mut file = fs::File::from_std(std_file);

        let mut hasher = Md5::new();
        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        self.ensure_key_dirs(bucket, key).await?;

        let target = self.object_path(bucket, key);
        let persisted = tokio::task::spawn_blocking(move || temp_path.persist(&target))
            .await
            .map_err(join_error)?;
        if let Err(e) = persisted {
            return Err(self.missing_bucket_or(bucket, e.error).await);
        }

        let md5 = hex::encode(hasher.finalize());
        debug!("Wrote object ({} bytes) for {}/{}", size, bucket, key);
        Ok(PutOutcome { size, md5 })
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        let path = self.object_path(bucket, key);
        let not_found = || StorageError::NotFound(format!("{}/{}", bucket, key));

        // Metadata comes from the open handle: a rename that lands after the
        // open cannot change what this reader sees.
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if is_missing(&e) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let stream = ReaderStream::new(file).map(|result| result.map_err(StorageError::Io));
        debug!("Opened object stream for {}/{}", bucket, key);
        Ok(ObjectReader {
            size: metadata.len(),
            stream: Box::pin(stream),
        })
    }

    #[instrument(skip(self))]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64, StorageError> {
        match fs::metadata(self.object_path(bucket, key)).await {
            Ok(m) if m.is_file() => Ok(m.len()),
            Ok(_) => Err(StorageError::NotFound(format!("{}/{}", bucket, key))),
            Err(e) if is_missing(&e) => {
                Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key);
        let not_found = || StorageError::NotFound(format!("{}/{}", bucket, key));

        match fs::symlink_metadata(&path).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(e) if is_missing(&e) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted object {}/{}", bucket, key);
                Ok(())
            }
            Err(e) if is_missing(&e) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StorageError> {
        let bucket_dir = self.bucket_dir(bucket);
        if !is_dir(&bucket_dir).await {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let mut results = Vec::new();
        Self::walk_objects(&bucket_dir, &bucket_dir, &mut results).await?;

        results.retain(|entry| entry.key.starts_with(prefix));
        results.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(
            "Listed {} objects in {} (prefix '{}')",
            results.len(),
            bucket,
            prefix
        );
        Ok(results)
    }
}
