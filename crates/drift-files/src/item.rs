//! Shareable items and their backing storage.

use crate::error::{ItemError, Result};
use crate::metadata::Metadata;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempPath;
use tokio::io::AsyncReadExt;

/// Prefix for temporary files created by the item store
const TEMP_PREFIX: &str = "drift-item-";

/// Item identifier (16 random bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId([u8; 16]);

impl ItemId {
    /// Generate a random item ID
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Raw bytes of the ID
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Where an item's content lives
enum Backing {
    /// Caller-owned file, never modified by Drift
    Persistent(PathBuf),
    /// Drift-owned file, deleted when dropped
    Temporary(TempPath),
    /// In-memory content that has not been written to disk yet
    Buffer(Arc<[u8]>),
}

struct ItemInner {
    id: ItemId,
    title: String,
    item_type: String,
    metadata: Metadata,
    temp_dir: PathBuf,
    backing: Mutex<Backing>,
}

/// A unit of shareable content plus title, type and metadata.
///
/// `Item` is a cheap handle: clones share identity and storage. Temporary
/// storage is deleted once the last handle is dropped. Equality and hashing
/// use the item's [`ItemId`].
#[derive(Clone)]
pub struct Item {
    inner: Arc<ItemInner>,
}

impl Item {
    /// Create an item that refers to an existing file.
    ///
    /// The file is neither copied nor moved and must stay available for the
    /// item's lifetime. The item is persistent.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::Inaccessible`] if the file cannot be stat'ed or
    /// is not a regular file.
    pub fn from_file(
        path: impl AsRef<Path>,
        title: impl Into<String>,
        item_type: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Self> {
        let path = path.as_ref();
        let stat = fs::metadata(path).map_err(|source| ItemError::Inaccessible {
            path: path.to_path_buf(),
            source,
        })?;
        if !stat.is_file() {
            return Err(ItemError::Inaccessible {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        Ok(Self::with_backing(
            Backing::Persistent(path.to_path_buf()),
            title.into(),
            item_type.into(),
            metadata,
            std::env::temp_dir(),
        ))
    }

    /// Create a temporary item from in-memory content.
    ///
    /// Content is written to the system temp directory only if a path is
    /// requested (see [`Item::materialize`]).
    #[must_use]
    pub fn from_buffer(
        bytes: impl Into<Vec<u8>>,
        title: impl Into<String>,
        item_type: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self::from_buffer_in(std::env::temp_dir(), bytes, title, item_type, metadata)
    }

    /// Same as [`Item::from_buffer`], materializing into `temp_dir`
    #[must_use]
    pub fn from_buffer_in(
        temp_dir: impl Into<PathBuf>,
        bytes: impl Into<Vec<u8>>,
        title: impl Into<String>,
        item_type: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self::with_backing(
            Backing::Buffer(Arc::from(bytes)),
            title.into(),
            item_type.into(),
            metadata,
            temp_dir.into(),
        )
    }

    /// Create a temporary item that takes ownership of an existing temp file
    #[must_use]
    pub fn from_temp_path(
        path: TempPath,
        title: impl Into<String>,
        item_type: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let temp_dir = path
            .parent()
            .map_or_else(std::env::temp_dir, Path::to_path_buf);
        Self::with_backing(
            Backing::Temporary(path),
            title.into(),
            item_type.into(),
            metadata,
            temp_dir,
        )
    }

    fn with_backing(
        backing: Backing,
        title: String,
        item_type: String,
        metadata: Metadata,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                id: ItemId::random(),
                title,
                item_type,
                metadata,
                temp_dir,
                backing: Mutex::new(backing),
            }),
        }
    }

    fn backing(&self) -> MutexGuard<'_, Backing> {
        self.inner
            .backing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Item identifier
    #[must_use]
    pub fn id(&self) -> ItemId {
        self.inner.id
    }

    /// Item title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Item type identifier
    #[must_use]
    pub fn item_type(&self) -> &str {
        &self.inner.item_type
    }

    /// Metadata the item was created with
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Returns true if Drift owns (and will delete) the storage
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        !matches!(*self.backing(), Backing::Persistent(_))
    }

    /// Returns true if the content is on disk
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        !matches!(*self.backing(), Backing::Buffer(_))
    }

    /// Path to a file holding the item's content.
    ///
    /// Buffer-backed items are written to a temporary file on the first call;
    /// later calls return the same path.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the temporary file cannot be written.
    pub fn materialize(&self) -> Result<PathBuf> {
        let mut backing = self.backing();
        let bytes = match &*backing {
            Backing::Persistent(path) => return Ok(path.clone()),
            Backing::Temporary(path) => return Ok(path.to_path_buf()),
            Backing::Buffer(bytes) => Arc::clone(bytes),
        };

        fs::create_dir_all(&self.inner.temp_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.inner.temp_dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();

        tracing::debug!(
            item = %self.inner.id,
            path = %path.display(),
            bytes = bytes.len(),
            "Materialized item content"
        );

        *backing = Backing::Temporary(temp_path);
        Ok(path)
    }

    /// Alias for [`Item::materialize`]
    ///
    /// # Errors
    ///
    /// See [`Item::materialize`].
    pub fn path(&self) -> Result<PathBuf> {
        self.materialize()
    }

    /// Move the content to `new_path` and make the item persistent.
    ///
    /// Any previous temporary storage is destroyed. A rename is attempted
    /// first; if it fails the content is copied and the temporary file removed.
    ///
    /// # Errors
    ///
    /// - [`ItemError::AlreadyPersistent`] if the item is already persistent;
    ///   existing storage is left untouched.
    /// - [`ItemError::Io`] if the content cannot be moved; the item stays
    ///   temporary.
    pub fn adopt(&self, new_path: impl AsRef<Path>) -> Result<()> {
        let new_path = new_path.as_ref();
        let mut backing = self.backing();

        let previous = std::mem::replace(&mut *backing, Backing::Persistent(new_path.to_path_buf()));
        match previous {
            Backing::Persistent(path) => {
                *backing = Backing::Persistent(path);
                return Err(ItemError::AlreadyPersistent);
            }
            Backing::Buffer(bytes) => {
                if let Err(e) = fs::write(new_path, &bytes) {
                    *backing = Backing::Buffer(bytes);
                    return Err(e.into());
                }
            }
            Backing::Temporary(temp) => {
                if let Err(tempfile::PathPersistError { error, path: temp }) = temp.persist(new_path)
                {
                    tracing::debug!(
                        item = %self.inner.id,
                        error = %error,
                        "Rename failed, copying item content"
                    );
                    if let Err(e) = fs::copy(&temp, new_path) {
                        *backing = Backing::Temporary(temp);
                        return Err(e.into());
                    }
                    drop(temp);
                }
            }
        }

        tracing::info!(
            item = %self.inner.id,
            path = %new_path.display(),
            "Item adopted into persistent storage"
        );
        Ok(())
    }

    /// Content length in bytes
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the backing file cannot be stat'ed.
    pub fn len(&self) -> Result<u64> {
        match &*self.backing() {
            Backing::Buffer(bytes) => Ok(bytes.len() as u64),
            Backing::Persistent(path) => Ok(fs::metadata(path)?.len()),
            Backing::Temporary(path) => Ok(fs::metadata(path)?.len()),
        }
    }

    /// Returns true if the item has no content
    ///
    /// # Errors
    ///
    /// See [`Item::len`].
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read the full content into memory
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the backing file cannot be read.
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        match &*self.backing() {
            Backing::Buffer(bytes) => Ok(bytes.to_vec()),
            Backing::Persistent(path) => Ok(fs::read(path)?),
            Backing::Temporary(path) => Ok(fs::read(path)?),
        }
    }

    /// Open a streaming reader over the content
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the backing file cannot be opened.
    pub async fn open_reader(&self) -> Result<ContentReader> {
        let path = match &*self.backing() {
            Backing::Buffer(bytes) => {
                return Ok(ContentReader::Memory {
                    bytes: Arc::clone(bytes),
                    offset: 0,
                });
            }
            Backing::Persistent(path) => path.clone(),
            Backing::Temporary(path) => path.to_path_buf(),
        };
        let file = tokio::fs::File::open(&path).await?;
        Ok(ContentReader::File(file))
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Item {}

impl std::hash::Hash for Item {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.inner.id)
            .field("title", &self.inner.title)
            .field("item_type", &self.inner.item_type)
            .field("temporary", &self.is_temporary())
            .finish()
    }
}

/// Streaming reader over an item's content
pub enum ContentReader {
    /// Reading from an in-memory buffer
    Memory {
        /// Shared content
        bytes: Arc<[u8]>,
        /// Next read position
        offset: usize,
    },
    /// Reading from a file
    File(tokio::fs::File),
}

impl ContentReader {
    /// Read up to `max` bytes; `None` at end of content
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file read fails.
    pub async fn next_chunk(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Memory { bytes, offset } => {
                if *offset >= bytes.len() {
                    return Ok(None);
                }
                let end = (*offset + max).min(bytes.len());
                let chunk = bytes[*offset..end].to_vec();
                *offset = end;
                Ok(Some(chunk))
            }
            Self::File(file) => {
                let mut buf = vec![0u8; max];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Metadata {
        Metadata::new()
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = Item::from_file(dir.path().join("nope"), "x", "public.data", empty());
        assert!(matches!(result, Err(ItemError::Inaccessible { .. })));
    }

    #[test]
    fn test_from_file_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = Item::from_file(dir.path(), "x", "public.data", empty());
        assert!(matches!(result, Err(ItemError::Inaccessible { .. })));
    }

    #[test]
    fn test_from_file_is_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, b"hello").unwrap();

        let item = Item::from_file(&path, "Doc", "text/plain", empty()).unwrap();
        assert!(!item.is_temporary());
        assert_eq!(item.path().unwrap(), path);
        assert_eq!(item.len().unwrap(), 5);

        drop(item);
        assert!(path.exists());
    }

    #[test]
    fn test_buffer_materialize_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = b"some bytes \x00\x01\x02".to_vec();
        let item = Item::from_buffer_in(dir.path(), bytes.clone(), "B", "public.data", empty());

        assert!(item.is_temporary());
        assert!(!item.is_materialized());

        let path = item.materialize().unwrap();
        assert!(item.is_materialized());
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert_eq!(item.materialize().unwrap(), path);
    }

    #[test]
    fn test_temporary_storage_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let item = Item::from_buffer_in(dir.path(), b"abc".to_vec(), "B", "public.data", empty());
        let path = item.materialize().unwrap();
        let clone = item.clone();

        drop(item);
        assert!(path.exists());
        drop(clone);
        assert!(!path.exists());
    }

    #[test]
    fn test_adopt_materialized_item() {
        let dir = tempfile::tempdir().unwrap();
        let item = Item::from_buffer_in(dir.path(), b"keep me".to_vec(), "K", "public.data", empty());
        let temp = item.materialize().unwrap();
        let target = dir.path().join("kept.bin");

        item.adopt(&target).unwrap();
        assert!(!item.is_temporary());
        assert!(!temp.exists());
        assert_eq!(item.path().unwrap(), target);

        drop(item);
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
    }

    #[test]
    fn test_adopt_unmaterialized_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let item = Item::from_buffer_in(dir.path(), b"direct".to_vec(), "D", "public.data", empty());
        let target = dir.path().join("direct.bin");

        item.adopt(&target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"direct");
        assert!(!item.is_temporary());
    }

    #[test]
    fn test_adopt_twice_fails_and_leaves_storage() {
        let dir = tempfile::tempdir().unwrap();
        let item = Item::from_buffer_in(dir.path(), b"once".to_vec(), "O", "public.data", empty());
        let first = dir.path().join("first.bin");
        let second = dir.path().join("second.bin");

        item.adopt(&first).unwrap();
        assert!(matches!(item.adopt(&second), Err(ItemError::AlreadyPersistent)));
        assert!(matches!(item.adopt(&second), Err(ItemError::AlreadyPersistent)));

        assert!(!second.exists());
        assert_eq!(fs::read(&first).unwrap(), b"once");
        assert_eq!(item.path().unwrap(), first);
    }

    #[test]
    fn test_adopt_failure_keeps_item_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let item = Item::from_buffer_in(dir.path(), b"x".to_vec(), "X", "public.data", empty());
        let bad = dir.path().join("missing-dir").join("x.bin");

        assert!(matches!(item.adopt(&bad), Err(ItemError::Io(_))));
        assert!(item.is_temporary());
        assert_eq!(item.read_to_vec().unwrap(), b"x");
    }

    #[test]
    fn test_identity_equality() {
        let a = Item::from_buffer(b"1".to_vec(), "A", "public.data", empty());
        let b = Item::from_buffer(b"1".to_vec(), "A", "public.data", empty());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_reader_chunks_buffer_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..10u8).collect();
        let item = Item::from_buffer_in(dir.path(), content.clone(), "R", "public.data", empty());

        let mut reader = item.open_reader().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = reader.next_chunk(3).await.unwrap() {
            assert!(chunk.len() <= 3);
            collected.extend(chunk);
        }
        assert_eq!(collected, content);

        item.materialize().unwrap();
        let mut reader = item.open_reader().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = reader.next_chunk(4).await.unwrap() {
            collected.extend(chunk);
        }
        assert_eq!(collected, content);
    }
}
