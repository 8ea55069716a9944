//! Filesystem and archive collaborators.

use std::io;
use std::path::Path;

use async_trait::async_trait;

/// Filesystem surface consumed by the download pipeline.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Whether `path` exists at all.
    async fn exists(&self, path: &Path) -> bool;

    /// Create a directory, with parents when `recursive`.
    async fn create_directory(&self, path: &Path, recursive: bool) -> io::Result<()>;

    /// Remove a file or a directory tree; absent paths are fine.
    async fn remove_file_tree(&self, path: &Path) -> io::Result<()>;

    /// Read a whole file.
    async fn read_file_contents(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write a whole file, replacing any previous contents.
    async fn write_file_contents(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Replace `path`'s contents with the contents of its single
    /// top-level directory.
    async fn strip_first_level(&self, path: &Path) -> io::Result<()>;
}

/// [`FileSystem`] over the local disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn create_directory(&self, path: &Path, recursive: bool) -> io::Result<()> {
        if recursive {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        }
    }

    async fn remove_file_tree(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_file_contents(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write_file_contents(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn strip_first_level(&self, path: &Path) -> io::Result<()> {
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || strip_first_level_sync(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn strip_first_level_sync(path: &Path) -> io::Result<()> {
    let mut entries = std::fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() != 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "expected a single top-level directory",
        ));
    }

    let top = entries.remove(0).path();
    if !top.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "expected a single top-level directory",
        ));
    }

    for entry in std::fs::read_dir(&top)? {
        let entry = entry?;
        std::fs::rename(entry.path(), path.join(entry.file_name()))?;
    }
    std::fs::remove_dir(&top)
}

/// Archive extraction collaborator.
///
/// The client never extracts archives itself; the embedding tool
/// supplies the implementation.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into the existing directory `destination`.
    async fn extract(&self, archive: &Path, destination: &Path) -> io::Result<()>;
}
