use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::{DepotError, Result};

pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies `source` into the managed directory as `file_name`. Copying a
    /// file onto itself is a no-op.
    pub fn copy_in(&self, source: impl AsRef<Path>, file_name: &str) -> Result<PathBuf> {
        let source = source.as_ref();
        fs::create_dir_all(&self.root)?;
        let destination = self.root.join(file_name);
        if same_file(source, &destination) {
            return Ok(destination);
        }
        fs::copy(source, &destination)?;
        Ok(destination)
    }

    pub fn ensure_directory(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::create_dir_all(self.root.join(path.as_ref()))?;
        Ok(())
    }

    pub fn remove_tree(&self, path: impl AsRef<Path>) -> Result<()> {
        let target = self.root.join(path.as_ref());
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        Ok(())
    }

    /// Moves the tree at `from` to `to`, discarding whatever `to` held.
    pub fn replace_tree(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.remove_tree(to.as_ref())?;
        fs::rename(self.root.join(from.as_ref()), self.root.join(to.as_ref()))?;
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Checksum sidecar of `files/best.mp3` is `files/.best.mp3.md5`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.md5"))
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".md5"))
}

pub fn file_md5(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Flushes `path` to disk, hashes it and writes the sidecar.
pub fn write_checksum(path: &Path) -> Result<String> {
    File::open(path)?.sync_all()?;
    let digest = file_md5(path)?;
    fs::write(sidecar_path(path), &digest)?;
    Ok(digest)
}

/// Re-hashes `path` and compares it against its sidecar.
pub fn verify_checksum(path: &Path) -> Result<()> {
    let sidecar = sidecar_path(path);
    let expected = fs::read_to_string(&sidecar)
        .map_err(|e| DepotError::CorruptStoreData {
            path: sidecar.clone(),
            reason: format!("missing checksum: {e}"),
        })?
        .trim()
        .to_string();
    let actual = file_md5(path)?;
    if expected != actual {
        return Err(DepotError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sidecar_sits_next_to_the_file() {
        assert_eq!(
            sidecar_path(Path::new("/t/music/x/files/best.mp3")),
            PathBuf::from("/t/music/x/files/.best.mp3.md5")
        );
        assert!(is_sidecar(Path::new("/t/.best.mp3.md5")));
        assert!(!is_sidecar(Path::new("/t/best.mp3")));
    }

    #[test]
    fn checksum_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normal.mp3");
        fs::write(&path, b"hello").unwrap();

        let digest = write_checksum(&path).unwrap();
        assert_eq!(digest, "5d41402abc4b2a76b9719d911017c592");
        verify_checksum(&path).unwrap();

        fs::write(&path, b"hellO").unwrap();
        assert!(matches!(
            verify_checksum(&path),
            Err(DepotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn copy_in_onto_itself_keeps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileManager::new(dir.path());
        let path = dir.path().join("a.mp3");
        fs::write(&path, b"data").unwrap();
        let copied = manager.copy_in(&path, "a.mp3").unwrap();
        assert_eq!(fs::read(copied).unwrap(), b"data");
    }

    #[test]
    fn replace_tree_swaps_directories() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileManager::new(dir.path());
        manager.ensure_directory("old/files").unwrap();
        fs::write(dir.path().join("old/files/stale.mp3"), b"stale").unwrap();
        manager.ensure_directory(".old.new/files").unwrap();
        fs::write(dir.path().join(".old.new/files/fresh.mp3"), b"fresh").unwrap();

        manager.replace_tree(".old.new", "old").unwrap();
        assert!(!dir.path().join(".old.new").exists());
        assert!(!dir.path().join("old/files/stale.mp3").exists());
        assert_eq!(fs::read(dir.path().join("old/files/fresh.mp3")).unwrap(), b"fresh");
    }
}
