use crate::error::{CoreError, Result};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// A reader never observes a half-written document.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a document, reporting a missing file as `DocumentNotFound`
/// rather than a bare I/O error.
pub fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => CoreError::DocumentNotFound(path.to_path_buf()),
        _ => CoreError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epic.xml");
        atomic_write(&path, b"<epic/>").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<epic/>");
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_tempfiles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epic.xml");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn read_missing_document() {
        let dir = TempDir::new().unwrap();
        let err = read_document(&dir.path().join("missing.xml")).unwrap_err();
        assert!(matches!(err, CoreError::DocumentNotFound(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
