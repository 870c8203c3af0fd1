use std::io;
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// Writes `content` to `file_name` below `root`, creating parent directories.
pub async fn write_file(root: &Path, file_name: &str, content: &str) -> Result<PathBuf, SyncError> {
    let path = root.join(file_name);
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            info!("Creating parent directory {:?}", parent);
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    debug!("Writing {:?}", path);
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

/// Removes `file_name` below `root` through `options`. Returns `false` if the
/// file was already gone or `options` declined.
pub fn remove_file<T>(root: &Path, file_name: &str, options: &T) -> Result<bool, SyncError>
where
    T: PropagationOptions + ?Sized,
{
    let path = root.join(file_name);
    if !path.exists() {
        debug!("{:?} is already gone", path);
        return Ok(false);
    }
    if !options.should_remove(&path) {
        info!("Keeping {:?}", path);
        return Ok(false);
    }

    info!("Removing file {:?}", path);
    // delegate the actual removal to a callback function
    match options.remove_file(&path) {
        Ok(()) => Ok(true),
        Err(SyncError::IoError(ref e)) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// PropagationOptions allow the client to customize how local files are deleted.
pub trait PropagationOptions {
    /// return false to keep the file
    fn should_remove(&self, _: &Path) -> bool;

    /// delete the file or move it to the trash.
    /// This must return an error if the file was not removed successfully,
    /// otherwise its baseline is dropped while the file is still there.
    fn remove_file(&self, _: &Path) -> Result<(), SyncError>;
}

/// A zero-sized struct with a simple implementation of PropagationOptions.
pub struct DefaultPropagationOptions;

impl PropagationOptions for DefaultPropagationOptions {
    fn should_remove(&self, _: &Path) -> bool {
        true
    }
    fn remove_file(&self, path: &Path) -> Result<(), SyncError> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KeepEverything;

    impl PropagationOptions for KeepEverything {
        fn should_remove(&self, _: &Path) -> bool {
            false
        }
        fn remove_file(&self, _: &Path) -> Result<(), SyncError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_write_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "components/Button.tsx", "x").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x");

        assert!(!remove_file(dir.path(), "components/Button.tsx", &KeepEverything).unwrap());
        assert!(path.exists());
        assert!(remove_file(dir.path(), "components/Button.tsx", &DefaultPropagationOptions).unwrap());
        assert!(!path.exists());
        assert!(!remove_file(dir.path(), "components/Button.tsx", &DefaultPropagationOptions).unwrap());
    }
}
