use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

use crate::config::Ignore;
use crate::error::SyncError;
use crate::state::{FileSnapshot, Timestamp};
use crate::util::system_time_ms;

/// What the detector found on disk for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFile {
    Missing,
    Present { content: String, modified_at: Timestamp },
}

/// Reads a local file. Any failure other than "not found" is logged and the
/// file is reported as missing so that the rest of the batch carries on.
pub async fn read_local_file(path: &Path) -> LocalFile {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Couldn't read {:?}, treating it as absent: {}", path, e);
            }
            return LocalFile::Missing;
        }
    };
    let modified_at = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(time) => system_time_ms(time),
        Err(e) => {
            debug!("No modification time for {:?}: {}", path, e);
            0
        }
    };
    LocalFile::Present { content, modified_at }
}

pub fn check_root_exists(root: &Path) -> Result<(), SyncError> {
    if !root.is_dir() {
        return Err(SyncError::RootDoesntExist(root.to_path_buf()));
    }
    Ok(())
}

/// Collects every non-ignored text file below `root` as a snapshot named by
/// its `/`-separated relative path.
pub fn list_local_files(root: &Path, ignore: &Ignore) -> Result<Vec<FileSnapshot>, SyncError> {
    check_root_exists(root)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|entry| {
        match entry.path().strip_prefix(root) {
            Ok(relative) => relative.as_os_str().is_empty() || !ignore.is_ignored(relative),
            Err(_) => false,
        }
    });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = match fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                info!("Skipping {:?}: {}", relative, e);
                continue;
            }
        };
        let modified_at = entry.metadata().ok().and_then(|m| m.modified().ok()).map(system_time_ms);

        trace!("Listing {}", name);
        files.push(FileSnapshot {
            name,
            content,
            modified_at,
        });
    }
    Ok(files)
}
