use std::path::Path;

use crate::fingerprint::hash_content;
use crate::sanitize::sanitize_path;
use crate::state::{BaselineEntry, Conflict, FileSnapshot};
use crate::util::{now_ms, FnvHashMap};

mod util;
pub use self::util::{check_root_exists, list_local_files, read_local_file, LocalFile};

/// Inputs to conflict detection besides the files themselves.
#[derive(Debug, Clone, Copy)]
pub struct DetectOptions<'a> {
    /// Baselines keyed by sanitized file name.
    pub persisted_state: &'a FnvHashMap<String, BaselineEntry>,
    pub capitalize_names: bool,
}

impl<'a> DetectOptions<'a> {
    pub fn new(persisted_state: &'a FnvHashMap<String, BaselineEntry>) -> Self {
        DetectOptions {
            persisted_state,
            capitalize_names: true,
        }
    }
}

/// The result of conflict detection
#[derive(Debug, Default)]
pub struct DetectionResult {
    /// Remote files that can be written straight to disk, renamed to their
    /// sanitized path.
    pub writes: Vec<FileSnapshot>,
    /// Files that need auto-resolution or a decision from the user.
    pub conflicts: Vec<Conflict>,
    pub statistics: DetectionStatistics,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Basic statistics about a detection pass.
pub struct DetectionStatistics {
    /// Files whose local content already matched the remote content.
    pub unchanged: usize,
    /// Files that had a baseline to compare against.
    pub baseline_hits: usize,
}

/// Splits a batch of remote files into direct writes and conflicts.
///
/// A file with no local counterpart is always a write. A local file whose
/// content matches the remote content needs nothing. Every other divergence
/// is a conflict, even when the baseline says the local copy is untouched:
/// the pushed batch may be stale, so the decision is deferred until the
/// peer has confirmed its current version.
pub async fn detect_conflicts(
    remote_files: &[FileSnapshot],
    local_dir: &Path,
    options: DetectOptions<'_>,
) -> DetectionResult {
    let mut result = DetectionResult::default();

    for remote in remote_files {
        let sanitized = sanitize_path(&remote.name, options.capitalize_names);
        let file_name = sanitized.path;
        let local_path = local_dir.join(&file_name);

        let (local_content, local_modified_at) = match read_local_file(&local_path).await {
            LocalFile::Missing => {
                debug!("{} doesn't exist locally, writing", file_name);
                result.writes.push(FileSnapshot {
                    name: file_name,
                    content: remote.content.clone(),
                    modified_at: remote.modified_at,
                });
                continue;
            }
            LocalFile::Present { content, modified_at } => (content, modified_at),
        };

        let baseline = options.persisted_state.get(&file_name);
        if baseline.is_some() {
            result.statistics.baseline_hits += 1;
        }

        if local_content == remote.content {
            trace!("{} is identical on both sides", file_name);
            result.statistics.unchanged += 1;
            continue;
        }

        let (last_synced_at, local_clean) = match baseline {
            Some(baseline) => {
                let local_clean = hash_content(&local_content) == baseline.content_hash;
                (Some(baseline.timestamp), Some(local_clean))
            }
            None => {
                info!("Conflict: {} differs and has never been synced", file_name);
                (None, None)
            }
        };

        debug!("Conflict: {} differs (local clean: {:?})", file_name, local_clean);
        result.conflicts.push(Conflict {
            file_name,
            local_content: Some(local_content),
            remote_content: Some(remote.content.clone()),
            local_modified_at,
            remote_modified_at: remote.modified_at.unwrap_or_else(now_ms),
            last_synced_at,
            local_clean,
        });
    }

    result
}
