use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// A remote file as pushed by the peer in one sync round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<Timestamp>,
}

impl FileSnapshot {
    pub fn new<N: Into<String>, C: Into<String>>(name: N, content: C, modified_at: Option<Timestamp>) -> Self {
        FileSnapshot {
            name: name.into(),
            content: content.into(),
            modified_at,
        }
    }
}

/// Mirrors the state of a file as of its last successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineEntry {
    pub content_hash: String,
    pub timestamp: Timestamp,
}

/// A file whose two sides disagree.
///
/// `None` content means the file is deleted on that side. `local_clean` is
/// `Some(true)` when the local file still matches the baseline, `Some(false)`
/// when it has been edited since, and `None` when there is no baseline to
/// compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub file_name: String,
    pub local_content: Option<String>,
    pub remote_content: Option<String>,
    pub local_modified_at: Timestamp,
    pub remote_modified_at: Timestamp,
    pub last_synced_at: Option<Timestamp>,
    pub local_clean: Option<bool>,
}

/// The peer's current version of a file, fetched after detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVersionInfo {
    pub file_name: String,
    #[serde(default)]
    pub latest_remote_version_ms: Option<Timestamp>,
}
