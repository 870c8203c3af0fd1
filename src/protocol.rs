//! Messages exchanged with the peer over the duplex channel.
//!
//! Every message is a JSON object tagged by `"type"`; field names are
//! camelCase.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::SyncError;
use crate::state::{Conflict, FileSnapshot, RemoteVersionInfo, Timestamp};

/// The side the user chose to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    Local,
    Remote,
}

/// A delete the peer declined; the content, when supplied, is restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledDelete {
    pub file_name: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IncomingMessage {
    RequestFiles,
    FileList {
        files: Vec<FileSnapshot>,
    },
    #[serde(rename_all = "camelCase")]
    FileChange {
        file_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    FileDelete {
        file_names: Vec<String>,
        #[serde(default)]
        require_confirmation: bool,
    },
    #[serde(rename_all = "camelCase")]
    DeleteConfirmed {
        file_names: Vec<String>,
    },
    DeleteCancelled {
        files: Vec<CancelledDelete>,
    },
    #[serde(rename_all = "camelCase")]
    FileSynced {
        file_name: String,
        remote_modified_at: Timestamp,
    },
    /// Without `file_names` the choice applies to every pending conflict.
    #[serde(rename_all = "camelCase")]
    ConflictsResolved {
        resolution: ConflictChoice,
        #[serde(default)]
        file_names: Option<Vec<String>>,
    },
    ConflictVersionResponse {
        versions: Vec<RemoteVersionInfo>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        file_name: Option<String>,
        message: String,
    },
}

/// What the peer needs to prompt for one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub file_name: String,
    pub local_content: Option<String>,
    pub remote_content: Option<String>,
}

impl<'a> From<&'a Conflict> for ConflictSummary {
    fn from(conflict: &'a Conflict) -> Self {
        ConflictSummary {
            file_name: conflict.file_name.clone(),
            local_content: conflict.local_content.clone(),
            remote_content: conflict.remote_content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionQuery {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutgoingMessage {
    RequestFiles,
    FileList {
        files: Vec<FileSnapshot>,
    },
    #[serde(rename_all = "camelCase")]
    FileChange {
        file_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    FileDelete {
        file_names: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        require_confirmation: Option<bool>,
    },
    ConflictsDetected {
        conflicts: Vec<ConflictSummary>,
    },
    ConflictVersionRequest {
        conflicts: Vec<VersionQuery>,
    },
    SyncComplete,
}

pub fn decode_message(text: &str) -> Result<IncomingMessage, SyncError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_message(message: &OutgoingMessage) -> Result<String, SyncError> {
    Ok(serde_json::to_string(message)?)
}

/// The sending half of the duplex channel.
///
/// `send` must fail once the channel has closed; the caller treats that
/// exactly like a disconnect.
pub trait PeerChannel {
    fn send(&self, message: OutgoingMessage) -> Result<(), SyncError>;
}

impl PeerChannel for UnboundedSender<OutgoingMessage> {
    fn send(&self, message: OutgoingMessage) -> Result<(), SyncError> {
        UnboundedSender::send(self, message).map_err(|_| SyncError::Disconnected)
    }
}

/// For transports that carry JSON text frames.
impl PeerChannel for UnboundedSender<String> {
    fn send(&self, message: OutgoingMessage) -> Result<(), SyncError> {
        let text = encode_message(&message)?;
        UnboundedSender::send(self, text).map_err(|_| SyncError::Disconnected)
    }
}
