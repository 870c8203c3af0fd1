//! One connection to the peer: dispatches incoming messages and runs sync
//! rounds through detection, auto-resolution and user decisions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::archive::BaselineStore;
use crate::config::SyncInfo;
use crate::coordinator::{ActionId, Answer, DecisionCoordinator, DeleteRequest};
use crate::detect::{detect_conflicts, list_local_files, DetectOptions};
use crate::error::SyncError;
use crate::fingerprint::hash_content;
use crate::propagate::{self, DefaultPropagationOptions, PropagationOptions};
use crate::protocol::{ConflictChoice, IncomingMessage, OutgoingMessage, PeerChannel};
use crate::reconcile::auto_resolve_conflicts;
use crate::sanitize::sanitize_path;
use crate::state::{BaselineEntry, Conflict, FileSnapshot, RemoteVersionInfo, Timestamp};
use crate::util::{now_ms, FnvHashMap};

/// What a sync round did, file by file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundReport {
    /// Remote files written straight to disk.
    pub written: usize,
    pub auto_resolved_local: usize,
    pub auto_resolved_remote: usize,
    pub user_resolved_local: usize,
    pub user_resolved_remote: usize,
    /// Conflicts left for the next round.
    pub skipped: usize,
}

pub struct SyncSession<C, S> {
    config: SyncInfo,
    channel: Option<C>,
    baseline: Mutex<S>,
    coordinator: DecisionCoordinator,
    options: Box<dyn PropagationOptions + Send + Sync>,
    /// Held for the whole of a sync round, so rounds never overlap.
    round: tokio::sync::Mutex<()>,
    /// Content hashes sent to the peer and not yet acknowledged, oldest first.
    pushed: Mutex<FnvHashMap<String, VecDeque<String>>>,
}

impl<C, S> SyncSession<C, S>
where
    C: PeerChannel + Send + Sync + 'static,
    S: BaselineStore + Send + 'static,
{
    /// A session for a freshly connected channel.
    pub fn connected(config: SyncInfo, baseline: S, channel: C) -> Self {
        SyncSession::with_channel(config, baseline, Some(channel))
    }

    /// A session with no channel. Anything that needs the peer fails with
    /// `SyncError::NoChannel`.
    pub fn detached(config: SyncInfo, baseline: S) -> Self {
        SyncSession::with_channel(config, baseline, None)
    }

    fn with_channel(config: SyncInfo, baseline: S, channel: Option<C>) -> Self {
        SyncSession {
            config,
            channel,
            baseline: Mutex::new(baseline),
            coordinator: DecisionCoordinator::new(),
            options: Box::new(DefaultPropagationOptions),
            round: tokio::sync::Mutex::new(()),
            pushed: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn with_propagation_options<T>(mut self, options: T) -> Self
    where
        T: PropagationOptions + Send + Sync + 'static,
    {
        self.options = Box::new(options);
        self
    }

    pub fn config(&self) -> &SyncInfo {
        &self.config
    }

    pub fn coordinator(&self) -> &DecisionCoordinator {
        &self.coordinator
    }

    fn channel(&self) -> Result<&C, SyncError> {
        self.channel.as_ref().ok_or(SyncError::NoChannel)
    }

    /// Maps a name supplied by the peer onto the local path it stands for.
    /// Names this side produced map onto themselves.
    fn canonical_name(&self, raw: &str) -> String {
        sanitize_path(raw, self.config.capitalize_names).path
    }

    fn baseline(&self) -> MutexGuard<'_, S> {
        self.baseline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pushed(&self) -> MutexGuard<'_, FnvHashMap<String, VecDeque<String>>> {
        self.pushed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn baseline_entry(&self, file_name: &str) -> Result<Option<BaselineEntry>, SyncError> {
        self.baseline().get(file_name)
    }

    /// Routes one message from the peer.
    ///
    /// Sync rounds run on their own task so that the caller can keep feeding
    /// answers in while a round waits for them. Rounds still run one at a
    /// time, in the order they were started.
    pub async fn handle_message(self: &Arc<Self>, message: IncomingMessage) -> Result<(), SyncError> {
        match message {
            IncomingMessage::RequestFiles => {
                let files = list_local_files(&self.config.root, &self.config.ignore)?;
                info!("Sending {} local files", files.len());
                self.channel()?.send(OutgoingMessage::FileList { files })?;
            }
            IncomingMessage::FileList { files } => {
                info!("Received {} remote files", files.len());
                self.spawn_round(files);
            }
            IncomingMessage::FileChange { file_name, content } => {
                self.spawn_round(vec![FileSnapshot::new(file_name, content, None)]);
            }
            IncomingMessage::FileDelete {
                file_names,
                require_confirmation,
            } => {
                if require_confirmation {
                    debug!("Peer asked for confirmation, which is given locally by default");
                }
                for file_name in file_names {
                    let file_name = self.canonical_name(&file_name);
                    self.apply_remote(&file_name, None, now_ms()).await?;
                }
            }
            IncomingMessage::DeleteConfirmed { file_names } => {
                for file_name in file_names {
                    let id = ActionId::Delete(self.canonical_name(&file_name));
                    self.coordinator.handle_confirmation(&id, Answer::Delete(true));
                }
            }
            IncomingMessage::DeleteCancelled { files } => {
                for file in files {
                    let file_name = self.canonical_name(&file.file_name);
                    self.coordinator
                        .handle_confirmation(&ActionId::Delete(file_name.clone()), Answer::Delete(false));
                    if let Some(content) = file.content {
                        info!("Restoring {} after cancelled delete", file_name);
                        self.apply_remote(&file_name, Some(&content), now_ms()).await?;
                    }
                }
            }
            IncomingMessage::FileSynced {
                file_name,
                remote_modified_at,
            } => {
                let file_name = self.canonical_name(&file_name);
                self.record_synced(&file_name, remote_modified_at)?;
            }
            IncomingMessage::ConflictsResolved { resolution, file_names } => {
                let file_names = match file_names {
                    Some(file_names) => file_names.iter().map(|name| self.canonical_name(name)).collect(),
                    None => self.coordinator.pending_conflicts(),
                };
                for file_name in file_names {
                    self.coordinator
                        .handle_confirmation(&ActionId::Conflict(file_name), Answer::Conflict(resolution));
                }
            }
            IncomingMessage::ConflictVersionResponse { versions } => {
                self.coordinator
                    .handle_confirmation(&ActionId::Versions, Answer::Versions(versions));
            }
            IncomingMessage::Error { file_name, message } => match file_name {
                Some(file_name) => warn!("Peer reported an error for {}: {}", file_name, message),
                None => warn!("Peer reported an error: {}", message),
            },
        }
        Ok(())
    }

    fn spawn_round(self: &Arc<Self>, files: Vec<FileSnapshot>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            match session.sync_round(files).await {
                Ok(report) => debug!("Sync round finished: {:?}", report),
                Err(e) => error!("Sync round failed: {}", e),
            }
        });
    }

    /// The channel closed: settle everything that is waiting on the peer.
    pub fn disconnect(&self) {
        self.coordinator.cleanup();
        self.pushed().clear();
    }

    /// Asks the peer for its full file list.
    pub fn request_files(&self) -> Result<(), SyncError> {
        self.channel()?.send(OutgoingMessage::RequestFiles)
    }

    /// Runs one full round for a batch of remote files.
    ///
    /// Conflicts are first checked against the peer's current versions; only
    /// the ones that can't be settled that way are put to the user. Anything
    /// still unanswered is left alone and comes back next round.
    ///
    /// Waits for any round already in progress on this session to finish.
    pub async fn sync_round(&self, remote_files: Vec<FileSnapshot>) -> Result<RoundReport, SyncError> {
        let channel = self.channel()?;
        let _round = self.round.lock().await;
        let mut report = RoundReport::default();

        let persisted = self.baseline().get_all()?;
        let options = DetectOptions {
            persisted_state: &persisted,
            capitalize_names: self.config.capitalize_names,
        };
        let detection = detect_conflicts(&remote_files, &self.config.root, options).await;
        info!(
            "Detected {} writes and {} conflicts ({} unchanged)",
            detection.writes.len(),
            detection.conflicts.len(),
            detection.statistics.unchanged
        );

        for write in &detection.writes {
            let timestamp = write.modified_at.unwrap_or_else(now_ms);
            self.apply_remote(&write.name, Some(&write.content), timestamp).await?;
            report.written += 1;
        }

        if !detection.conflicts.is_empty() {
            let versions = self
                .coordinator
                .request_remote_versions(channel, &detection.conflicts)
                .await;
            let resolution = auto_resolve_conflicts(detection.conflicts, &versions);

            for conflict in &resolution.auto_resolved_local {
                self.keep_local(channel, conflict, &versions)?;
                report.auto_resolved_local += 1;
            }
            for conflict in &resolution.auto_resolved_remote {
                self.keep_remote(conflict, &versions).await?;
                report.auto_resolved_remote += 1;
            }

            let decisions = self
                .coordinator
                .request_conflict_decisions(channel, &resolution.remaining_conflicts)
                .await;
            for conflict in &resolution.remaining_conflicts {
                match decisions.get(&conflict.file_name) {
                    Some(ConflictChoice::Local) => {
                        self.keep_local(channel, conflict, &versions)?;
                        report.user_resolved_local += 1;
                    }
                    Some(ConflictChoice::Remote) => {
                        self.keep_remote(conflict, &versions).await?;
                        report.user_resolved_remote += 1;
                    }
                    None => {
                        info!("Leaving {} unresolved until the next round", conflict.file_name);
                        report.skipped += 1;
                    }
                }
            }
        }

        channel.send(OutgoingMessage::SyncComplete)?;
        Ok(report)
    }

    /// Sends a local edit to the peer. The baseline moves once the peer
    /// acknowledges it with `file-synced`.
    pub fn push_local_change(&self, file_name: &str, content: &str) -> Result<(), SyncError> {
        let file_name = self.canonical_name(file_name);
        self.send_change(self.channel()?, &file_name, content)
    }

    fn send_change(&self, channel: &C, file_name: &str, content: &str) -> Result<(), SyncError> {
        channel.send(OutgoingMessage::FileChange {
            file_name: file_name.to_owned(),
            content: content.to_owned(),
        })?;
        self.pushed()
            .entry(file_name.to_owned())
            .or_insert_with(VecDeque::new)
            .push_back(hash_content(content));
        Ok(())
    }

    /// Tells the peer a file was deleted locally. Returns whether the peer
    /// deleted it too; the baseline entry is dropped only in that case.
    pub async fn push_local_delete(&self, file_name: &str) -> Result<bool, SyncError> {
        let channel = self.channel()?;
        let file_name = self.canonical_name(file_name);
        let request = DeleteRequest {
            file_name: file_name.clone(),
            require_confirmation: self.config.require_delete_confirmation,
        };
        let deleted = self.coordinator.request_delete_decision(channel, request).await;
        if deleted {
            self.baseline().remove(&file_name)?;
        }
        Ok(deleted)
    }

    fn keep_local(&self, channel: &C, conflict: &Conflict, versions: &[RemoteVersionInfo]) -> Result<(), SyncError> {
        debug!("Keeping local copy of {}", conflict.file_name);
        match conflict.local_content {
            Some(ref content) => {
                self.send_change(channel, &conflict.file_name, content)?;
                let timestamp = latest_version(conflict, versions).unwrap_or(conflict.remote_modified_at);
                self.record_baseline(&conflict.file_name, content, timestamp)
            }
            None => {
                channel.send(OutgoingMessage::FileDelete {
                    file_names: vec![conflict.file_name.clone()],
                    require_confirmation: None,
                })?;
                self.baseline().remove(&conflict.file_name)
            }
        }
    }

    async fn keep_remote(&self, conflict: &Conflict, versions: &[RemoteVersionInfo]) -> Result<(), SyncError> {
        debug!("Taking remote copy of {}", conflict.file_name);
        let timestamp = latest_version(conflict, versions).unwrap_or(conflict.remote_modified_at);
        self.apply_remote(&conflict.file_name, conflict.remote_content.as_deref(), timestamp)
            .await
    }

    /// Makes the local file match the remote side and records the baseline.
    /// `None` content removes the file.
    async fn apply_remote(&self, file_name: &str, content: Option<&str>, timestamp: Timestamp) -> Result<(), SyncError> {
        match content {
            Some(content) => {
                propagate::write_file(&self.config.root, file_name, content).await?;
                self.record_baseline(file_name, content, timestamp)
            }
            None => {
                let removed = propagate::remove_file(&self.config.root, file_name, &*self.options)?;
                if removed || !self.config.root.join(file_name).exists() {
                    self.baseline().remove(file_name)
                } else {
                    debug!("{} was kept, so is its baseline", file_name);
                    Ok(())
                }
            }
        }
    }

    /// The peer stored our oldest unacknowledged push of `file_name` at
    /// `remote_modified_at`. Local edits made since then stay unsynced.
    fn record_synced(&self, file_name: &str, remote_modified_at: Timestamp) -> Result<(), SyncError> {
        let content_hash = {
            let mut pushed = self.pushed();
            let hash = pushed.get_mut(file_name).and_then(VecDeque::pop_front);
            if pushed.get(file_name).map_or(false, VecDeque::is_empty) {
                pushed.remove(file_name);
            }
            hash
        };
        match content_hash {
            Some(content_hash) => {
                trace!("Recording baseline for {} at {}", file_name, remote_modified_at);
                self.baseline().set(
                    file_name,
                    BaselineEntry {
                        content_hash,
                        timestamp: remote_modified_at,
                    },
                )
            }
            None => {
                warn!("{} was synced but never pushed from here", file_name);
                Ok(())
            }
        }
    }

    fn record_baseline(&self, file_name: &str, content: &str, timestamp: Timestamp) -> Result<(), SyncError> {
        trace!("Recording baseline for {} at {}", file_name, timestamp);
        self.baseline().set(
            file_name,
            BaselineEntry {
                content_hash: hash_content(content),
                timestamp,
            },
        )
    }
}

fn latest_version(conflict: &Conflict, versions: &[RemoteVersionInfo]) -> Option<Timestamp> {
    versions
        .iter()
        .find(|version| version.file_name == conflict.file_name)
        .and_then(|version| version.latest_remote_version_ms)
}
