//! Turns "ask the peer and wait for its answer" into an ordinary async call.
//!
//! Each outstanding question is a oneshot sender stored under its `ActionId`.
//! Answers arriving on the channel are routed here by the dispatcher through
//! `handle_confirmation`. When the channel closes, `cleanup` drops every
//! sender, so every waiter wakes up at once and settles on its safe default:
//! `false` for a delete, no decisions for conflicts, no versions for a
//! version query.
//!
//! A coordinator belongs to exactly one channel. Create one per connection
//! and drop it with the connection.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::SyncError;
use crate::protocol::{ConflictChoice, ConflictSummary, OutgoingMessage, PeerChannel, VersionQuery};
use crate::state::{Conflict, RemoteVersionInfo};
use crate::util::FnvHashMap;

/// Correlates an answer with the question that asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionId {
    /// `delete:<file>`
    Delete(String),
    /// `conflict:<file>`
    Conflict(String),
    /// The single outstanding version query of a sync round.
    Versions,
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ActionId::Delete(ref file_name) => write!(f, "delete:{}", file_name),
            ActionId::Conflict(ref file_name) => write!(f, "conflict:{}", file_name),
            ActionId::Versions => write!(f, "versions"),
        }
    }
}

impl FromStr for ActionId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("delete", file_name)) if !file_name.is_empty() => Ok(ActionId::Delete(file_name.to_owned())),
            Some(("conflict", file_name)) if !file_name.is_empty() => Ok(ActionId::Conflict(file_name.to_owned())),
            None if s == "versions" => Ok(ActionId::Versions),
            _ => Err(SyncError::InvalidActionId(s.to_owned())),
        }
    }
}

/// The value an answer resolves a pending action with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Delete(bool),
    Conflict(ConflictChoice),
    Versions(Vec<RemoteVersionInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub file_name: String,
    pub require_confirmation: bool,
}

/// Per-file choices, keyed by file name. Files without an answer are absent.
pub type ConflictDecisions = FnvHashMap<String, ConflictChoice>;

#[derive(Debug, Default)]
pub struct DecisionCoordinator {
    pending: Mutex<FnvHashMap<ActionId, oneshot::Sender<Answer>>>,
}

impl DecisionCoordinator {
    pub fn new() -> Self {
        Default::default()
    }

    fn pending(&self) -> MutexGuard<'_, FnvHashMap<ActionId, oneshot::Sender<Answer>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a waiter. A previous waiter under the same id is replaced and
    /// settles as if the channel had closed.
    fn register(&self, id: ActionId) -> oneshot::Receiver<Answer> {
        let (sender, receiver) = oneshot::channel();
        let replaced = self.pending().insert(id.clone(), sender);
        if replaced.is_some() {
            warn!("Replacing pending action {}", id);
        }
        receiver
    }

    /// Drops entries nobody is waiting on any more.
    fn prune_abandoned(&self) {
        self.pending().retain(|_, sender| !sender.is_closed());
    }

    /// Asks the peer to delete a file.
    ///
    /// Without confirmation this only notifies the peer and returns `true`.
    /// With confirmation it waits for the user's answer; a disconnect before
    /// the answer arrives means "don't delete".
    pub async fn request_delete_decision<C>(&self, channel: &C, request: DeleteRequest) -> bool
    where
        C: PeerChannel + ?Sized,
    {
        if !request.require_confirmation {
            let notice = OutgoingMessage::FileDelete {
                file_names: vec![request.file_name.clone()],
                require_confirmation: None,
            };
            if let Err(e) = channel.send(notice) {
                warn!("Couldn't send delete notice for {}: {}", request.file_name, e);
            }
            return true;
        }

        let id = ActionId::Delete(request.file_name.clone());
        let answer = self.register(id.clone());
        let message = OutgoingMessage::FileDelete {
            file_names: vec![request.file_name],
            require_confirmation: Some(true),
        };
        if let Err(e) = channel.send(message) {
            warn!("Couldn't send {}: {}", id, e);
            drop(answer);
            self.prune_abandoned();
            return false;
        }

        debug!("Waiting for {}", id);
        match answer.await {
            Ok(Answer::Delete(confirmed)) => confirmed,
            Ok(other) => {
                warn!("Unexpected answer {:?} for {}", other, id);
                false
            }
            Err(_) => {
                info!("{} interrupted by disconnect, keeping the file", id);
                false
            }
        }
    }

    /// Asks the user to pick a side for each conflict.
    ///
    /// All waiters are registered before the single batched notification is
    /// sent, so the peer may answer them in any order. If the channel drops
    /// before every answer is in, nothing is returned and every conflict stays
    /// unresolved for this round.
    pub async fn request_conflict_decisions<C>(&self, channel: &C, conflicts: &[Conflict]) -> ConflictDecisions
    where
        C: PeerChannel + ?Sized,
    {
        if conflicts.is_empty() {
            return Default::default();
        }

        let waiting: Vec<(String, oneshot::Receiver<Answer>)> = conflicts
            .iter()
            .map(|conflict| {
                let file_name = conflict.file_name.clone();
                let answer = self.register(ActionId::Conflict(file_name.clone()));
                (file_name, answer)
            })
            .collect();

        let message = OutgoingMessage::ConflictsDetected {
            conflicts: conflicts.iter().map(ConflictSummary::from).collect(),
        };
        if let Err(e) = channel.send(message) {
            warn!("Couldn't send {} conflicts to the peer: {}", conflicts.len(), e);
            drop(waiting);
            self.prune_abandoned();
            return Default::default();
        }

        info!("Waiting for {} conflict decisions", waiting.len());
        let mut decisions = ConflictDecisions::default();
        let mut waiting = waiting.into_iter();
        while let Some((file_name, answer)) = waiting.next() {
            match answer.await {
                Ok(Answer::Conflict(choice)) => {
                    debug!("{} resolved as {:?}", file_name, choice);
                    decisions.insert(file_name, choice);
                }
                Ok(other) => warn!("Unexpected answer {:?} for conflict {}", other, file_name),
                Err(_) => {
                    info!("Conflict decisions interrupted by disconnect");
                    drop(waiting);
                    self.prune_abandoned();
                    return Default::default();
                }
            }
        }
        decisions
    }

    /// Fetches the peer's current version of every conflicting file. Returns
    /// no versions if the channel drops first, which leaves every conflict
    /// unresolved.
    pub async fn request_remote_versions<C>(&self, channel: &C, conflicts: &[Conflict]) -> Vec<RemoteVersionInfo>
    where
        C: PeerChannel + ?Sized,
    {
        if conflicts.is_empty() {
            return Vec::new();
        }

        let answer = self.register(ActionId::Versions);
        let message = OutgoingMessage::ConflictVersionRequest {
            conflicts: conflicts
                .iter()
                .map(|conflict| VersionQuery {
                    file_name: conflict.file_name.clone(),
                    last_synced_at: conflict.last_synced_at,
                })
                .collect(),
        };
        if let Err(e) = channel.send(message) {
            warn!("Couldn't send version request: {}", e);
            drop(answer);
            self.prune_abandoned();
            return Vec::new();
        }

        match answer.await {
            Ok(Answer::Versions(versions)) => versions,
            Ok(other) => {
                warn!("Unexpected answer {:?} for version request", other);
                Vec::new()
            }
            Err(_) => {
                info!("Version request interrupted by disconnect");
                Vec::new()
            }
        }
    }

    /// Resolves the pending action `id` with `answer`.
    ///
    /// Returns `false` for stale, duplicate or unsolicited answers; those are
    /// logged and otherwise ignored.
    pub fn handle_confirmation(&self, id: &ActionId, answer: Answer) -> bool {
        let sender = self.pending().remove(id);
        match sender {
            Some(sender) => {
                if sender.send(answer).is_err() {
                    debug!("Nobody is waiting for {} any more", id);
                    return false;
                }
                true
            }
            None => {
                warn!("Received answer for {} but nothing is pending, ignoring", id);
                false
            }
        }
    }

    /// Names of files with an outstanding conflict decision, sorted.
    pub fn pending_conflicts(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pending()
            .keys()
            .filter_map(|id| match *id {
                ActionId::Conflict(ref file_name) => Some(file_name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    pub fn is_pending(&self, id: &ActionId) -> bool {
        self.pending().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Cancels everything that is pending. Called when the channel closes.
    pub fn cleanup(&self) {
        let cancelled: Vec<(ActionId, oneshot::Sender<Answer>)> = self.pending().drain().collect();
        if !cancelled.is_empty() {
            info!("Cancelling {} pending actions", cancelled.len());
        }
        for (id, sender) in cancelled {
            trace!("Cancelling {}", id);
            drop(sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    use super::*;

    fn set_up() -> (
        Arc<DecisionCoordinator>,
        UnboundedSender<OutgoingMessage>,
        UnboundedReceiver<OutgoingMessage>,
    ) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(DecisionCoordinator::new()), tx, rx)
    }

    fn conflict(file_name: &str) -> Conflict {
        Conflict {
            file_name: file_name.to_owned(),
            local_content: Some("local".to_owned()),
            remote_content: None,
            local_modified_at: 1,
            remote_modified_at: 2,
            last_synced_at: Some(1),
            local_clean: Some(false),
        }
    }

    fn delete(file_name: &str, require_confirmation: bool) -> DeleteRequest {
        DeleteRequest {
            file_name: file_name.to_owned(),
            require_confirmation,
        }
    }

    #[test]
    fn test_action_ids() {
        assert_eq!(ActionId::Delete("a/B.tsx".to_owned()).to_string(), "delete:a/B.tsx");
        assert_eq!(ActionId::Conflict("B.tsx".to_owned()).to_string(), "conflict:B.tsx");
        assert_eq!(
            "conflict:B.tsx".parse::<ActionId>().unwrap(),
            ActionId::Conflict("B.tsx".to_owned())
        );
        assert_eq!("versions".parse::<ActionId>().unwrap(), ActionId::Versions);
        assert!("rename:B.tsx".parse::<ActionId>().is_err());
        assert!("delete:".parse::<ActionId>().is_err());
    }

    #[tokio::test]
    async fn test_delete_without_confirmation() {
        let (coordinator, tx, mut rx) = set_up();
        assert!(coordinator.request_delete_decision(&tx, delete("A.tsx", false)).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            OutgoingMessage::FileDelete {
                file_names: vec!["A.tsx".to_owned()],
                require_confirmation: None
            }
        );
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_confirmed_and_cancelled() {
        let (coordinator, tx, mut rx) = set_up();

        for confirmed in [true, false] {
            let request = {
                let coordinator = coordinator.clone();
                let tx = tx.clone();
                tokio::spawn(async move { coordinator.request_delete_decision(&tx, delete("A.tsx", true)).await })
            };
            assert_eq!(
                rx.recv().await.unwrap(),
                OutgoingMessage::FileDelete {
                    file_names: vec!["A.tsx".to_owned()],
                    require_confirmation: Some(true)
                }
            );
            let id = ActionId::Delete("A.tsx".to_owned());
            assert!(coordinator.is_pending(&id));
            assert!(coordinator.handle_confirmation(&id, Answer::Delete(confirmed)));
            assert_eq!(request.await.unwrap(), confirmed);
            assert_eq!(coordinator.pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_cleanup_settles_every_waiter() {
        let (coordinator, tx, mut rx) = set_up();

        let delete_request = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            tokio::spawn(async move { coordinator.request_delete_decision(&tx, delete("A.tsx", true)).await })
        };
        let conflict_request = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                coordinator
                    .request_conflict_decisions(&tx, &[conflict("B.tsx"), conflict("C.tsx")])
                    .await
            })
        };
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(coordinator.pending_count(), 3);

        // one answer arrives before the disconnect; it must not leak through
        coordinator.handle_confirmation(&ActionId::Conflict("C.tsx".to_owned()), Answer::Conflict(ConflictChoice::Local));
        coordinator.cleanup();

        assert_eq!(coordinator.pending_count(), 0);
        assert!(!delete_request.await.unwrap());
        assert!(conflict_request.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_conflicts_sends_nothing() {
        let (coordinator, tx, mut rx) = set_up();
        assert!(coordinator.request_conflict_decisions(&tx, &[]).await.is_empty());
        assert!(coordinator.request_remote_versions(&tx, &[]).await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_conflict_answers_in_any_order() {
        let (coordinator, tx, mut rx) = set_up();
        let request = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                coordinator
                    .request_conflict_decisions(&tx, &[conflict("A.tsx"), conflict("B.tsx")])
                    .await
            })
        };

        match rx.recv().await.unwrap() {
            OutgoingMessage::ConflictsDetected { conflicts } => {
                assert_eq!(conflicts.len(), 2);
                assert_eq!(conflicts[0].file_name, "A.tsx");
                assert_eq!(conflicts[0].remote_content, None);
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(coordinator.pending_conflicts(), vec!["A.tsx".to_owned(), "B.tsx".to_owned()]);

        assert!(coordinator.handle_confirmation(&ActionId::Conflict("B.tsx".to_owned()), Answer::Conflict(ConflictChoice::Remote)));
        assert!(coordinator.handle_confirmation(&ActionId::Conflict("A.tsx".to_owned()), Answer::Conflict(ConflictChoice::Local)));

        let decisions = request.await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions["A.tsx"], ConflictChoice::Local);
        assert_eq!(decisions["B.tsx"], ConflictChoice::Remote);
    }

    #[tokio::test]
    async fn test_remote_versions() {
        let (coordinator, tx, mut rx) = set_up();
        let request = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            tokio::spawn(async move { coordinator.request_remote_versions(&tx, &[conflict("A.tsx")]).await })
        };
        match rx.recv().await.unwrap() {
            OutgoingMessage::ConflictVersionRequest { conflicts } => {
                assert_eq!(
                    conflicts,
                    vec![VersionQuery {
                        file_name: "A.tsx".to_owned(),
                        last_synced_at: Some(1)
                    }]
                );
            }
            other => panic!("unexpected message {:?}", other),
        }
        let versions = vec![RemoteVersionInfo {
            file_name: "A.tsx".to_owned(),
            latest_remote_version_ms: Some(1),
        }];
        assert!(coordinator.handle_confirmation(&ActionId::Versions, Answer::Versions(versions.clone())));
        assert_eq!(request.await.unwrap(), versions);
    }

    #[tokio::test]
    async fn test_unsolicited_answer_is_ignored() {
        let (coordinator, _tx, _rx) = set_up();
        assert!(!coordinator.handle_confirmation(&ActionId::Delete("A.tsx".to_owned()), Answer::Delete(true)));
        assert!(!coordinator.handle_confirmation(&ActionId::Versions, Answer::Versions(Vec::new())));
    }

    #[tokio::test]
    async fn test_closed_channel_is_a_disconnect() {
        let (coordinator, tx, rx) = set_up();
        drop(rx);
        assert!(!coordinator.request_delete_decision(&tx, delete("A.tsx", true)).await);
        assert!(coordinator
            .request_conflict_decisions(&tx, &[conflict("A.tsx")])
            .await
            .is_empty());
        assert!(coordinator.request_remote_versions(&tx, &[conflict("A.tsx")]).await.is_empty());
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_last_registrant_wins() {
        let (coordinator, tx, mut rx) = set_up();
        let first = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            tokio::spawn(async move { coordinator.request_delete_decision(&tx, delete("A.tsx", true)).await })
        };
        rx.recv().await.unwrap();
        let second = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            tokio::spawn(async move { coordinator.request_delete_decision(&tx, delete("A.tsx", true)).await })
        };
        rx.recv().await.unwrap();

        assert!(!first.await.unwrap());
        assert!(coordinator.handle_confirmation(&ActionId::Delete("A.tsx".to_owned()), Answer::Delete(true)));
        assert!(second.await.unwrap());
    }
}
