//! Keeps a [`HighlightStore`] in step with the server.
//!
//! Every call awaits the network once and then updates the store; there are
//! no retries. Failures are logged and queued as [`Notice`]s for the reader.

use crate::client::{ApiClient, ClientError};
use crate::dictionary::LookupState;
use crate::highlight::{Highlight, HighlightDraft, NotePatch, normalize_note};
use crate::store::HighlightStore;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    FetchFailed,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
    LookupFailed,
}

/// A failure the reader should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.kind {
            NoticeKind::FetchFailed => "Failed to load highlights",
            NoticeKind::CreateFailed => "Highlight saved locally only",
            NoticeKind::UpdateFailed => "Failed to update note",
            NoticeKind::DeleteFailed => "Failed to delete highlight",
            NoticeKind::LookupFailed => "Dictionary lookup failed",
        };
        write!(f, "{action}: {}", self.message)
    }
}

/// What `create` ended up storing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The server's record, with its id.
    Confirmed(Highlight),
    /// The server could not be reached or failed; the record lives only here.
    Optimistic(Highlight),
}

impl CreateOutcome {
    pub fn highlight(&self) -> &Highlight {
        match self {
            CreateOutcome::Confirmed(highlight) | CreateOutcome::Optimistic(highlight) => highlight,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, CreateOutcome::Confirmed(_))
    }
}

/// Server-backed records change only after the server confirms. Records
/// that never reached the server (`local-` ids) are the exception: their note
/// edits and deletes apply to the store directly.
pub struct HighlightSync {
    client: ApiClient,
    store: HighlightStore,
    lookup: LookupState,
    notices: Vec<Notice>,
}

impl HighlightSync {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            store: HighlightStore::new(),
            lookup: LookupState::new(),
            notices: Vec::new(),
        }
    }

    pub fn store(&self) -> &HighlightStore {
        &self.store
    }

    pub fn lookup_state(&self) -> &LookupState {
        &self.lookup
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Records that never reached the server.
    pub fn pending_local(&self) -> impl Iterator<Item = &Highlight> + '_ {
        self.store.iter().filter(|highlight| highlight.is_local())
    }

    /// Replaces the store with the server's collection. On failure the store
    /// keeps its current contents.
    pub async fn fetch_all(&mut self) -> bool {
        match self.client.list().await {
            Ok(highlights) => {
                info!(count = highlights.len(), "loaded highlights");
                self.store.replace_all(highlights);
                true
            }
            Err(err) => {
                self.report(NoticeKind::FetchFailed, &err);
                false
            }
        }
    }

    /// Saves `draft`. Invalid drafts are refused with a notice; any server
    /// or network failure keeps an optimistic local record instead.
    pub async fn create(&mut self, draft: HighlightDraft) -> Option<CreateOutcome> {
        if let Err(err) = draft.validate() {
            warn!(error = %err, "refusing invalid highlight");
            self.notices.push(Notice {
                kind: NoticeKind::CreateFailed,
                message: err.to_string(),
            });
            return None;
        }
        let outcome = match self.client.create(&draft).await {
            Ok(saved) => CreateOutcome::Confirmed(saved),
            Err(err) => {
                self.report(NoticeKind::CreateFailed, &err);
                CreateOutcome::Optimistic(draft.optimistic())
            }
        };
        self.store.add_or_ignore(outcome.highlight().clone());
        Some(outcome)
    }

    /// Sets the note of `id`. Local-only records are edited in place; others
    /// change only once the server accepts the update.
    pub async fn update_note(&mut self, id: &str, note: Option<String>) -> bool {
        if self.is_local_only(id) {
            return self.store.update_note(id, normalize_note(note));
        }
        match self.client.update_note(id, &NotePatch::set(note)).await {
            Ok(saved) => self.store.update_note(&saved.id, saved.note),
            Err(err) => {
                self.report(NoticeKind::UpdateFailed, &err);
                false
            }
        }
    }

    /// Deletes `id`. The entry stays when the server refuses; local-only
    /// records are dropped without a request.
    pub async fn delete(&mut self, id: &str) -> bool {
        if self.is_local_only(id) {
            return self.store.remove(id);
        }
        match self.client.delete(id).await {
            Ok(_) => self.store.remove(id),
            Err(err) => {
                self.report(NoticeKind::DeleteFailed, &err);
                false
            }
        }
    }

    /// Looks `word` up, tracking progress in [`Self::lookup_state`].
    pub async fn look_up(&mut self, word: &str) -> bool {
        self.lookup.begin(word.trim());
        match self.client.lookup(word.trim()).await {
            Ok(entry) => {
                self.lookup.succeed(entry);
                true
            }
            Err(err) => {
                self.lookup.fail(err.user_message());
                self.report(NoticeKind::LookupFailed, &err);
                false
            }
        }
    }

    fn is_local_only(&self, id: &str) -> bool {
        self.store.get(id).is_some_and(Highlight::is_local)
    }

    fn report(&mut self, kind: NoticeKind, err: &ClientError) {
        warn!(error = %err, ?kind, "highlight sync failed");
        self.notices.push(Notice {
            kind,
            message: err.user_message().to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;
    use std::time::Duration;

    fn offline() -> HighlightSync {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = ApiClient::new(format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();
        HighlightSync::new(client)
    }

    #[tokio::test]
    async fn create_falls_back_to_an_optimistic_record() {
        let mut sync = offline();
        let draft = HighlightDraft::new("biodiversity").with_position(Some(Span::new(1, 160, 172)));
        let outcome = sync.create(draft).await.unwrap();
        assert!(!outcome.is_confirmed());
        assert!(outcome.highlight().is_local());
        assert_eq!(sync.store().len(), 1);
        assert_eq!(sync.pending_local().count(), 1);
        assert_eq!(sync.notices().len(), 1);
        assert_eq!(sync.notices()[0].kind, NoticeKind::CreateFailed);
    }

    #[tokio::test]
    async fn invalid_drafts_are_refused_locally() {
        let mut sync = offline();
        assert!(sync.create(HighlightDraft::new(" ")).await.is_none());
        assert!(sync.store().is_empty());
        assert_eq!(sync.take_notices().len(), 1);
        assert!(sync.notices().is_empty());
    }

    #[tokio::test]
    async fn local_records_are_edited_without_the_server() {
        let mut sync = offline();
        let outcome = sync.create(HighlightDraft::new("equity")).await.unwrap();
        let id = outcome.highlight().id.clone();
        sync.take_notices();

        assert!(sync.update_note(&id, Some("fairness".into())).await);
        assert_eq!(sync.store().get(&id).unwrap().note.as_deref(), Some("fairness"));
        assert!(sync.delete(&id).await);
        assert!(sync.store().is_empty());
        assert!(sync.notices().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_the_store() {
        let mut sync = offline();
        sync.create(HighlightDraft::new("pillars")).await;
        sync.take_notices();
        assert!(!sync.fetch_all().await);
        assert_eq!(sync.store().len(), 1);
        assert_eq!(sync.notices()[0].kind, NoticeKind::FetchFailed);
    }

    #[tokio::test]
    async fn failed_remote_update_and_delete_leave_state() {
        let mut sync = offline();
        let remote = HighlightDraft::new("footprint").into_highlight(
            "65f0c0ffee0000000000abcd".to_string(),
            chrono::Utc::now(),
        );
        sync.store.add_or_ignore(remote.clone());

        assert!(!sync.update_note(&remote.id, Some("note".into())).await);
        assert!(!sync.delete(&remote.id).await);
        assert_eq!(sync.store().get(&remote.id), Some(&remote));
        let kinds: Vec<_> = sync.notices().iter().map(|n| n.kind).collect();
        assert_eq!(kinds, [NoticeKind::UpdateFailed, NoticeKind::DeleteFailed]);
    }

    #[tokio::test]
    async fn failed_lookup_marks_state_failed() {
        let mut sync = offline();
        assert!(!sync.look_up("equity").await);
        assert_eq!(sync.lookup_state().status, crate::dictionary::LookupStatus::Failed);
        assert_eq!(sync.lookup_state().word, "equity");
    }

    #[cfg(feature = "web")]
    mod against_server {
        use super::*;
        use crate::dictionary::{DictionaryProxy, LookupStatus};
        use crate::repository::HighlightRepository;
        use crate::web::{AppState, build_router};

        async fn connected() -> (HighlightSync, HighlightRepository) {
            let repository = HighlightRepository::ephemeral();
            let state = AppState::new(
                repository.clone(),
                DictionaryProxy::new("http://127.0.0.1:9", 0).unwrap(),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, build_router(state)).await.unwrap();
            });
            let client =
                ApiClient::new(format!("http://{addr}/api"), Duration::from_secs(5)).unwrap();
            (HighlightSync::new(client), repository)
        }

        #[tokio::test]
        async fn created_records_carry_server_ids() {
            let (mut sync, repository) = connected().await;
            let outcome = sync
                .create(HighlightDraft::new("sustainability").with_note("key term"))
                .await
                .unwrap();
            assert!(outcome.is_confirmed());
            let id = outcome.highlight().id.clone();
            assert_eq!(repository.get(&id).as_ref(), Some(outcome.highlight()));
            assert_eq!(sync.pending_local().count(), 0);
            assert!(sync.notices().is_empty());
        }

        #[tokio::test]
        async fn fetch_replaces_with_server_state() {
            let (mut sync, repository) = connected().await;
            repository.insert(HighlightDraft::new("one")).unwrap();
            repository.insert(HighlightDraft::new("two")).unwrap();
            assert!(sync.fetch_all().await);
            let texts: Vec<_> = sync.store().iter().map(|h| h.text.as_str()).collect();
            assert_eq!(texts, ["one", "two"]);
        }

        #[tokio::test]
        async fn note_updates_and_deletes_round_trip() {
            let (mut sync, repository) = connected().await;
            let id = sync
                .create(HighlightDraft::new("equity"))
                .await
                .unwrap()
                .highlight()
                .id
                .clone();

            assert!(sync.update_note(&id, Some("fair treatment".into())).await);
            assert_eq!(
                repository.get(&id).and_then(|h| h.note),
                Some("fair treatment".to_string())
            );
            assert_eq!(
                sync.store().get(&id).and_then(|h| h.note.as_deref()),
                Some("fair treatment")
            );

            assert!(sync.update_note(&id, None).await);
            assert!(!sync.store().get(&id).unwrap().has_note());

            assert!(sync.delete(&id).await);
            assert!(sync.store().is_empty());
            assert!(repository.is_empty());
        }

        #[tokio::test]
        async fn deleting_an_unknown_remote_id_keeps_the_entry() {
            let (mut sync, _repository) = connected().await;
            let ghost = HighlightDraft::new("ghost")
                .into_highlight("65f0c0ffee0000000000ffff".to_string(), chrono::Utc::now());
            sync.store.add_or_ignore(ghost.clone());
            assert!(!sync.delete(&ghost.id).await);
            assert!(sync.store().contains(&ghost.id));
            assert_eq!(sync.notices()[0].message, "Highlight not found");
        }

        #[tokio::test]
        async fn unreachable_dictionary_reports_server_error() {
            let (mut sync, _repository) = connected().await;
            assert!(!sync.look_up("equity").await);
            assert_eq!(sync.lookup_state().status, LookupStatus::Failed);
            assert_eq!(sync.lookup_state().error.as_deref(), Some("Server error"));
        }
    }
}
