//! Affinity & completion ledger.
//!
//! The steady-state design is server-authoritative: the completion endpoint
//! returns the current affinity and the client ingests it as ground truth,
//! performing no local accumulation. The client-local ledger survives only
//! as the explicit guest/offline mode, where the `(story, character)`
//! completion mark is the idempotence key: re-reading a finished story never
//! credits affinity twice.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::client::ApiClient;
use crate::error::Error;
use crate::events::{ProgressEvent, ProgressEvents};
use crate::scene::CompletionSink;
use crate::store::{KeyValueStore, TokenStore};
use crate::types::{Affinity, CharacterId, StoryId};

/// Who computes affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// The server returns the authoritative value; the client never
    /// accumulates locally.
    ServerAuthoritative,
    /// Offline/guest fallback: the local ledger accumulates, clamped and
    /// idempotent per `(story, character)`.
    GuestLedger,
}

/// One character's ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffinityRecord {
    pub progress: Affinity,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

/// Owner of all affinity, completion and resume-pointer state.
///
/// Presentation code must go through this API; direct store writes would
/// bypass the idempotence check.
pub struct ProgressModel {
    mode: ProgressMode,
    store: Arc<dyn KeyValueStore>,
    /// Anonymous user id; namespaces guest data in the shared store.
    namespace: String,
    /// Last server-reported affinity per character (server mode only).
    server_values: RwLock<HashMap<CharacterId, Affinity>>,
    /// Serializes the guest completion path; the completion-mark check and
    /// the ledger write are separate store round-trips.
    completion_lock: Mutex<()>,
    events: ProgressEvents,
}

impl ProgressModel {
    #[must_use]
    pub fn new(mode: ProgressMode, tokens: &TokenStore) -> Self {
        Self {
            mode,
            store: tokens.raw(),
            namespace: tokens.anonymous_user_id(),
            server_values: RwLock::new(HashMap::new()),
            completion_lock: Mutex::new(()),
            events: ProgressEvents::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    #[must_use]
    pub fn events(&self) -> &ProgressEvents {
        &self.events
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Current clamped progress, defaulting to 0 for unknown characters.
    #[must_use]
    pub fn character_affinity(&self, character: &CharacterId) -> Affinity {
        match self.mode {
            ProgressMode::ServerAuthoritative => self
                .server_values
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(character)
                .copied()
                .unwrap_or_default(),
            ProgressMode::GuestLedger => self
                .load_ledger()
                .get(character)
                .map(|r| r.progress)
                .unwrap_or_default(),
        }
    }

    /// Ingest a server-reported affinity value as ground truth and advance
    /// the resume pointer. The server owns not double-crediting.
    pub fn record_server_affinity(
        &self,
        story: &StoryId,
        character: &CharacterId,
        affinity: Affinity,
    ) {
        self.server_values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(character.clone(), affinity);
        self.set_last_read(story);
        self.events.emit(ProgressEvent::AffinityChanged {
            character: character.clone(),
            progress: affinity,
        });
    }

    /// Guest-mode completion path.
    ///
    /// If `(story, character)` is already marked complete, the increment is
    /// silently dropped and the stored progress returned unchanged.
    /// Otherwise: add, clamp to `[0, 100]`, persist, mark complete, advance
    /// the resume pointer, broadcast the change. Concurrent calls for the
    /// same pair are serialized, so at most one of them credits.
    pub fn complete_story(
        &self,
        story: &StoryId,
        character: &CharacterId,
        increment: i64,
    ) -> Affinity {
        let _guard = self
            .completion_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let mut completed = self.load_completed();
        let mark = completion_mark(story, character);
        let mut ledger = self.load_ledger();

        if completed.contains(&mark) {
            return ledger
                .get(character)
                .map(|r| r.progress)
                .unwrap_or_default();
        }

        let current = ledger
            .get(character)
            .map(|r| r.progress)
            .unwrap_or_default();
        let next = current.increased_by(increment);
        ledger.insert(
            character.clone(),
            AffinityRecord {
                progress: next,
                last_updated: OffsetDateTime::now_utc(),
            },
        );
        self.save_ledger(&ledger);

        completed.insert(mark);
        self.save_completed(&completed);
        self.set_last_read(story);

        self.events.emit(ProgressEvent::AffinityChanged {
            character: character.clone(),
            progress: next,
        });
        next
    }

    /// Whether `(story, character)` has been completed in the guest ledger.
    #[must_use]
    pub fn is_completed(&self, story: &StoryId, character: &CharacterId) -> bool {
        self.load_completed()
            .contains(&completion_mark(story, character))
    }

    /// The resume pointer: last story the user engaged with, if any.
    #[must_use]
    pub fn last_read_story(&self) -> Option<StoryId> {
        self.store.get(&self.last_read_key()).map(StoryId::new)
    }

    /// Re-broadcasts progress events when another context rewrites the
    /// shared store. Hosts spawn this for the app's lifetime; dropping the
    /// future unsubscribes. Backing stores that report same-context writes
    /// (like [`crate::MemoryStore`]) will produce duplicate notifications
    /// for this context's own mutations, which subscribers must tolerate.
    pub async fn watch_store_changes(&self) {
        let mut changes = self.store.changes();
        let ledger_key = self.ledger_key();
        let last_read_key = self.last_read_key();
        loop {
            match changes.recv().await {
                Ok(change) if change.key == ledger_key => {
                    let Some(value) = change.value else { continue };
                    match serde_json::from_str::<HashMap<CharacterId, AffinityRecord>>(&value) {
                        Ok(ledger) => {
                            for (character, record) in ledger {
                                self.events.emit(ProgressEvent::AffinityChanged {
                                    character,
                                    progress: record.progress,
                                });
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring malformed ledger write");
                        }
                    }
                }
                Ok(change) if change.key == last_read_key => {
                    if let Some(value) = change.value {
                        self.events.emit(ProgressEvent::LastReadChanged {
                            story: StoryId::new(value),
                        });
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    // ── Persistence ────────────────────────────────────────────────────

    fn ledger_key(&self) -> String {
        format!("affinity:{}", self.namespace)
    }

    fn completed_key(&self) -> String {
        format!("completed_stories:{}", self.namespace)
    }

    fn last_read_key(&self) -> String {
        format!("last_read_story:{}", self.namespace)
    }

    fn load_ledger(&self) -> HashMap<CharacterId, AffinityRecord> {
        self.load_json(&self.ledger_key())
    }

    fn save_ledger(&self, ledger: &HashMap<CharacterId, AffinityRecord>) {
        self.save_json(&self.ledger_key(), ledger);
    }

    fn load_completed(&self) -> HashSet<String> {
        self.load_json(&self.completed_key())
    }

    fn save_completed(&self, completed: &HashSet<String>) {
        self.save_json(&self.completed_key(), completed);
    }

    fn set_last_read(&self, story: &StoryId) {
        self.store.set(&self.last_read_key(), story.as_str());
        self.events.emit(ProgressEvent::LastReadChanged {
            story: story.clone(),
        });
    }

    fn load_json<T: Default + serde::de::DeserializeOwned>(&self, key: &str) -> T {
        let Some(raw) = self.store.get(key) else {
            return T::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "discarding unreadable persisted value");
            T::default()
        })
    }

    fn save_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, &raw),
            Err(e) => tracing::warn!(key, error = %e, "failed to persist value"),
        }
    }
}

fn completion_mark(story: &StoryId, character: &CharacterId) -> String {
    format!("{story}::{character}")
}

/// Guest-mode completion seam: credits the local ledger.
impl CompletionSink for ProgressModel {
    fn story_completed(
        &self,
        story: &StoryId,
        character: &CharacterId,
        reward: i64,
    ) -> impl Future<Output = Result<Affinity, Error>> + Send {
        let affinity = self.complete_story(story, character, reward);
        async move { Ok(affinity) }
    }
}

/// Server-authoritative completion seam: POSTs the completion and ingests
/// the returned affinity. The graph's local reward is ignored; the server
/// computes its own.
pub struct ServerCompletion {
    client: ApiClient,
    progress: Arc<ProgressModel>,
}

impl ServerCompletion {
    #[must_use]
    pub fn new(client: ApiClient, progress: Arc<ProgressModel>) -> Self {
        Self { client, progress }
    }
}

impl CompletionSink for ServerCompletion {
    fn story_completed(
        &self,
        story: &StoryId,
        character: &CharacterId,
        _reward: i64,
    ) -> impl Future<Output = Result<Affinity, Error>> + Send {
        async move {
            let result = self.client.complete_story(story, character).await?;
            self.progress
                .record_server_affinity(story, character, result.affinity);
            Ok(result.affinity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn guest_model() -> ProgressModel {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        ProgressModel::new(ProgressMode::GuestLedger, &tokens)
    }

    fn sid(s: &str) -> StoryId {
        StoryId::new(s)
    }

    fn cid(s: &str) -> CharacterId {
        CharacterId::new(s)
    }

    #[test]
    fn unknown_character_defaults_to_zero() {
        let model = guest_model();
        assert_eq!(model.character_affinity(&cid("c1")), Affinity::MIN);
    }

    #[test]
    fn completing_the_same_story_n_times_credits_once() {
        let model = guest_model();
        let first = model.complete_story(&sid("s1"), &cid("c1"), 20);
        assert_eq!(first.value(), 20);

        for _ in 0..5 {
            assert_eq!(model.complete_story(&sid("s1"), &cid("c1"), 20).value(), 20);
        }
        assert_eq!(model.character_affinity(&cid("c1")).value(), 20);
    }

    #[test]
    fn distinct_stories_accumulate_with_clamping() {
        let model = guest_model();
        model.complete_story(&sid("s1"), &cid("c1"), 60);
        let total = model.complete_story(&sid("s2"), &cid("c1"), 60);
        assert_eq!(total, Affinity::MAX);
        assert_eq!(model.character_affinity(&cid("c1")), Affinity::MAX);
    }

    #[test]
    fn same_story_different_characters_credit_independently() {
        let model = guest_model();
        model.complete_story(&sid("s1"), &cid("c1"), 20);
        model.complete_story(&sid("s1"), &cid("c2"), 30);
        assert_eq!(model.character_affinity(&cid("c1")).value(), 20);
        assert_eq!(model.character_affinity(&cid("c2")).value(), 30);
    }

    #[test]
    fn negative_increments_clamp_at_zero() {
        let model = guest_model();
        let result = model.complete_story(&sid("s1"), &cid("c1"), -50);
        assert_eq!(result, Affinity::MIN);
    }

    #[test]
    fn racing_completions_of_the_same_pair_credit_once() {
        let model = Arc::new(guest_model());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let model = Arc::clone(&model);
                std::thread::spawn(move || model.complete_story(&sid("s1"), &cid("c1"), 20))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().value(), 20);
        }
        assert_eq!(model.character_affinity(&cid("c1")).value(), 20);
        assert!(model.is_completed(&sid("s1"), &cid("c1")));
    }

    #[test]
    fn completion_advances_the_resume_pointer() {
        let model = guest_model();
        assert_eq!(model.last_read_story(), None);
        model.complete_story(&sid("s1"), &cid("c1"), 20);
        assert_eq!(model.last_read_story(), Some(sid("s1")));
        model.complete_story(&sid("s2"), &cid("c1"), 20);
        assert_eq!(model.last_read_story(), Some(sid("s2")));
    }

    #[test]
    fn guest_end_to_end_scenario() {
        // Fresh guest: never-read story reads 0, completes to 20, and a
        // re-read re-completion stays at 20.
        let model = guest_model();
        assert_eq!(model.character_affinity(&cid("c1")).value(), 0);
        assert_eq!(model.complete_story(&sid("s1"), &cid("c1"), 20).value(), 20);
        assert_eq!(model.complete_story(&sid("s1"), &cid("c1"), 20).value(), 20);
        assert_eq!(model.character_affinity(&cid("c1")).value(), 20);
    }

    #[test]
    fn ledger_persists_across_model_instances_sharing_a_store() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(store.clone());
        let model = ProgressModel::new(ProgressMode::GuestLedger, &tokens);
        model.complete_story(&sid("s1"), &cid("c1"), 20);
        drop(model);

        let reopened = ProgressModel::new(ProgressMode::GuestLedger, &TokenStore::new(store));
        assert_eq!(reopened.character_affinity(&cid("c1")).value(), 20);
        assert!(reopened.is_completed(&sid("s1"), &cid("c1")));
        // The completion mark survives too: no double credit after reopen.
        assert_eq!(
            reopened.complete_story(&sid("s1"), &cid("c1"), 20).value(),
            20
        );
    }

    #[tokio::test]
    async fn mutations_broadcast_change_events() {
        let model = guest_model();
        let mut rx = model.subscribe();

        model.complete_story(&sid("s1"), &cid("c1"), 20);

        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::LastReadChanged { story: sid("s1") }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::AffinityChanged {
                character: cid("c1"),
                progress: Affinity::clamped(20)
            }
        );
    }

    #[test]
    fn server_mode_ingests_reported_values_verbatim() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        let model = ProgressModel::new(ProgressMode::ServerAuthoritative, &tokens);

        model.record_server_affinity(&sid("s1"), &cid("c1"), Affinity::clamped(35));
        assert_eq!(model.character_affinity(&cid("c1")).value(), 35);
        assert_eq!(model.last_read_story(), Some(sid("s1")));

        // Re-reporting the same completion is naturally idempotent: the
        // value is replaced, not accumulated.
        model.record_server_affinity(&sid("s1"), &cid("c1"), Affinity::clamped(35));
        assert_eq!(model.character_affinity(&cid("c1")).value(), 35);
    }

    #[test]
    fn malformed_persisted_ledger_is_discarded() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(store.clone());
        let model = ProgressModel::new(ProgressMode::GuestLedger, &tokens);
        store.set(&model.ledger_key(), "not json");
        assert_eq!(model.character_affinity(&cid("c1")), Affinity::MIN);
    }

    #[tokio::test]
    async fn foreign_store_writes_are_rebroadcast() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(store.clone());
        let model = Arc::new(ProgressModel::new(ProgressMode::GuestLedger, &tokens));
        let mut rx = model.subscribe();

        let watcher = {
            let model = model.clone();
            tokio::spawn(async move { model.watch_store_changes().await })
        };
        // Let the watcher reach its subscription point before writing.
        tokio::task::yield_now().await;

        // Another context (tab) rewrites the ledger directly.
        let foreign = serde_json::json!({
            "c1": { "progress": 40, "lastUpdated": "2026-01-01T00:00:00Z" }
        });
        store.set(&model.ledger_key(), &foreign.to_string());

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("watcher should re-emit within the timeout")
            .unwrap();
        assert_eq!(
            event,
            ProgressEvent::AffinityChanged {
                character: cid("c1"),
                progress: Affinity::clamped(40)
            }
        );
        watcher.abort();
    }
}
