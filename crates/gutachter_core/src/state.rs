//! crates/gutachter_core/src/state.rs
//!
//! The session state manager: the single source of truth for conversation
//! logs, document identifiers, subsection status, and PDF preview handles.
//! All mutation funnels through the operation set defined here; callers
//! never hand-roll map edits.
//!
//! Every mutator is a single synchronous critical section. Nothing
//! suspends while the lock is held, so interleaved async completions can
//! never observe a half-applied read-modify-write.

use crate::domain::{
    ContextKey, ConversationEntry, ConversationKey, PreviewHandle, StatusPatch, SubsectionStatus,
};
use crate::ports::{KeyValueStore, PortResult, PreviewRegistry};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Well-known storage key for the context-key → document-id map.
pub const DOCUMENT_IDS_KEY: &str = "gutachter.document_ids";
/// Well-known storage key for the conversation-key → message-log map.
pub const MESSAGES_KEY: &str = "gutachter.messages";

const PERSIST_VERSION: u32 = 1;

//=========================================================================================
// Persistence Envelope
//=========================================================================================

/// The serialized form of one persisted map. The version tag allows a
/// future migration; an unknown version is ignored, never fatal.
#[derive(Deserialize)]
struct PersistedMap<T> {
    version: u32,
    entries: HashMap<String, T>,
}

/// Borrowing counterpart of [`PersistedMap`] for write-through saves.
#[derive(Serialize)]
struct PersistedMapRef<'a, T> {
    version: u32,
    entries: &'a HashMap<String, T>,
}

fn rehydrate_map<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> HashMap<String, T> {
    let raw = match store.load(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            warn!("Failed to load persisted state '{}': {}", key, e);
            return HashMap::new();
        }
    };
    match serde_json::from_str::<PersistedMap<T>>(&raw) {
        Ok(persisted) if persisted.version == PERSIST_VERSION => persisted.entries,
        Ok(persisted) => {
            warn!(
                "Persisted state '{}' has unknown version {}; starting fresh",
                key, persisted.version
            );
            HashMap::new()
        }
        Err(e) => {
            warn!("Persisted state '{}' is corrupt ({}); starting fresh", key, e);
            HashMap::new()
        }
    }
}

//=========================================================================================
// The Session State Manager
//=========================================================================================

struct Inner {
    /// Context storage key → document id.
    document_ids: HashMap<String, String>,
    /// Conversation storage key → ordered message log.
    logs: HashMap<String, Vec<ConversationEntry>>,
    /// Conversation storage key → status flags. Authoritative; updated
    /// in the same critical section as every log append.
    status: HashMap<String, SubsectionStatus>,
    /// Document id → currently installed preview handle.
    previews: HashMap<String, PreviewHandle>,
    /// Document id → latest issued PDF fetch generation.
    pdf_generation: HashMap<String, u64>,
    /// Keyed re-entrancy guard for in-flight conversation starts.
    starts_in_flight: HashSet<String>,
}

/// Process-wide state for the life of the session. Constructed once at
/// startup (rehydrating the persisted maps), torn down via [`SessionState::reset`]
/// on logout or cache reset.
pub struct SessionState {
    inner: Mutex<Inner>,
    store: Arc<dyn KeyValueStore>,
    registry: Arc<dyn PreviewRegistry>,
}

impl SessionState {
    /// Creates the manager, rehydrating the document-id and message maps
    /// from the store. Subsection status is runtime-only and is re-derived
    /// here from the presence of a persisted log.
    pub fn new(store: Arc<dyn KeyValueStore>, registry: Arc<dyn PreviewRegistry>) -> Self {
        let document_ids: HashMap<String, String> = rehydrate_map(store.as_ref(), DOCUMENT_IDS_KEY);
        let logs: HashMap<String, Vec<ConversationEntry>> =
            rehydrate_map(store.as_ref(), MESSAGES_KEY);

        let mut status = HashMap::new();
        for (key, log) in &logs {
            if !log.is_empty() {
                status.insert(
                    key.clone(),
                    SubsectionStatus {
                        has_conversation: true,
                        approved: false,
                    },
                );
            }
        }
        debug!(
            "Session state rehydrated: {} document(s), {} conversation log(s)",
            document_ids.len(),
            logs.len()
        );

        Self {
            inner: Mutex::new(Inner {
                document_ids,
                logs,
                status,
                previews: HashMap::new(),
                pdf_generation: HashMap::new(),
                starts_in_flight: HashSet::new(),
            }),
            store,
            registry,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("session state lock poisoned")
    }

    // --- Conversation Logs ---

    /// Returns the log for the composite key, or an empty sequence if
    /// absent. No side effects.
    pub fn messages(&self, key: &ConversationKey) -> Vec<ConversationEntry> {
        let inner = self.lock();
        inner
            .logs
            .get(&key.storage_key())
            .cloned()
            .unwrap_or_default()
    }

    /// Appends to the log, creating it if absent. Order is preserved;
    /// `has_conversation` is flipped on in the same critical section, and
    /// the message map is written through to the store.
    pub fn append_message(&self, key: &ConversationKey, entry: ConversationEntry) {
        let mut inner = self.lock();
        let storage_key = key.storage_key();
        inner.logs.entry(storage_key.clone()).or_default().push(entry);
        inner
            .status
            .entry(storage_key)
            .or_default()
            .has_conversation = true;
        self.persist_logs(&inner);
    }

    // --- Document Identifiers ---

    pub fn document_id(&self, ctx: &ContextKey) -> Option<String> {
        self.lock().document_ids.get(&ctx.storage_key()).cloned()
    }

    pub fn set_document_id(&self, ctx: &ContextKey, document_id: impl Into<String>) {
        let mut inner = self.lock();
        inner
            .document_ids
            .insert(ctx.storage_key(), document_id.into());
        self.persist_document_ids(&inner);
    }

    /// Whether any context maps to this document id. Logs may only be
    /// created for registered documents; anything else would be
    /// unreachable garbage.
    pub fn is_known_document(&self, document_id: &str) -> bool {
        self.lock()
            .document_ids
            .values()
            .any(|id| id == document_id)
    }

    // --- Subsection Status ---

    pub fn status(&self, key: &ConversationKey) -> SubsectionStatus {
        self.lock()
            .status
            .get(&key.storage_key())
            .copied()
            .unwrap_or_default()
    }

    /// Merges a partial update into the status record. Fields left `None`
    /// keep their value; `has_conversation` never regresses to false.
    pub fn apply_status(&self, key: &ConversationKey, patch: StatusPatch) {
        let mut inner = self.lock();
        let status = inner.status.entry(key.storage_key()).or_default();
        if let Some(value) = patch.has_conversation {
            status.has_conversation = status.has_conversation || value;
        }
        if let Some(value) = patch.approved {
            status.approved = value;
        }
    }

    // --- PDF Previews ---

    /// Issues a new fetch generation for the document. The matching
    /// [`SessionState::complete_pdf_fetch`] only installs its result while its
    /// generation is still the latest one issued.
    pub fn begin_pdf_fetch(&self, document_id: &str) -> u64 {
        let mut inner = self.lock();
        let generation = inner
            .pdf_generation
            .entry(document_id.to_string())
            .or_insert(0);
        *generation += 1;
        *generation
    }

    /// Installs the fetched bytes as the document's preview, revoking the
    /// previously installed handle. A resolution whose generation is no
    /// longer current is stale: it is discarded silently and nothing is
    /// installed. Returns whether the resolution was installed.
    pub fn complete_pdf_fetch(
        &self,
        document_id: &str,
        generation: u64,
        bytes: &[u8],
    ) -> PortResult<bool> {
        let mut inner = self.lock();
        let current = inner
            .pdf_generation
            .get(document_id)
            .copied()
            .unwrap_or(0);
        if generation != current {
            debug!(
                "Discarding stale PDF resolution for {} (generation {} < {})",
                document_id, generation, current
            );
            return Ok(false);
        }

        let handle = self.registry.install(document_id, bytes)?;
        if let Some(previous) = inner.previews.insert(document_id.to_string(), handle.clone()) {
            if previous != handle {
                self.registry.revoke(&previous);
            }
        }
        Ok(true)
    }

    pub fn preview(&self, document_id: &str) -> Option<PreviewHandle> {
        self.lock().previews.get(document_id).cloned()
    }

    // --- Start Re-entrancy Guard ---

    /// Atomically claims the in-flight slot for a conversation start.
    /// Returns false while another start for the same key is pending.
    pub fn try_begin_start(&self, guard_key: &str) -> bool {
        self.lock().starts_in_flight.insert(guard_key.to_string())
    }

    pub fn finish_start(&self, guard_key: &str) {
        self.lock().starts_in_flight.remove(guard_key);
    }

    // --- Teardown ---

    /// Logout / cache reset: revokes every live preview, clears all maps,
    /// and persists the now-empty document-id and message maps.
    pub fn reset(&self) {
        let mut inner = self.lock();
        for handle in inner.previews.values() {
            self.registry.revoke(handle);
        }
        inner.previews.clear();
        inner.document_ids.clear();
        inner.logs.clear();
        inner.status.clear();
        inner.pdf_generation.clear();
        inner.starts_in_flight.clear();
        self.persist_document_ids(&inner);
        self.persist_logs(&inner);
    }

    // --- Write-through Persistence ---
    // Storage failures are logged and swallowed: in-memory state remains
    // authoritative for the current session.

    fn persist_document_ids(&self, inner: &Inner) {
        self.persist(DOCUMENT_IDS_KEY, &inner.document_ids);
    }

    fn persist_logs(&self, inner: &Inner) {
        self.persist(MESSAGES_KEY, &inner.logs);
    }

    fn persist<T: Serialize>(&self, key: &str, entries: &HashMap<String, T>) {
        let envelope = PersistedMapRef {
            version: PERSIST_VERSION,
            entries,
        };
        let serialized = match serde_json::to_string(&envelope) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Failed to serialize state for '{}': {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.save(key, &serialized) {
            warn!("Failed to persist state for '{}': {}", key, e);
        }
    }
}
