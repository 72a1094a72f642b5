//! crates/gutachter_core/src/ops.rs
//!
//! The remote sync operations: each one is an asynchronous unit of work
//! with a pre-condition check, a single network call (or an upload/fetch
//! pair), a success path that mutates the session state, and a failure
//! path that surfaces a user-visible message without corrupting state.

use crate::domain::{
    ContextKey, ConversationEntry, ConversationKey, CoverPageField, StatusPatch, UploadedFile,
};
use crate::ports::{
    ConversationService, CoverPageService, DocumentRenderService, FilePayload, PortError,
};
use crate::state::SessionState;
use crate::uploads::{UploadCoordinator, UploadError, UploadValidationError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Appended as an assistant entry when a reply call fails. The user's
/// optimistic entry is never rolled back; no automatic retry.
const REPLY_FAILURE_MESSAGE: &str =
    "Es gab leider ein Problem bei der Verarbeitung Ihrer Nachricht. Bitte versuchen Sie es erneut.";

//=========================================================================================
// Operation Errors
//=========================================================================================

/// Failure of a single sync operation. `user_message` yields the short
/// localized text the shell renders; diagnostic detail goes to the log.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("message is empty after trimming")]
    EmptyMessage,
    #[error("no document is registered for this context")]
    MissingDocument,
    #[error("a conversation start is already in flight for this key")]
    StartInProgress,
    #[error(transparent)]
    Validation(#[from] UploadValidationError),
    #[error(transparent)]
    Port(#[from] PortError),
}

impl OpError {
    pub fn user_message(&self) -> String {
        match self {
            OpError::EmptyMessage => "Bitte geben Sie eine Nachricht ein.".to_string(),
            OpError::MissingDocument => {
                "Für diesen Abschnitt wurde noch kein Dokument angelegt.".to_string()
            }
            OpError::StartInProgress => {
                "Die Konversation wird bereits gestartet, einen Moment bitte.".to_string()
            }
            OpError::Validation(e) => e.to_string(),
            OpError::Port(_) => {
                "Es gab leider ein Problem. Bitte versuchen Sie es erneut.".to_string()
            }
        }
    }
}

impl From<UploadError> for OpError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::Validation(e) => OpError::Validation(e),
            UploadError::Port(e) => OpError::Port(e),
        }
    }
}

/// What a `start_conversation` call did.
#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A start call was issued and the log was seeded.
    Started,
    /// A conversation already exists for this key; nothing was sent.
    AlreadyActive,
}

//=========================================================================================
// The Operation Set
//=========================================================================================

/// Bridges the session state manager to the backend's conversation,
/// render, cover-page and upload endpoints.
pub struct Assistant {
    conversation: Arc<dyn ConversationService>,
    renderer: Arc<dyn DocumentRenderService>,
    cover_pages: Arc<dyn CoverPageService>,
    uploads: Arc<UploadCoordinator>,
    state: Arc<SessionState>,
}

impl Assistant {
    pub fn new(
        conversation: Arc<dyn ConversationService>,
        renderer: Arc<dyn DocumentRenderService>,
        cover_pages: Arc<dyn CoverPageService>,
        uploads: Arc<UploadCoordinator>,
        state: Arc<SessionState>,
    ) -> Self {
        Self {
            conversation,
            renderer,
            cover_pages,
            uploads,
            state,
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    // --- Conversation ---

    /// Starts the conversation for one subsection. The composite key is
    /// guarded: a second start while the first is in flight issues no
    /// network call. On failure no document id is stored, so a retry
    /// stays possible.
    pub async fn start_conversation(
        &self,
        ctx: &ContextKey,
        section: &str,
        subsection: &str,
    ) -> Result<StartOutcome, OpError> {
        if let Some(document_id) = self.state.document_id(ctx) {
            let key = ConversationKey::new(document_id, section, subsection);
            if self.state.status(&key).has_conversation {
                return Ok(StartOutcome::AlreadyActive);
            }
        }

        let guard_key = format!("{}/{}/{}", ctx.storage_key(), section, subsection);
        if !self.state.try_begin_start(&guard_key) {
            return Err(OpError::StartInProgress);
        }
        let result = self.start_inner(ctx, section, subsection).await;
        self.state.finish_start(&guard_key);
        result
    }

    async fn start_inner(
        &self,
        ctx: &ContextKey,
        section: &str,
        subsection: &str,
    ) -> Result<StartOutcome, OpError> {
        let document_id = self
            .state
            .document_id(ctx)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let seed = self
            .conversation
            .start(&document_id, ctx.topic)
            .await
            .map_err(|e| {
                error!(
                    "Failed to start conversation for {}/{}/{}: {}",
                    ctx.storage_key(),
                    section,
                    subsection,
                    e
                );
                OpError::from(e)
            })?;

        // The document id is registered only after a successful start.
        self.state.set_document_id(ctx, &document_id);
        let key = ConversationKey::new(&document_id, section, subsection);
        self.state
            .append_message(&key, ConversationEntry::assistant(seed));
        info!(
            "Conversation started for {}/{}/{}",
            ctx.storage_key(),
            section,
            subsection
        );

        // Best effort: a failed render never fails the start.
        if let Err(e) = self.refresh_pdf(&document_id).await {
            warn!("PDF refresh after conversation start failed: {}", e);
        }
        Ok(StartOutcome::Started)
    }

    /// Sends one user message. The user entry is appended optimistically
    /// before the network call; a failed reply appends the standing
    /// apology instead of rolling it back.
    pub async fn send_message(&self, key: &ConversationKey, text: &str) -> Result<(), OpError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(OpError::EmptyMessage);
        }
        if !self.state.is_known_document(&key.document_id) {
            return Err(OpError::MissingDocument);
        }

        self.state
            .append_message(key, ConversationEntry::user(trimmed));

        match self.conversation.reply(&key.document_id, trimmed).await {
            Ok(answer) => {
                self.state
                    .append_message(key, ConversationEntry::assistant(answer));
                if let Err(e) = self.refresh_pdf(&key.document_id).await {
                    warn!("PDF refresh after reply failed: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                error!("Reply failed for document {}: {}", key.document_id, e);
                self.state
                    .append_message(key, ConversationEntry::assistant(REPLY_FAILURE_MESSAGE));
                Ok(())
            }
        }
    }

    /// Persists edited subsection content. `approve = false` is the
    /// "save only" path; `approve = true` additionally flips the
    /// approval flag, closing the editing affordance.
    pub async fn save_subsection(
        &self,
        key: &ConversationKey,
        content: &str,
        approve: bool,
    ) -> Result<(), OpError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(OpError::EmptyMessage);
        }
        if !self.state.is_known_document(&key.document_id) {
            return Err(OpError::MissingDocument);
        }

        // Edited content travels through the reply endpoint; the backend
        // owns how it is incorporated into the document.
        self.conversation
            .reply(&key.document_id, trimmed)
            .await
            .map_err(|e| {
                error!(
                    "Saving subsection content failed for {}: {}",
                    key.storage_key(),
                    e
                );
                OpError::from(e)
            })?;

        if approve {
            self.state.apply_status(key, StatusPatch::approved(true));
        }
        if let Err(e) = self.refresh_pdf(&key.document_id).await {
            warn!("PDF refresh after save failed: {}", e);
        }
        Ok(())
    }

    // --- Uploads ---

    /// Chat-attachment flow: validates against the chat ceiling, uploads,
    /// and records the attachment as a conversation entry.
    pub async fn attach_file(
        &self,
        key: &ConversationKey,
        payload: &FilePayload,
        message: Option<&str>,
    ) -> Result<UploadedFile, OpError> {
        if !self.state.is_known_document(&key.document_id) {
            return Err(OpError::MissingDocument);
        }

        let uploaded = self
            .uploads
            .upload_with_message(&key.document_id, payload, message)
            .await?;

        self.state
            .append_message(key, ConversationEntry::file_attachment(&payload.file_name));
        if let Some(text) = message.map(str::trim).filter(|t| !t.is_empty()) {
            self.state.append_message(key, ConversationEntry::user(text));
        }

        if let Err(e) = self.refresh_pdf(&key.document_id).await {
            warn!("PDF refresh after attachment failed: {}", e);
        }
        Ok(uploaded)
    }

    /// File-manager flow: validates against the document ceiling. The PDF
    /// refresh is only triggered when the caller asks for it.
    pub async fn upload_document_file(
        &self,
        document_id: &str,
        payload: &FilePayload,
        section: Option<&str>,
        subsection: Option<&str>,
        refresh_pdf: bool,
    ) -> Result<UploadedFile, OpError> {
        if !self.state.is_known_document(document_id) {
            return Err(OpError::MissingDocument);
        }

        let uploaded = self
            .uploads
            .upload_to_document(document_id, payload, section, subsection)
            .await?;

        if refresh_pdf {
            if let Err(e) = self.refresh_pdf(document_id).await {
                warn!("PDF refresh after upload failed: {}", e);
            }
        }
        Ok(uploaded)
    }

    // --- PDF ---

    /// Fetches the rendered PDF and installs it as the document's
    /// preview. Returns whether the resolution was installed; `false`
    /// means a newer fetch was issued meanwhile and this one was
    /// discarded as stale.
    pub async fn refresh_pdf(&self, document_id: &str) -> Result<bool, OpError> {
        let generation = self.state.begin_pdf_fetch(document_id);
        let bytes = self.renderer.fetch_pdf(document_id).await?;
        Ok(self.state.complete_pdf_fetch(document_id, generation, &bytes)?)
    }

    /// Fetches the download rendition. The caller writes the bytes to
    /// their destination and holds no transient resource afterwards.
    pub async fn download_pdf(&self, document_id: &str) -> Result<Vec<u8>, OpError> {
        Ok(self.renderer.fetch_download(document_id).await?)
    }

    // --- Cover Page ---

    pub async fn cover_page_structure(
        &self,
        document_id: &str,
    ) -> Result<Vec<CoverPageField>, OpError> {
        Ok(self.cover_pages.structure(document_id).await?)
    }

    pub async fn cover_page_data(
        &self,
        document_id: &str,
    ) -> Result<BTreeMap<String, String>, OpError> {
        Ok(self.cover_pages.data(document_id).await?)
    }

    pub async fn save_cover_page_data(
        &self,
        document_id: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), OpError> {
        Ok(self.cover_pages.update_data(document_id, data).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, Topic};
    use crate::test_support::{
        CountingRegistry, MemoryStore, ScriptedConversation, ScriptedCoverPages, ScriptedFiles,
        ScriptedRenderer,
    };
    use crate::uploads::UploadLimits;

    struct Harness {
        conversation: Arc<ScriptedConversation>,
        renderer: Arc<ScriptedRenderer>,
        files: Arc<ScriptedFiles>,
        registry: Arc<CountingRegistry>,
        assistant: Arc<Assistant>,
    }

    fn harness() -> Harness {
        let conversation = Arc::new(ScriptedConversation::default());
        let renderer = Arc::new(ScriptedRenderer::default());
        let files = Arc::new(ScriptedFiles::default());
        let cover_pages = Arc::new(ScriptedCoverPages::default());
        let registry = Arc::new(CountingRegistry::default());
        let state = Arc::new(SessionState::new(
            Arc::new(MemoryStore::default()),
            registry.clone(),
        ));
        let uploads = Arc::new(UploadCoordinator::new(
            files.clone(),
            UploadLimits::default(),
        ));
        let assistant = Arc::new(Assistant::new(
            conversation.clone(),
            renderer.clone(),
            cover_pages,
            uploads,
            state,
        ));
        Harness {
            conversation,
            renderer,
            files,
            registry,
            assistant,
        }
    }

    fn ctx() -> ContextKey {
        ContextKey::new("project-1", Topic::Baugrundgutachten)
    }

    async fn started_key(h: &Harness) -> ConversationKey {
        h.assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await
            .unwrap();
        let document_id = h.assistant.state().document_id(&ctx()).unwrap();
        ConversationKey::new(document_id, "geologie", "grundwasser")
    }

    #[tokio::test]
    async fn start_seeds_the_log_and_triggers_a_pdf_fetch() {
        let h = harness();
        h.conversation.set_start_message("Welcome");

        let outcome = h
            .assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        let document_id = h.assistant.state().document_id(&ctx()).unwrap();
        let key = ConversationKey::new(&document_id, "geologie", "grundwasser");
        let log = h.assistant.state().messages(&key);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, Role::Assistant);
        assert_eq!(log[0].content, "Welcome");

        assert_eq!(h.conversation.start_calls(), 1);
        assert_eq!(h.renderer.fetch_calls(), 1);
        assert!(h.assistant.state().preview(&document_id).is_some());
    }

    #[tokio::test]
    async fn a_second_start_for_the_same_key_is_a_no_op() {
        let h = harness();
        h.assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await
            .unwrap();
        let outcome = h
            .assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyActive);
        assert_eq!(h.conversation.start_calls(), 1);
    }

    #[tokio::test]
    async fn starting_a_second_subsection_reuses_the_document_id() {
        let h = harness();
        h.assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await
            .unwrap();
        let first_id = h.assistant.state().document_id(&ctx()).unwrap();

        h.assistant
            .start_conversation(&ctx(), "geologie", "schichtenverzeichnis")
            .await
            .unwrap();
        assert_eq!(h.assistant.state().document_id(&ctx()).unwrap(), first_id);
        assert_eq!(h.conversation.start_calls(), 2);
    }

    #[tokio::test]
    async fn a_failed_start_stores_nothing_and_stays_retryable() {
        let h = harness();
        h.conversation.fail_next_start();

        let result = h
            .assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await;
        assert!(matches!(result, Err(OpError::Port(_))));
        assert!(h.assistant.state().document_id(&ctx()).is_none());
        assert_eq!(h.renderer.fetch_calls(), 0);

        // The guard was released and no state lingers: the retry succeeds.
        let outcome = h
            .assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(h.conversation.start_calls(), 2);
    }

    #[tokio::test]
    async fn rapid_duplicate_starts_issue_exactly_one_network_call() {
        let h = harness();
        h.conversation.gate_next_start();

        let assistant = h.assistant.clone();
        let first = tokio::spawn(async move {
            assistant
                .start_conversation(&ctx(), "geologie", "grundwasser")
                .await
        });
        // Let the first call claim the guard and park on the gated start.
        tokio::task::yield_now().await;

        let second = h
            .assistant
            .start_conversation(&ctx(), "geologie", "grundwasser")
            .await;
        assert!(matches!(second, Err(OpError::StartInProgress)));

        h.conversation.release_start_gate();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, StartOutcome::Started);
        assert_eq!(h.conversation.start_calls(), 1);
    }

    #[tokio::test]
    async fn send_appends_optimistically_and_then_the_reply() {
        let h = harness();
        h.conversation.set_start_message("Welcome");
        h.conversation.push_reply("Danke");
        let key = started_key(&h).await;

        // The mock records the log length it observes at reply time: the
        // optimistic user entry must already be visible.
        h.conversation.observe_log(h.assistant.state().clone(), key.clone());

        h.assistant
            .send_message(&key, "Standort ist Hamburg")
            .await
            .unwrap();

        let log = h.assistant.state().messages(&key);
        let contents: Vec<(Role, String)> =
            log.into_iter().map(|e| (e.role, e.content)).collect();
        assert_eq!(
            contents,
            vec![
                (Role::Assistant, "Welcome".to_string()),
                (Role::User, "Standort ist Hamburg".to_string()),
                (Role::Assistant, "Danke".to_string()),
            ]
        );

        let observed = h.conversation.observed_log();
        assert_eq!(observed.last().map(|e| e.role), Some(Role::User));
        assert_eq!(
            observed.last().map(|e| e.content.clone()),
            Some("Standort ist Hamburg".to_string())
        );
    }

    #[tokio::test]
    async fn a_failed_reply_keeps_the_user_entry_and_appends_the_apology() {
        let h = harness();
        let key = started_key(&h).await;
        let fetches_after_start = h.renderer.fetch_calls();
        h.conversation.fail_next_reply();

        h.assistant.send_message(&key, "Standort?").await.unwrap();

        let log = h.assistant.state().messages(&key);
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].role, Role::User);
        assert_eq!(log[1].content, "Standort?");
        assert_eq!(log[2].role, Role::Assistant);
        assert_eq!(log[2].content, REPLY_FAILURE_MESSAGE);
        // No reply, no render refresh.
        assert_eq!(h.renderer.fetch_calls(), fetches_after_start);
    }

    #[tokio::test]
    async fn empty_and_unknown_document_messages_are_rejected_locally() {
        let h = harness();
        let key = started_key(&h).await;

        let result = h.assistant.send_message(&key, "   ").await;
        assert!(matches!(result, Err(OpError::EmptyMessage)));

        let foreign = ConversationKey::new("unknown-doc", "geologie", "grundwasser");
        let result = h.assistant.send_message(&foreign, "hallo").await;
        assert!(matches!(result, Err(OpError::MissingDocument)));

        assert_eq!(h.conversation.reply_calls(), 0);
    }

    #[tokio::test]
    async fn save_only_keeps_approval_off_and_approve_flips_it() {
        let h = harness();
        h.conversation.push_reply("gespeichert");
        h.conversation.push_reply("gespeichert");
        let key = started_key(&h).await;

        h.assistant
            .save_subsection(&key, "Grundwasser bei 3,2 m", false)
            .await
            .unwrap();
        assert!(!h.assistant.state().status(&key).approved);

        h.assistant
            .save_subsection(&key, "Grundwasser bei 3,2 m", true)
            .await
            .unwrap();
        assert!(h.assistant.state().status(&key).approved);
    }

    #[tokio::test]
    async fn attach_file_records_the_attachment_in_the_log() {
        let h = harness();
        let key = started_key(&h).await;

        let payload = FilePayload {
            file_name: "schichten.pdf".to_string(),
            mime_type: Some("application/pdf".to_string()),
            bytes: vec![0u8; 2048],
        };
        h.assistant
            .attach_file(&key, &payload, Some("Bitte einarbeiten"))
            .await
            .unwrap();

        let log = h.assistant.state().messages(&key);
        assert_eq!(log.len(), 3);
        assert!(log[1].is_file_attachment);
        assert_eq!(log[1].file_name.as_deref(), Some("schichten.pdf"));
        assert_eq!(log[2].content, "Bitte einarbeiten");
        assert_eq!(h.files.upload_message_calls(), 1);
    }

    #[tokio::test]
    async fn download_returns_the_rendition_bytes() {
        let h = harness();
        let key = started_key(&h).await;

        let bytes = h.assistant.download_pdf(&key.document_id).await.unwrap();
        assert_eq!(bytes, b"download");
        assert_eq!(h.renderer.download_calls(), 1);
    }

    #[tokio::test]
    async fn cover_page_data_round_trips() {
        let h = harness();
        let key = started_key(&h).await;

        let structure = h
            .assistant
            .cover_page_structure(&key.document_id)
            .await
            .unwrap();
        assert!(!structure.is_empty());

        let mut data = h.assistant.cover_page_data(&key.document_id).await.unwrap();
        data.insert("projekt".to_string(), "Neubau Lagerhalle".to_string());
        h.assistant
            .save_cover_page_data(&key.document_id, &data)
            .await
            .unwrap();

        let reloaded = h.assistant.cover_page_data(&key.document_id).await.unwrap();
        assert_eq!(
            reloaded.get("projekt").map(String::as_str),
            Some("Neubau Lagerhalle")
        );
    }

    #[tokio::test]
    async fn stale_pdf_resolutions_lose_to_the_later_issue() {
        let h = harness();
        let key = started_key(&h).await;
        let document_id = key.document_id.clone();
        let installs_after_start = h.registry.install_count();

        // Two refreshes issued back-to-back; the second resolves first.
        h.renderer.gate_next_fetches(2);
        let first = {
            let assistant = h.assistant.clone();
            let document_id = document_id.clone();
            tokio::spawn(async move { assistant.refresh_pdf(&document_id).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let assistant = h.assistant.clone();
            let document_id = document_id.clone();
            tokio::spawn(async move { assistant.refresh_pdf(&document_id).await })
        };
        tokio::task::yield_now().await;

        h.renderer.release_fetch(1);
        tokio::task::yield_now().await;
        h.renderer.release_fetch(0);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(!first, "the earlier issue must be discarded as stale");
        assert!(second, "the later issue must win");
        assert_eq!(h.registry.install_count(), installs_after_start + 1);
    }
}
