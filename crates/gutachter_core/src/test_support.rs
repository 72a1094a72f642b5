//! crates/gutachter_core/src/test_support.rs
//!
//! Scripted doubles for the port traits, shared by the in-file test
//! modules. Counters record how often the network would have been hit;
//! gates (tokio `Notify`) let tests pin the resolution order of
//! interleaved in-flight calls.

use crate::domain::{
    ConversationEntry, ConversationKey, CoverPageField, CoverPageFieldKind, FileStatus,
    PreviewHandle, Topic, UploadedFile,
};
use crate::ports::{
    ConversationService, CoverPageService, DocumentRenderService, FilePayload,
    FileTransferService, KeyValueStore, PortError, PortResult, PreviewRegistry,
};
use crate::state::SessionState;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

//=========================================================================================
// Local Resource Doubles
//=========================================================================================

/// In-memory `KeyValueStore` with a switchable failure mode.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> PortResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("storage write refused".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// `PreviewRegistry` that hands out numbered handles and records revokes.
#[derive(Default)]
pub struct CountingRegistry {
    installs: AtomicUsize,
    revoked: Mutex<Vec<String>>,
}

impl CountingRegistry {
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

impl PreviewRegistry for CountingRegistry {
    fn install(&self, document_id: &str, _bytes: &[u8]) -> PortResult<PreviewHandle> {
        let n = self.installs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PreviewHandle::new(format!("{}#{}", document_id, n)))
    }

    fn revoke(&self, handle: &PreviewHandle) {
        self.revoked.lock().unwrap().push(handle.id.clone());
    }
}

//=========================================================================================
// Conversation Double
//=========================================================================================

type LogObserver = (Arc<SessionState>, ConversationKey);

#[derive(Default)]
pub struct ScriptedConversation {
    start_calls: AtomicUsize,
    reply_calls: AtomicUsize,
    start_message: Mutex<Option<String>>,
    replies: Mutex<VecDeque<String>>,
    fail_next_start: AtomicBool,
    fail_next_reply: AtomicBool,
    start_gate: Mutex<Option<Arc<Notify>>>,
    observer: Mutex<Option<LogObserver>>,
    observed: Mutex<Vec<ConversationEntry>>,
}

impl ScriptedConversation {
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn reply_calls(&self) -> usize {
        self.reply_calls.load(Ordering::SeqCst)
    }

    pub fn set_start_message(&self, message: &str) {
        *self.start_message.lock().unwrap() = Some(message.to_string());
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_reply(&self) {
        self.fail_next_reply.store(true, Ordering::SeqCst);
    }

    /// The next `start` call parks until [`ScriptedConversation::release_start_gate`].
    pub fn gate_next_start(&self) {
        *self.start_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release_start_gate(&self) {
        if let Some(gate) = self.start_gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    /// Snapshot the given log whenever `reply` is invoked, so tests can
    /// assert what the network call observed (e.g. the optimistic entry).
    pub fn observe_log(&self, state: Arc<SessionState>, key: ConversationKey) {
        *self.observer.lock().unwrap() = Some((state, key));
    }

    pub fn observed_log(&self) -> Vec<ConversationEntry> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationService for ScriptedConversation {
    async fn start(&self, _document_id: &str, _topic: Topic) -> PortResult<String> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(PortError::Transport("start refused".to_string()));
        }
        Ok(self
            .start_message
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "Willkommen".to_string()))
    }

    async fn reply(&self, _document_id: &str, _message: &str) -> PortResult<String> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((state, key)) = self.observer.lock().unwrap().clone() {
            *self.observed.lock().unwrap() = state.messages(&key);
        }
        if self.fail_next_reply.swap(false, Ordering::SeqCst) {
            return Err(PortError::Transport("reply refused".to_string()));
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Okay".to_string()))
    }
}

//=========================================================================================
// Render Double
//=========================================================================================

#[derive(Default)]
pub struct ScriptedRenderer {
    fetch_calls: AtomicUsize,
    download_calls: AtomicUsize,
    /// Gates consumed in call order; released individually by index.
    gate_queue: Mutex<VecDeque<Arc<Notify>>>,
    gates: Mutex<Vec<Arc<Notify>>>,
}

impl ScriptedRenderer {
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// The next `count` fetches each park on their own gate.
    pub fn gate_next_fetches(&self, count: usize) {
        let mut queue = self.gate_queue.lock().unwrap();
        let mut gates = self.gates.lock().unwrap();
        for _ in 0..count {
            let gate = Arc::new(Notify::new());
            queue.push_back(gate.clone());
            gates.push(gate);
        }
    }

    /// Releases the gated fetch with the given issue index.
    pub fn release_fetch(&self, index: usize) {
        self.gates.lock().unwrap()[index].notify_one();
    }
}

#[async_trait]
impl DocumentRenderService for ScriptedRenderer {
    async fn fetch_pdf(&self, _document_id: &str) -> PortResult<Vec<u8>> {
        let n = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.gate_queue.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(format!("pdf-{}", n).into_bytes())
    }

    async fn fetch_download(&self, _document_id: &str) -> PortResult<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"download".to_vec())
    }
}

//=========================================================================================
// File Transfer Double
//=========================================================================================

#[derive(Default)]
pub struct ScriptedFiles {
    upload_calls: AtomicUsize,
    upload_message_calls: AtomicUsize,
    list_calls: AtomicUsize,
    fail_uploads: AtomicBool,
    files: Mutex<Vec<UploadedFile>>,
}

impl ScriptedFiles {
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn upload_message_calls(&self) -> usize {
        self.upload_message_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Flip a stored file to `ready`, as backend processing would.
    pub fn mark_ready(&self, file_id: &str) {
        let mut files = self.files.lock().unwrap();
        if let Some(file) = files.iter_mut().find(|f| f.id == file_id) {
            file.status = FileStatus::Ready;
        }
    }

    fn accept(&self, payload: &FilePayload, attachment: bool) -> PortResult<UploadedFile> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(PortError::Transport("upload refused".to_string()));
        }
        let mut files = self.files.lock().unwrap();
        let file = UploadedFile {
            id: format!("file-{}", files.len() + 1),
            original_filename: payload.file_name.clone(),
            file_size: payload.size(),
            status: FileStatus::Processing,
            error_message: None,
            attachment,
        };
        files.push(file.clone());
        Ok(file)
    }
}

#[async_trait]
impl FileTransferService for ScriptedFiles {
    async fn upload_to_document(
        &self,
        _document_id: &str,
        payload: &FilePayload,
        _section: Option<&str>,
        _subsection: Option<&str>,
    ) -> PortResult<UploadedFile> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(payload, false)
    }

    async fn upload_with_message(
        &self,
        _document_id: &str,
        payload: &FilePayload,
        _message: Option<&str>,
    ) -> PortResult<UploadedFile> {
        self.upload_message_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(payload, true)
    }

    async fn list_files(&self, _document_id: &str) -> PortResult<Vec<UploadedFile>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.lock().unwrap().clone())
    }

    async fn file_status(&self, file_id: &str) -> PortResult<UploadedFile> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == file_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("file {}", file_id)))
    }

    async fn delete_file(&self, _document_id: &str, file_id: &str) -> PortResult<()> {
        self.files.lock().unwrap().retain(|f| f.id != file_id);
        Ok(())
    }
}

//=========================================================================================
// Cover Page Double
//=========================================================================================

#[derive(Default)]
pub struct ScriptedCoverPages {
    data: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl CoverPageService for ScriptedCoverPages {
    async fn structure(&self, _document_id: &str) -> PortResult<Vec<CoverPageField>> {
        Ok(vec![
            CoverPageField {
                key: "projekt".to_string(),
                label: "Projektbezeichnung".to_string(),
                kind: CoverPageFieldKind::Text,
            },
            CoverPageField {
                key: "datum".to_string(),
                label: "Datum".to_string(),
                kind: CoverPageFieldKind::Date,
            },
        ])
    }

    async fn data(&self, _document_id: &str) -> PortResult<BTreeMap<String, String>> {
        Ok(self.data.lock().unwrap().clone())
    }

    async fn update_data(
        &self,
        _document_id: &str,
        data: &BTreeMap<String, String>,
    ) -> PortResult<()> {
        *self.data.lock().unwrap() = data.clone();
        Ok(())
    }
}
