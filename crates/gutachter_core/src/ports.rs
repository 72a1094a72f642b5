//! crates/gutachter_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the client's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like the HTTP backend
//! or the local storage layer.

use crate::domain::{CoverPageField, PreviewHandle, Topic, UploadedFile};
use async_trait::async_trait;
use std::collections::BTreeMap;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., HTTP, filesystem).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Response could not be decoded: {0}")]
    Decode(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Request Payloads
//=========================================================================================

/// A file selected for upload, with everything the validation layer
/// needs before any network call is issued.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub file_name: String,
    /// MIME type as reported by the picker; validation falls back to the
    /// file extension when this is absent.
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FilePayload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

//=========================================================================================
// Remote Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Starts a conversation for a document and returns the backend's
    /// initial assistant message.
    async fn start(&self, document_id: &str, topic: Topic) -> PortResult<String>;

    /// Sends one user message and returns the assistant's reply.
    async fn reply(&self, document_id: &str, message: &str) -> PortResult<String>;
}

#[async_trait]
pub trait DocumentRenderService: Send + Sync {
    /// Fetches the rendered document as PDF bytes, for the embedded preview.
    async fn fetch_pdf(&self, document_id: &str) -> PortResult<Vec<u8>>;

    /// Fetches the download rendition of the document.
    async fn fetch_download(&self, document_id: &str) -> PortResult<Vec<u8>>;
}

#[async_trait]
pub trait FileTransferService: Send + Sync {
    /// Uploads a file into the document's file manager, optionally
    /// scoped to a section/subsection.
    async fn upload_to_document(
        &self,
        document_id: &str,
        payload: &FilePayload,
        section: Option<&str>,
        subsection: Option<&str>,
    ) -> PortResult<UploadedFile>;

    /// Uploads a file attached to a chat message.
    async fn upload_with_message(
        &self,
        document_id: &str,
        payload: &FilePayload,
        message: Option<&str>,
    ) -> PortResult<UploadedFile>;

    async fn list_files(&self, document_id: &str) -> PortResult<Vec<UploadedFile>>;

    async fn file_status(&self, file_id: &str) -> PortResult<UploadedFile>;

    async fn delete_file(&self, document_id: &str, file_id: &str) -> PortResult<()>;
}

#[async_trait]
pub trait CoverPageService: Send + Sync {
    async fn structure(&self, document_id: &str) -> PortResult<Vec<CoverPageField>>;

    async fn data(&self, document_id: &str) -> PortResult<BTreeMap<String, String>>;

    async fn update_data(
        &self,
        document_id: &str,
        data: &BTreeMap<String, String>,
    ) -> PortResult<()>;
}

//=========================================================================================
// Local Resource Ports (Traits)
//=========================================================================================
// These are synchronous on purpose: the session state manager calls them
// inside its critical sections, which must not suspend.
//=========================================================================================

/// Durable string storage under fixed, well-known keys.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> PortResult<Option<String>>;
    fn save(&self, key: &str, value: &str) -> PortResult<()>;
}

/// Owns the lifecycle of displayable PDF preview resources. `install`
/// creates a new live resource; `revoke` releases one. The caller is
/// responsible for revoking a handle before replacing it.
pub trait PreviewRegistry: Send + Sync {
    fn install(&self, document_id: &str, bytes: &[u8]) -> PortResult<PreviewHandle>;
    fn revoke(&self, handle: &PreviewHandle);
}
