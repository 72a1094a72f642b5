//! crates/gutachter_core/src/uploads.rs
//!
//! The file upload coordinator: client-side gatekeeping (type allow-list,
//! size ceilings) before any network call, plus a per-document listing
//! cache so the file manager does not re-fetch unless asked to.

use crate::domain::UploadedFile;
use crate::ports::{FilePayload, FileTransferService, PortError, PortResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Ceiling for files attached inside the chat flow.
pub const DEFAULT_CHAT_ATTACHMENT_MAX_BYTES: u64 = 10 * 1024 * 1024;
/// Ceiling for files uploaded through the document file manager.
pub const DEFAULT_DOCUMENT_FILE_MAX_BYTES: u64 = 25 * 1024 * 1024;

const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];
const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx"];

/// The two upload flows enforce different ceilings. They are kept as two
/// independent knobs; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub chat_attachment_max_bytes: u64,
    pub document_file_max_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            chat_attachment_max_bytes: DEFAULT_CHAT_ATTACHMENT_MAX_BYTES,
            document_file_max_bytes: DEFAULT_DOCUMENT_FILE_MAX_BYTES,
        }
    }
}

/// Which flow a file enters through; selects the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    ChatAttachment,
    DocumentFile,
}

impl UploadLimits {
    pub fn max_bytes(&self, kind: UploadKind) -> u64 {
        match kind {
            UploadKind::ChatAttachment => self.chat_attachment_max_bytes,
            UploadKind::DocumentFile => self.document_file_max_bytes,
        }
    }
}

/// A local rejection: detected synchronously, never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadValidationError {
    #[error("Dateityp '{found}' wird nicht unterstützt (erlaubt: PDF, DOCX)")]
    UnsupportedType { found: String },
    #[error("Datei ist zu groß ({size} Bytes, zulässig sind {limit} Bytes)")]
    TooLarge { size: u64, limit: u64 },
}

/// Validation or transfer failure of one upload operation.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] UploadValidationError),
    #[error(transparent)]
    Port(#[from] PortError),
}

//=========================================================================================
// The Upload Coordinator
//=========================================================================================

pub struct UploadCoordinator {
    files: Arc<dyn FileTransferService>,
    limits: UploadLimits,
    /// Per-document listing cache. Presence of a key means the document
    /// has been loaded at least once this session.
    cache: Mutex<HashMap<String, Vec<UploadedFile>>>,
    /// Last upload error per document, for the inline error banner.
    last_errors: Mutex<HashMap<String, String>>,
}

impl UploadCoordinator {
    pub fn new(files: Arc<dyn FileTransferService>, limits: UploadLimits) -> Self {
        Self {
            files,
            limits,
            cache: Mutex::new(HashMap::new()),
            last_errors: Mutex::new(HashMap::new()),
        }
    }

    /// Synchronous gatekeeping, run before any network call. A new attempt
    /// clears the previous error for the document.
    pub fn validate(
        &self,
        document_id: &str,
        payload: &FilePayload,
        kind: UploadKind,
    ) -> Result<(), UploadValidationError> {
        self.clear_error(document_id);

        let type_ok = match payload.mime_type.as_deref().filter(|m| !m.is_empty()) {
            Some(mime) => ALLOWED_MIME_TYPES
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(mime)),
            None => {
                let extension = payload
                    .file_name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_ascii_lowercase())
                    .unwrap_or_default();
                ALLOWED_EXTENSIONS.contains(&extension.as_str())
            }
        };
        if !type_ok {
            return Err(UploadValidationError::UnsupportedType {
                found: payload
                    .mime_type
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| payload.file_name.clone()),
            });
        }

        let limit = self.limits.max_bytes(kind);
        if payload.size() > limit {
            return Err(UploadValidationError::TooLarge {
                size: payload.size(),
                limit,
            });
        }
        Ok(())
    }

    /// Returns the document's file list. The cached result is reused
    /// unless `force_refresh` is set or the document has never been
    /// loaded this session.
    pub async fn list_files(
        &self,
        document_id: &str,
        force_refresh: bool,
    ) -> PortResult<Vec<UploadedFile>> {
        if !force_refresh {
            if let Some(cached) = self.cache.lock().expect("upload cache lock poisoned").get(document_id) {
                return Ok(cached.clone());
            }
        }
        let files = self.files.list_files(document_id).await?;
        self.cache
            .lock()
            .expect("upload cache lock poisoned")
            .insert(document_id.to_string(), files.clone());
        Ok(files)
    }

    /// File-manager flow (25 MB ceiling by default). A successful upload
    /// always forces and awaits a re-list, so the cache is authoritative
    /// when this returns.
    pub async fn upload_to_document(
        &self,
        document_id: &str,
        payload: &FilePayload,
        section: Option<&str>,
        subsection: Option<&str>,
    ) -> Result<UploadedFile, UploadError> {
        self.validate(document_id, payload, UploadKind::DocumentFile)?;
        let uploaded = self
            .files
            .upload_to_document(document_id, payload, section, subsection)
            .await
            .map_err(|e| self.record_error(document_id, e))?;
        info!(
            "Uploaded '{}' ({} bytes) to document {}",
            payload.file_name,
            payload.size(),
            document_id
        );
        self.refresh_after_mutation(document_id).await;
        Ok(uploaded)
    }

    /// Chat-attachment flow (10 MB ceiling by default).
    pub async fn upload_with_message(
        &self,
        document_id: &str,
        payload: &FilePayload,
        message: Option<&str>,
    ) -> Result<UploadedFile, UploadError> {
        self.validate(document_id, payload, UploadKind::ChatAttachment)?;
        let uploaded = self
            .files
            .upload_with_message(document_id, payload, message)
            .await
            .map_err(|e| self.record_error(document_id, e))?;
        info!(
            "Attached '{}' ({} bytes) to conversation on document {}",
            payload.file_name,
            payload.size(),
            document_id
        );
        self.refresh_after_mutation(document_id).await;
        Ok(uploaded)
    }

    pub async fn delete_file(&self, document_id: &str, file_id: &str) -> PortResult<()> {
        self.files.delete_file(document_id, file_id).await?;
        self.refresh_after_mutation(document_id).await;
        Ok(())
    }

    pub async fn file_status(&self, file_id: &str) -> PortResult<UploadedFile> {
        self.files.file_status(file_id).await
    }

    /// The last upload error recorded for a document, if any. Cleared by
    /// the next validation attempt.
    pub fn last_error(&self, document_id: &str) -> Option<String> {
        self.last_errors
            .lock()
            .expect("upload error lock poisoned")
            .get(document_id)
            .cloned()
    }

    fn clear_error(&self, document_id: &str) {
        self.last_errors
            .lock()
            .expect("upload error lock poisoned")
            .remove(document_id);
    }

    fn record_error(&self, document_id: &str, error: PortError) -> UploadError {
        self.last_errors
            .lock()
            .expect("upload error lock poisoned")
            .insert(document_id.to_string(), error.to_string());
        UploadError::Port(error)
    }

    /// Mutations always force the follow-up re-list, regardless of any
    /// caller preference. A failed refresh leaves the previous cache in
    /// place; the mutation itself already succeeded.
    async fn refresh_after_mutation(&self, document_id: &str) {
        if let Err(e) = self.list_files(document_id, true).await {
            warn!(
                "File list refresh after mutation failed for {}: {}",
                document_id, e
            );
        }
    }
}
