//! services/client/src/adapters/http_backend.rs
//!
//! The reqwest-backed adapter for the report backend. It implements the
//! four remote ports from the `core` crate and owns transport details
//! only: request construction, multipart encoding, HTTP error mapping,
//! and JSON decoding into domain records.

use async_trait::async_trait;
use gutachter_core::{
    ConversationService, CoverPageField, CoverPageFieldKind, CoverPageService,
    DocumentRenderService, FilePayload, FileStatus, FileTransferService, PortError, PortResult,
    Topic, UploadedFile,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::error;

/// The bearer token shared between the backend adapter and the projects
/// client. Set after login; cleared on logout.
#[derive(Default)]
pub struct AuthToken {
    token: RwLock<Option<String>>,
}

impl AuthToken {
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().expect("auth token lock poisoned") = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().expect("auth token lock poisoned") = None;
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().expect("auth token lock poisoned").clone()
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the remote service ports against the
/// report backend's HTTP API.
pub struct BackendHttpAdapter {
    client: Client,
    base_url: String,
    auth: Arc<AuthToken>,
}

impl BackendHttpAdapter {
    /// Builds the adapter with an explicit request timeout. The timeout is
    /// the only guard against calls that would otherwise never resolve.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        auth: Arc<AuthToken>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = self.auth.get() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> PortResult<T> {
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| {
            error!(
                "Failed to decode backend response ({}): {}",
                e,
                body_preview(&body)
            );
            PortError::Decode(e.to_string())
        })
    }

    async fn read_bytes(response: Response) -> PortResult<Vec<u8>> {
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, &body));
        }
        Ok(body.to_vec())
    }

    fn multipart_file(payload: &FilePayload) -> PortResult<Part> {
        let part = Part::bytes(payload.bytes.clone()).file_name(payload.file_name.clone());
        match payload.mime_type.as_deref().filter(|m| !m.is_empty()) {
            Some(mime) => part
                .mime_str(mime)
                .map_err(|e| PortError::Unexpected(format!("invalid MIME type: {}", e))),
            None => Ok(part),
        }
    }
}

//=========================================================================================
// "Impure" Wire Record Structs
//=========================================================================================

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Deserialize)]
struct FilesResponse {
    files: Vec<UploadedFileRecord>,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFileRecord,
}

#[derive(Deserialize)]
struct UploadedFileRecord {
    id: String,
    original_filename: String,
    file_size: u64,
    status: FileStatus,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    attachment: bool,
}

impl UploadedFileRecord {
    fn to_domain(self) -> UploadedFile {
        UploadedFile {
            id: self.id,
            original_filename: self.original_filename,
            file_size: self.file_size,
            status: self.status,
            error_message: self.error_message,
            attachment: self.attachment,
        }
    }
}

#[derive(Deserialize)]
struct CoverPageStructureResponse {
    fields: Vec<CoverPageFieldRecord>,
}

#[derive(Deserialize)]
struct CoverPageFieldRecord {
    key: String,
    label: String,
    #[serde(rename = "type")]
    kind: CoverPageFieldKind,
}

impl CoverPageFieldRecord {
    fn to_domain(self) -> CoverPageField {
        CoverPageField {
            key: self.key,
            label: self.label,
            kind: self.kind,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CoverPageDataBody {
    data: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct StartBody<'a> {
    topic: &'a str,
}

#[derive(Serialize)]
struct ReplyBody<'a> {
    message: &'a str,
}

//=========================================================================================
// Remote Port Implementations
//=========================================================================================

#[async_trait]
impl ConversationService for BackendHttpAdapter {
    async fn start(&self, document_id: &str, topic: Topic) -> PortResult<String> {
        let response = self
            .request(Method::POST, &format!("/conversation/{}/start", document_id))
            .json(&StartBody {
                topic: topic.as_str(),
            })
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: MessageResponse = Self::read_json(response).await?;
        Ok(decoded.message)
    }

    async fn reply(&self, document_id: &str, message: &str) -> PortResult<String> {
        let response = self
            .request(Method::POST, &format!("/conversation/{}/reply", document_id))
            .json(&ReplyBody { message })
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: MessageResponse = Self::read_json(response).await?;
        Ok(decoded.message)
    }
}

#[async_trait]
impl DocumentRenderService for BackendHttpAdapter {
    async fn fetch_pdf(&self, document_id: &str) -> PortResult<Vec<u8>> {
        let response = self
            .request(Method::GET, &format!("/documents/{}/pdf", document_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::read_bytes(response).await
    }

    async fn fetch_download(&self, document_id: &str) -> PortResult<Vec<u8>> {
        let response = self
            .request(Method::GET, &format!("/documents/{}/download", document_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::read_bytes(response).await
    }
}

#[async_trait]
impl FileTransferService for BackendHttpAdapter {
    async fn upload_to_document(
        &self,
        document_id: &str,
        payload: &FilePayload,
        section: Option<&str>,
        subsection: Option<&str>,
    ) -> PortResult<UploadedFile> {
        let mut form = Form::new().part("file", Self::multipart_file(payload)?);
        if let Some(section) = section {
            form = form.text("section", section.to_string());
        }
        if let Some(subsection) = subsection {
            form = form.text("subsection", subsection.to_string());
        }

        let response = self
            .request(Method::POST, &format!("/upload/{}/file", document_id))
            .multipart(form)
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: UploadResponse = Self::read_json(response).await?;
        Ok(decoded.file.to_domain())
    }

    async fn upload_with_message(
        &self,
        document_id: &str,
        payload: &FilePayload,
        message: Option<&str>,
    ) -> PortResult<UploadedFile> {
        let mut form = Form::new().part("file", Self::multipart_file(payload)?);
        if let Some(message) = message {
            form = form.text("message", message.to_string());
        }

        let response = self
            .request(
                Method::POST,
                &format!("/upload/{}/message-file", document_id),
            )
            .multipart(form)
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: UploadResponse = Self::read_json(response).await?;
        Ok(decoded.file.to_domain())
    }

    async fn list_files(&self, document_id: &str) -> PortResult<Vec<UploadedFile>> {
        let response = self
            .request(Method::GET, &format!("/upload/{}/files", document_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: FilesResponse = Self::read_json(response).await?;
        Ok(decoded.files.into_iter().map(|f| f.to_domain()).collect())
    }

    async fn file_status(&self, file_id: &str) -> PortResult<UploadedFile> {
        let response = self
            .request(Method::GET, &format!("/upload/files/status/{}", file_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: UploadedFileRecord = Self::read_json(response).await?;
        Ok(decoded.to_domain())
    }

    async fn delete_file(&self, document_id: &str, file_id: &str) -> PortResult<()> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/upload/{}/files/{}", document_id, file_id),
            )
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl CoverPageService for BackendHttpAdapter {
    async fn structure(&self, document_id: &str) -> PortResult<Vec<CoverPageField>> {
        let response = self
            .request(Method::GET, &format!("/cover-page/{}/structure", document_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: CoverPageStructureResponse = Self::read_json(response).await?;
        Ok(decoded.fields.into_iter().map(|f| f.to_domain()).collect())
    }

    async fn data(&self, document_id: &str) -> PortResult<BTreeMap<String, String>> {
        let response = self
            .request(Method::GET, &format!("/cover-page/{}/data", document_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: CoverPageDataBody = Self::read_json(response).await?;
        Ok(decoded.data)
    }

    async fn update_data(
        &self,
        document_id: &str,
        data: &BTreeMap<String, String>,
    ) -> PortResult<()> {
        let response = self
            .request(Method::PUT, &format!("/cover-page/{}/data", document_id))
            .json(&CoverPageDataBody { data: data.clone() })
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }
        Ok(())
    }
}

//=========================================================================================
// Error Mapping Helpers
//=========================================================================================

pub(crate) fn map_transport_error(error: reqwest::Error) -> PortError {
    if error.is_timeout() {
        PortError::Transport(format!("request timed out: {}", error))
    } else {
        PortError::Transport(error.to_string())
    }
}

pub(crate) fn map_status_error(status: StatusCode, body: &[u8]) -> PortError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), preview)
    };

    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        _ => PortError::Transport(message),
    }
}

pub(crate) fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{}...", preview)
    } else {
        preview
    }
}
