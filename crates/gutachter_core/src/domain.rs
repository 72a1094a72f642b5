//! crates/gutachter_core/src/domain.rs
//!
//! Defines the pure, core data structures for the client.
//! These structs are independent of any transport or storage format;
//! the serde derives exist because the conversation log and document-id
//! maps are persisted locally as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The report types the backend can produce. Fixed set; the taxonomy
/// module owns the section structure for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Baugrundgutachten,
    Deklarationsanalyse,
    Versickerungsgutachten,
}

impl Topic {
    pub const ALL: [Topic; 3] = [
        Topic::Baugrundgutachten,
        Topic::Deklarationsanalyse,
        Topic::Versickerungsgutachten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Baugrundgutachten => "Baugrundgutachten",
            Topic::Deklarationsanalyse => "Deklarationsanalyse",
            Topic::Versickerungsgutachten => "Versickerungsgutachten",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Baugrundgutachten" => Ok(Topic::Baugrundgutachten),
            "Deklarationsanalyse" => Ok(Topic::Deklarationsanalyse),
            "Versickerungsgutachten" => Ok(Topic::Versickerungsgutachten),
            other => Err(format!("'{}' is not a known report topic", other)),
        }
    }
}

/// Who authored a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One exchange turn in a subsection conversation. Append-only once in
/// the log; never reordered or deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    /// Text content, possibly markdown.
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_file_attachment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            is_file_attachment: false,
            file_name: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            is_file_attachment: false,
            file_name: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// A user-side bubble recording that a file was attached to the
    /// conversation.
    pub fn file_attachment(file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            role: Role::User,
            content: format!("Datei angehängt: {}", file_name),
            is_file_attachment: true,
            file_name: Some(file_name),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Identifies the slot a document id is stored under: one working
/// document per project and topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub project_id: String,
    pub topic: Topic,
}

impl ContextKey {
    pub fn new(project_id: impl Into<String>, topic: Topic) -> Self {
        Self {
            project_id: project_id.into(),
            topic,
        }
    }

    /// The fixed key this context is stored under in the persisted
    /// document-id map.
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.project_id, self.topic)
    }
}

/// Identifies one conversation log and its status record: the composite
/// of a document, a section and a subsection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub document_id: String,
    pub section: String,
    pub subsection: String,
}

impl ConversationKey {
    pub fn new(
        document_id: impl Into<String>,
        section: impl Into<String>,
        subsection: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            section: section.into(),
            subsection: subsection.into(),
        }
    }

    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.document_id, self.section, self.subsection)
    }
}

/// Per-subsection flags. `has_conversation` is monotonic for the session:
/// once a log exists it never flips back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubsectionStatus {
    pub has_conversation: bool,
    pub approved: bool,
}

/// A partial update of `SubsectionStatus`. Fields left as `None` keep
/// their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPatch {
    pub has_conversation: Option<bool>,
    pub approved: Option<bool>,
}

impl StatusPatch {
    pub fn approved(value: bool) -> Self {
        Self {
            has_conversation: None,
            approved: Some(value),
        }
    }

    pub fn has_conversation(value: bool) -> Self {
        Self {
            has_conversation: Some(value),
            approved: None,
        }
    }
}

/// Processing state of an uploaded file. Authoritative state lives on
/// the backend; the client only caches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processing,
    Ready,
    Error,
}

/// A backend-owned file record surfaced to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub id: String,
    pub original_filename: String,
    pub file_size: u64,
    pub status: FileStatus,
    pub error_message: Option<String>,
    /// True when the file entered through the chat-attachment flow.
    pub attachment: bool,
}

/// The input kind of one cover-page field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverPageFieldKind {
    Text,
    Textarea,
    Date,
}

/// One field of the cover-page form, as described by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverPageField {
    pub key: String,
    pub label: String,
    pub kind: CoverPageFieldKind,
}

/// An opaque handle to an installed PDF preview resource. At most one
/// live handle exists per document id; superseded handles are revoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewHandle {
    pub id: String,
}

impl PreviewHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trips_through_its_label() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>(), Ok(topic));
        }
        assert!("Bodengutachten".parse::<Topic>().is_err());
    }

    #[test]
    fn storage_keys_are_stable() {
        let ctx = ContextKey::new("project-7", Topic::Baugrundgutachten);
        assert_eq!(ctx.storage_key(), "project-7/Baugrundgutachten");

        let key = ConversationKey::new("doc-1", "geologie", "schichtenverzeichnis");
        assert_eq!(key.storage_key(), "doc-1/geologie/schichtenverzeichnis");
    }

    #[test]
    fn conversation_entry_serde_keeps_optional_fields_compact() {
        let entry = ConversationEntry {
            role: Role::Assistant,
            content: "Willkommen".to_string(),
            is_file_attachment: false,
            file_name: None,
            timestamp: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"Willkommen"}"#);

        let parsed: ConversationEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}
