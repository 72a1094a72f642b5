pub mod domain;
pub mod ops;
pub mod ports;
pub mod state;
pub mod taxonomy;
pub mod uploads;

#[cfg(test)]
pub(crate) mod test_support;

pub use domain::{
    ContextKey, ConversationEntry, ConversationKey, CoverPageField, CoverPageFieldKind,
    FileStatus, PreviewHandle, Role, StatusPatch, SubsectionStatus, Topic, UploadedFile,
};
pub use ops::{Assistant, OpError, StartOutcome};
pub use ports::{
    ConversationService, CoverPageService, DocumentRenderService, FilePayload,
    FileTransferService, KeyValueStore, PortError, PortResult, PreviewRegistry,
};
pub use state::SessionState;
pub use uploads::{
    UploadCoordinator, UploadError, UploadKind, UploadLimits, UploadValidationError,
};
