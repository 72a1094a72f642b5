pub mod http_backend;
pub mod kv_store;
pub mod pdf_preview;

pub use http_backend::{AuthToken, BackendHttpAdapter};
pub use kv_store::JsonFileStore;
pub use pdf_preview::FilePreviewRegistry;
