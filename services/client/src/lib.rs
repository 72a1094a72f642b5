pub mod adapters;
pub mod config;
pub mod error;
pub mod projects;
pub mod shell;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapters::{AuthToken, BackendHttpAdapter, FilePreviewRegistry, JsonFileStore};
pub use config::Config;
pub use error::ClientError;
pub use projects::ProjectsClient;
pub use shell::Shell;
