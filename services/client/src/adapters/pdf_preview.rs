//! services/client/src/adapters/pdf_preview.rs
//!
//! A file-backed implementation of the `PreviewRegistry` port. Where the
//! browser original minted object URLs for an embedded viewer, this
//! adapter writes the fetched PDF into a preview directory and hands the
//! path out as the handle; revoking a handle deletes the file, so at most
//! one preview file per document outlives a refresh.

use gutachter_core::{PortError, PortResult, PreviewHandle, PreviewRegistry};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct FilePreviewRegistry {
    dir: PathBuf,
    counter: AtomicU64,
}

impl FilePreviewRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> PortResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| PortError::Unexpected(format!("cannot create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }
}

impl PreviewRegistry for FilePreviewRegistry {
    fn install(&self, document_id: &str, bytes: &[u8]) -> PortResult<PreviewHandle> {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let sanitized: String = document_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let path = self.dir.join(format!("{}-{}.pdf", sanitized, sequence));
        fs::write(&path, bytes).map_err(|e| {
            PortError::Unexpected(format!("cannot write preview {}: {}", path.display(), e))
        })?;
        debug!("Installed preview {}", path.display());
        Ok(PreviewHandle::new(path.display().to_string()))
    }

    fn revoke(&self, handle: &PreviewHandle) {
        // A handle whose file is already gone is not an error; the
        // resource is released either way.
        if let Err(e) = fs::remove_file(&handle.id) {
            debug!("Revoking preview {} found nothing to remove: {}", handle.id, e);
        }
    }
}
