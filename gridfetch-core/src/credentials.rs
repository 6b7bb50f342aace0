use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{FetchError, Result};

/// Boundary for the identity-provider logon client, explicitly out of scope
/// for the download engine (PURPOSE & SCOPE). The engine only ever consumes
/// an already-established credential; this trait is the seam a future logon
/// client would implement.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the PEM bytes of the client certificate (and key, concatenated
    /// in the same file, matching the source's single `credentials.pem`) to
    /// load into every host session.
    async fn load_client_identity(&self) -> Result<Vec<u8>>;
}

/// Reads a pre-issued client certificate from disk. The only provider this
/// crate implements; a real deployment's logon client would produce the file
/// this reads and hand the engine a "logged on" signal out of band.
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn load_client_identity(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            FetchError::Credential(format!(
                "failed to read client credential at {}: {e}",
                self.path.display()
            ))
        })
    }
}
