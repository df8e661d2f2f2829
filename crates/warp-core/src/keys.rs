//! Ephemeral SSH credentials.
//!
//! Each session generates a fresh Ed25519 keypair. The public half goes into
//! the pod's `authorized_keys` secret; the private half is written to a
//! randomly named temp file that ssh reads via `-i`. [`KeyFile`] removes the
//! file when it goes out of scope.

use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use ssh_key::{
    private::{Ed25519Keypair, KeypairData},
    LineEnding, PrivateKey,
};
use tempfile::NamedTempFile;

use crate::{Error, Result};

const KEY_COMMENT: &str = "kubectl-warp";

/// Session keypair.
pub struct Keypair {
    private: PrivateKey,
}

impl Keypair {
    /// Generate a new keypair from the OS random source.
    pub fn generate() -> Result<Self> {
        let seed = SigningKey::generate(&mut OsRng).to_bytes();
        let keypair = Ed25519Keypair::from_seed(&seed);
        let private = PrivateKey::new(KeypairData::Ed25519(keypair), KEY_COMMENT)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        Ok(Self { private })
    }

    /// `authorized_keys` line for the public half.
    pub fn public_openssh(&self) -> Result<String> {
        let line = self
            .private
            .public_key()
            .to_openssh()
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        Ok(format!("{line}\n"))
    }

    /// Unencrypted OpenSSH PEM for the private half.
    pub fn private_openssh_pem(&self) -> Result<String> {
        let pem = self
            .private
            .to_openssh(LineEnding::LF)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        Ok(pem.as_str().to_owned())
    }
}

/// Private key materialised on disk for the lifetime of the session.
///
/// The file is created with a random name and owner-only permissions and
/// is removed on drop. [`KeyFile::remove`] removes it early; calling it more
/// than once is harmless.
#[derive(Debug)]
pub struct KeyFile {
    file: Option<NamedTempFile>,
    path: std::path::PathBuf,
}

impl KeyFile {
    /// Write `contents` to a new temp file.
    pub fn create(contents: &str) -> Result<Self> {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .prefix("warp-")
            .rand_bytes(16)
            .tempfile()
            .map_err(|e| Error::KeyGeneration(format!("failed to create key file: {e}")))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Error::KeyGeneration(format!("failed to write key file: {e}")))?;
        let path = file.path().to_path_buf();
        tracing::debug!(path = %path.display(), "private key written");

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Location of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the key file now.
    pub fn remove(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => file
                .close()
                .map_err(|e| Error::Io(format!("failed to remove key file: {e}"))),
            None => Ok(()),
        }
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            tracing::warn!("Key file cleanup failed for '{}': {}", self.path.display(), e);
        }
    }
}
