//! identity - ed25519 key files
//!
//! a node's identity is selected by name: `<dir>/<name>.key` holds the raw
//! 32-byte secret, `<dir>/<name>.pub` the raw 32-byte public key. both must
//! agree or the node refuses to start.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::overlay::PeerId;

/// default directory for key files
pub const KEY_DIR: &str = "./resources";

/// a loaded node identity
#[derive(Clone)]
pub struct Identity {
    signing: SigningKey,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("peer_id", &self.peer_id()).finish()
    }
}

impl Identity {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId(self.signing.verifying_key().to_bytes())
    }

    /// load `<dir>/<name>.key` and check it against `<dir>/<name>.pub`
    pub fn load(dir: &Path, name: &str) -> Result<Self, IdentityError> {
        let (key_path, pub_path) = key_paths(dir, name);
        let secret = read_key(&key_path)?;
        let public = read_key(&pub_path)?;

        let identity = Self::from_secret(secret);
        VerifyingKey::from_bytes(&public).map_err(|_| IdentityError::InvalidKey(pub_path.clone()))?;
        if identity.peer_id().0 != public {
            return Err(IdentityError::Mismatch(pub_path));
        }
        Ok(identity)
    }

    /// write this identity as `<dir>/<name>.key` and `<dir>/<name>.pub`
    pub fn save(&self, dir: &Path, name: &str) -> Result<(), IdentityError> {
        fs::create_dir_all(dir).map_err(|e| IdentityError::Io(dir.to_path_buf(), e))?;
        let (key_path, pub_path) = key_paths(dir, name);
        if key_path.exists() {
            return Err(IdentityError::Exists(key_path));
        }
        fs::write(&key_path, self.secret_bytes()).map_err(|e| IdentityError::Io(key_path.clone(), e))?;
        fs::write(&pub_path, self.peer_id().0).map_err(|e| IdentityError::Io(pub_path.clone(), e))?;
        Ok(())
    }
}

fn key_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (dir.join(format!("{}.key", name)), dir.join(format!("{}.pub", name)))
}

fn read_key(path: &Path) -> Result<[u8; 32], IdentityError> {
    let bytes = fs::read(path).map_err(|e| IdentityError::Io(path.to_path_buf(), e))?;
    bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKey(path.to_path_buf()))
}

/// identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("{0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("{0}: not a 32-byte ed25519 key")]
    InvalidKey(PathBuf),
    #[error("{0}: public key does not match secret key")]
    Mismatch(PathBuf),
    #[error("{0} already exists")]
    Exists(PathBuf),
}
