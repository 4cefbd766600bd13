//! On-disk persistence for the long-lived signing identity.
//!
//! A PEM-wrapped copy of the raw 32-byte private scalar is kept at a fixed
//! path (see [`crate::config::IdentityConfig::key_path`]), generated on
//! first run if missing. Loading and generation are the only two supported
//! operations — there is no key rotation or multi-key support.

use crate::crypto::Identity;
use std::path::Path;

const PEM_LABEL: &str = "EC PRIVATE KEY";

/// Load the identity at `path`, generating and persisting a fresh one if
/// the file does not exist yet.
pub fn load_or_generate(path: &Path) -> Result<Identity, KeyFileError> {
    if path.exists() {
        load(path)
    } else {
        let identity = Identity::generate();
        save(path, &identity)?;
        Ok(identity)
    }
}

pub fn load(path: &Path) -> Result<Identity, KeyFileError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| KeyFileError::Io(path.to_path_buf(), e))?;
    let block = pem::parse(&text).map_err(|e| KeyFileError::Pem(path.to_path_buf(), e))?;
    if block.tag() != PEM_LABEL {
        return Err(KeyFileError::WrongLabel(block.tag().to_string()));
    }
    let scalar: [u8; 32] = block
        .contents()
        .try_into()
        .map_err(|_| KeyFileError::WrongLength(block.contents().len()))?;
    Identity::from_scalar_bytes(&scalar).map_err(KeyFileError::Crypto)
}

pub fn save(path: &Path, identity: &Identity) -> Result<(), KeyFileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| KeyFileError::Io(path.to_path_buf(), e))?;
    }
    let scalar = identity.scalar_bytes();
    let block = pem::Pem::new(PEM_LABEL, scalar.to_vec());
    let text = pem::encode(&block);
    std::fs::write(path, text).map_err(|e| KeyFileError::Io(path.to_path_buf(), e))?;
    restrict_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), KeyFileError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms).map_err(|e| KeyFileError::Io(path.to_path_buf(), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), KeyFileError> {
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("{0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),

    #[error("{0}: not a valid PEM file: {1}")]
    Pem(std::path::PathBuf, pem::PemError),

    #[error("unexpected PEM label: {0}")]
    WrongLabel(String),

    #[error("private scalar must be 32 bytes, got {0}")]
    WrongLength(usize),

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
}
