// Key Material Loading
// Hex-encoded key files referenced from the swarm config section

use crate::config::ConfigError;
use kolibri_core::crypto::PublicKey;
use std::path::Path;

fn read_hex_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    hex::decode(text.trim()).map_err(|error| {
        ConfigError::Invalid(format!("{} is not valid hex: {error}", path.display()))
    })
}

/// Load a 32-byte Ed25519 public key stored as 64 hex characters.
pub fn load_public_key(path: &Path) -> Result<PublicKey, ConfigError> {
    let bytes = read_hex_file(path)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        ConfigError::Invalid(format!(
            "{} holds {} bytes, expected 32",
            path.display(),
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from_bytes(bytes))
}

/// Load the HMAC shared key (hex, any non-zero length).
pub fn load_hmac_key(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let bytes = read_hex_file(path)?;
    if bytes.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} holds an empty HMAC key",
            path.display()
        )));
    }
    Ok(bytes)
}
