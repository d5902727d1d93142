//! Key manager adapters.
//!
//! The coordinator treats key management as a collaborator behind the
//! [`KeyManager`] port. These adapters cover the deployment variants as
//! tagged configurations: a static in-config map, one secret file per
//! identifier, and derivation from a single seed. Signatures here are
//! deterministic digests over `secret || payload`; a production deployment
//! puts a hardware or remote signer behind the same port.

use crate::config::KeyManagerConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use veil_06_sequencer::ports::outbound::KeyManagerError;
use veil_06_sequencer::ports::{KeyHandle, KeyManager};

/// Build the configured key manager variant.
#[must_use]
pub fn build_key_manager(config: &KeyManagerConfig) -> Arc<dyn KeyManager> {
    match config {
        KeyManagerConfig::Static { keys } => Arc::new(StaticKeyManager {
            keys: keys
                .iter()
                .map(|(id, secret_hex)| {
                    (id.clone(), hex::decode(secret_hex).unwrap_or_default())
                })
                .collect(),
        }),
        KeyManagerConfig::Filesystem { path } => Arc::new(FilesystemKeyManager {
            path: path.clone(),
        }),
        KeyManagerConfig::Derived { seed } => Arc::new(DerivedKeyManager {
            seed: hex::decode(seed).unwrap_or_default(),
        }),
    }
}

fn verifier_for(secret: &[u8]) -> String {
    let digest = Sha256::digest(secret);
    format!("0x{}", hex::encode(&digest[..20]))
}

fn sign_with(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update(payload);
    hasher.finalize().to_vec()
}

/// Fixed identifier-to-secret map from configuration.
pub struct StaticKeyManager {
    keys: BTreeMap<String, Vec<u8>>,
}

#[async_trait]
impl KeyManager for StaticKeyManager {
    async fn resolve_key(
        &self,
        identifier: &str,
        _algorithm: &str,
        _verifier_type: &str,
    ) -> Result<(KeyHandle, String), KeyManagerError> {
        let secret = self
            .keys
            .get(identifier)
            .ok_or_else(|| KeyManagerError::UnknownIdentifier {
                identifier: identifier.to_owned(),
            })?;
        Ok((KeyHandle(identifier.to_owned()), verifier_for(secret)))
    }

    async fn sign(&self, key: &KeyHandle, payload: &[u8]) -> Result<Vec<u8>, KeyManagerError> {
        let secret = self
            .keys
            .get(&key.0)
            .ok_or_else(|| KeyManagerError::UnknownIdentifier {
                identifier: key.0.clone(),
            })?;
        Ok(sign_with(secret, payload))
    }
}

/// One secret file per identifier under a directory. Path separators and
/// `@` in identifiers are flattened so a qualified party name maps to one
/// flat file.
pub struct FilesystemKeyManager {
    path: PathBuf,
}

impl FilesystemKeyManager {
    fn secret_for(&self, identifier: &str) -> Result<Vec<u8>, KeyManagerError> {
        let file = identifier.replace(['@', '/'], "_");
        std::fs::read(self.path.join(file)).map_err(|_| KeyManagerError::UnknownIdentifier {
            identifier: identifier.to_owned(),
        })
    }
}

#[async_trait]
impl KeyManager for FilesystemKeyManager {
    async fn resolve_key(
        &self,
        identifier: &str,
        _algorithm: &str,
        _verifier_type: &str,
    ) -> Result<(KeyHandle, String), KeyManagerError> {
        let secret = self.secret_for(identifier)?;
        Ok((KeyHandle(identifier.to_owned()), verifier_for(&secret)))
    }

    async fn sign(&self, key: &KeyHandle, payload: &[u8]) -> Result<Vec<u8>, KeyManagerError> {
        let secret = self.secret_for(&key.0)?;
        Ok(sign_with(&secret, payload))
    }
}

/// Per-identifier secrets derived from one seed; any identifier resolves.
pub struct DerivedKeyManager {
    seed: Vec<u8>,
}

impl DerivedKeyManager {
    fn secret_for(&self, identifier: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed);
        hasher.update(identifier.as_bytes());
        hasher.finalize().to_vec()
    }
}

#[async_trait]
impl KeyManager for DerivedKeyManager {
    async fn resolve_key(
        &self,
        identifier: &str,
        _algorithm: &str,
        _verifier_type: &str,
    ) -> Result<(KeyHandle, String), KeyManagerError> {
        let secret = self.secret_for(identifier);
        Ok((KeyHandle(identifier.to_owned()), verifier_for(&secret)))
    }

    async fn sign(&self, key: &KeyHandle, payload: &[u8]) -> Result<Vec<u8>, KeyManagerError> {
        Ok(sign_with(&self.secret_for(&key.0), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_key_manager_known_and_unknown() {
        let manager = build_key_manager(&KeyManagerConfig::Static {
            keys: [("notary@node1".to_string(), "aabb".to_string())].into(),
        });
        let (handle, verifier) = manager
            .resolve_key("notary@node1", "ecdsa:secp256k1", "eth_address")
            .await
            .unwrap();
        assert!(verifier.starts_with("0x"));
        assert!(!manager.sign(&handle, b"payload").await.unwrap().is_empty());

        assert!(manager
            .resolve_key("ghost", "ecdsa:secp256k1", "eth_address")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_derived_keys_are_stable_per_identifier() {
        let manager = build_key_manager(&KeyManagerConfig::Derived {
            seed: "11".repeat(32),
        });
        let (key_a, _) = manager
            .resolve_key("party-a", "ecdsa:secp256k1", "eth_address")
            .await
            .unwrap();
        let first = manager.sign(&key_a, b"x").await.unwrap();
        let second = manager.sign(&key_a, b"x").await.unwrap();
        assert_eq!(first, second);

        let (key_b, _) = manager
            .resolve_key("party-b", "ecdsa:secp256k1", "eth_address")
            .await
            .unwrap();
        assert_ne!(first, manager.sign(&key_b, b"x").await.unwrap());
    }

    #[tokio::test]
    async fn test_filesystem_key_manager_reads_flattened_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notary_node1"), b"secret-bytes").unwrap();
        let manager = build_key_manager(&KeyManagerConfig::Filesystem {
            path: dir.path().to_path_buf(),
        });

        assert!(manager
            .resolve_key("notary@node1", "ecdsa:secp256k1", "eth_address")
            .await
            .is_ok());
        assert!(manager
            .resolve_key("absent@node1", "ecdsa:secp256k1", "eth_address")
            .await
            .is_err());
    }
}
