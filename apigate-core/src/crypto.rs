use crate::error::GatewayError;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, AeadCore, Key, Nonce};

/// Encrypts sensitive Setting values and Upstream.auth_value at rest with
/// the deployment key (§3, §6). Ciphertext layout: 12-byte nonce prefix
/// followed by the AEAD output.
pub struct DeploymentKey {
    cipher: Aes256Gcm,
}

impl DeploymentKey {
    /// `key_bytes` must be 32 bytes, sourced from the `server` config
    /// section or an environment variable — never hardcoded.
    pub fn new(key_bytes: &[u8]) -> Result<Self, GatewayError> {
        if key_bytes.len() != 32 {
            return Err(GatewayError::internal("deployment key must be 32 bytes"));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, GatewayError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| GatewayError::internal(format!("encrypt failed: {e}")))?;
        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String, GatewayError> {
        if blob.len() < 12 {
            return Err(GatewayError::internal("ciphertext too short"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| GatewayError::internal(format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| GatewayError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let key = DeploymentKey::new(&[7u8; 32]).unwrap();
        let ciphertext = key.encrypt("super-secret-value").unwrap();
        assert_ne!(ciphertext, b"super-secret-value".to_vec());
        assert_eq!(key.decrypt(&ciphertext).unwrap(), "super-secret-value");
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(DeploymentKey::new(&[0u8; 16]).is_err());
    }
}
