use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionError,
    #[error("Decryption failed")]
    DecryptionError,
    #[error("Invalid key format")]
    InvalidKeyError,
}

/// AES-256-GCM cipher for message content at rest. Broadcast payloads stay
/// plaintext; only the stored copy goes through this.
pub struct MessageCrypto {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for MessageCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCrypto").finish_non_exhaustive()
    }
}

impl MessageCrypto {
    pub fn from_key(key_base64: &str) -> Result<Self, CryptoError> {
        let key_bytes = BASE64
            .decode(key_base64)
            .map_err(|_| CryptoError::InvalidKeyError)?;

        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyError);
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Derive a key as SHA-256 of the shared secret. Fallback for
    /// deployments that never provisioned a dedicated encryption key.
    pub fn derive(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        let key_bytes = hasher.finalize();
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    #[allow(dead_code)]
    pub fn generate_key() -> String {
        let mut key_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut key_bytes);
        BASE64.encode(key_bytes)
    }

    pub fn encrypt(&self, message: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, message.as_bytes())
            .map_err(|_| CryptoError::EncryptionError)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    #[allow(dead_code)]
    pub fn decrypt(&self, encrypted_base64: &str) -> Result<String, CryptoError> {
        let encrypted = BASE64
            .decode(encrypted_base64)
            .map_err(|_| CryptoError::DecryptionError)?;

        if encrypted.len() < 12 {
            return Err(CryptoError::DecryptionError);
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionError)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let crypto = MessageCrypto::from_key(&MessageCrypto::generate_key()).unwrap();
        let ciphertext = crypto.encrypt("hello there").unwrap();
        assert_ne!(ciphertext, "hello there");
        assert_eq!(crypto.decrypt(&ciphertext).unwrap(), "hello there");
    }

    #[test]
    fn derived_key_is_stable() {
        let a = MessageCrypto::derive("some secret");
        let b = MessageCrypto::derive("some secret");
        let ciphertext = a.encrypt("payload").unwrap();
        assert_eq!(b.decrypt(&ciphertext).unwrap(), "payload");
    }

    #[test]
    fn rejects_bad_key_material() {
        assert!(matches!(
            MessageCrypto::from_key("too-short").unwrap_err(),
            CryptoError::InvalidKeyError
        ));
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let crypto = MessageCrypto::derive("some secret");
        assert!(matches!(
            crypto.decrypt("AAAA").unwrap_err(),
            CryptoError::DecryptionError
        ));
    }
}
