use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Seals user secrets (provider API keys) before they reach the database.
///
/// The stored form is base64 of `nonce || ciphertext`, AES-256-GCM under a
/// key derived from the server's configured secret.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64.decode(sealed)?;
        if bytes.len() <= NONCE_LEN {
            return Err(anyhow!("Sealed secret too short: {} bytes", bytes.len()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_key_is_not_stored_in_the_clear() {
        let cipher = SecretCipher::from_secret("server secret");
        let sealed = cipher.seal("sk-or-v1-abc").unwrap();

        assert!(!sealed.contains("sk-or-v1-abc"));
        assert_ne!(sealed, cipher.seal("sk-or-v1-abc").unwrap());
        assert_eq!(cipher.open(&sealed).unwrap(), "sk-or-v1-abc");
    }

    #[test]
    fn other_secret_cannot_open() {
        let sealed = SecretCipher::from_secret("one").seal("sk-1").unwrap();
        assert!(SecretCipher::from_secret("two").open(&sealed).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let cipher = SecretCipher::from_secret("s");
        assert!(cipher.open("not base64!").is_err());
        assert!(cipher.open(&BASE64.encode([0u8; 4])).is_err());
    }
}
