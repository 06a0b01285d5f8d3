use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Key length in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes, prefixed to every ciphertext token.
const NONCE_LENGTH: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key does not match the ciphertext's originating key, or the
    /// supplied key material itself is not a valid key.
    #[error("key does not match the ciphertext")]
    InvalidKey,

    /// The field is not well-formed ciphertext (encoding, length or
    /// payload structure is wrong).
    #[error("value is not well-formed ciphertext")]
    CorruptCiphertext,

    /// Encrypting a value failed inside the cipher. Not expected for
    /// in-memory payloads.
    #[error("encryption failure")]
    EncryptionFailure,
}

/// Symmetric key material sufficient to invert an encryption-based
/// anonymization.
///
/// A fresh key is generated per encryption request and handed back to the
/// caller exactly once; it is never embedded in the transformed dataset
/// and never logged ([`fmt::Debug`] is redacted). Serialization uses the
/// base64 text form also used for key files, and round-trips exactly.
///
/// # Example
///
/// ```
/// use imaging_anonymization::keys::KeyMaterial;
///
/// let key = KeyMaterial::generate();
/// let token = key.encrypt_value("Doe^Jane").unwrap();
/// assert_ne!(token, "Doe^Jane");
/// assert_eq!(key.decrypt_value(&token).unwrap(), "Doe^Jane");
///
/// let other = KeyMaterial::generate();
/// assert!(other.decrypt_value(&token).is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; KEY_LENGTH]);

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

impl KeyMaterial {
    /// Generates a fresh key from the operating system's CSPRNG.
    ///
    /// Every call produces new key material; keys are never reused across
    /// requests.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        Self(key.into())
    }

    /// The serialized text form of the key: base64, as stored in key
    /// files.
    pub fn serialize(&self) -> Vec<u8> {
        BASE64.encode(self.0).into_bytes()
    }

    /// Reconstructs key material from its serialized form.
    ///
    /// Accepts surrounding ASCII whitespace (key files often end with a
    /// newline). Anything that does not decode to exactly [`KEY_LENGTH`]
    /// bytes is rejected with [`KeyError::InvalidKey`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, KeyError> {
        let text = std::str::from_utf8(bytes).map_err(|_| KeyError::InvalidKey)?;
        let raw = BASE64
            .decode(text.trim())
            .map_err(|_| KeyError::InvalidKey)?;
        let key: [u8; KEY_LENGTH] = raw.try_into().map_err(|_| KeyError::InvalidKey)?;
        Ok(Self(key))
    }

    /// Encrypts a field value into a ciphertext token.
    ///
    /// The token is base64 over a fresh random nonce followed by the
    /// AES-256-GCM ciphertext, so encrypting the same value twice yields
    /// different tokens.
    pub fn encrypt_value(&self, plaintext: &str) -> Result<String, KeyError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| KeyError::EncryptionFailure)?;

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypts a ciphertext token back to the original field value.
    ///
    /// Structural problems (bad base64, truncated payload, non-UTF-8
    /// plaintext) are [`KeyError::CorruptCiphertext`]; an authentication
    /// failure on a well-formed token is [`KeyError::InvalidKey`].
    pub fn decrypt_value(&self, token: &str) -> Result<String, KeyError> {
        let payload = BASE64
            .decode(token.trim())
            .map_err(|_| KeyError::CorruptCiphertext)?;
        if payload.len() <= NONCE_LENGTH {
            return Err(KeyError::CorruptCiphertext);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LENGTH);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeyError::InvalidKey)?;
        String::from_utf8(plaintext).map_err(|_| KeyError::CorruptCiphertext)
    }
}

/// Identifier of a single transformation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Append-only per-session store of issued keys, one per encryption
/// request. A new request never overwrites an earlier key; the latest key
/// backs the key download contract, older keys stay retrievable by
/// request id.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    entries: Vec<(RequestId, KeyMaterial)>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: RequestId, key: KeyMaterial) {
        self.entries.push((request, key));
    }

    pub fn get(&self, request: RequestId) -> Option<&KeyMaterial> {
        self.entries
            .iter()
            .find(|(id, _)| *id == request)
            .map(|(_, key)| key)
    }

    /// The most recently issued key, if any.
    pub fn latest(&self) -> Option<&KeyMaterial> {
        self.entries.last().map(|(_, key)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
