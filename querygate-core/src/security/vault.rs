//! Credential vault: AES-256-GCM with PBKDF2-HMAC-SHA256 key derivation.
//!
//! Connection descriptors are serialized to JSON, encrypted, and persisted as
//! an [`EncryptedBlob`]. Decryption happens only at the moment of use and the
//! plaintext buffer is zeroed as soon as the descriptor has been rebuilt.
//!
//! # Security Guarantees
//! - Fresh random salt and nonce on every encryption (not idempotent)
//! - The authentication tag is verified before any plaintext is accepted
//! - Derived keys and plaintext buffers are zeroed on drop
//! - The master secret is injected at construction and never formatted
//!
//! # Cryptographic Parameters
//! - Key derivation: PBKDF2-HMAC-SHA256, 100 000 iterations, 64-byte salt
//! - Cipher: AES-256-GCM, 128-bit nonce, 128-bit tag

use crate::error::QueryGateError;
use crate::models::ConnectionDescriptor;
use aes_gcm::{
    AesGcm, Key, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng, consts::U16, rand_core::RngCore},
    aes::Aes256,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroizing;

/// AES-256-GCM with a 16-byte nonce.
type VaultCipher = AesGcm<Aes256, U16>;

/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Per-record salt length in bytes.
pub const SALT_SIZE: usize = 64;

/// Nonce (initialization vector) length: 128 bits.
pub const NONCE_SIZE: usize = 16;

/// Authentication tag length: 128 bits.
pub const TAG_SIZE: usize = 16;

/// AES-256 key length.
const KEY_SIZE: usize = 32;

/// Minimum accepted master secret length in bytes.
pub const MIN_MASTER_SECRET_LEN: usize = 16;

/// Environment variable holding the master secret.
pub const MASTER_SECRET_ENV: &str = "QUERYGATE_ENCRYPTION_KEY";

/// Process-wide master secret for key derivation.
///
/// Cloning shares the same zeroizing allocation. `Debug` never prints it.
#[derive(Clone)]
pub struct MasterSecret(Arc<Zeroizing<String>>);

impl MasterSecret {
    /// Wraps a secret value.
    ///
    /// # Errors
    /// Returns a configuration error if the secret is shorter than
    /// [`MIN_MASTER_SECRET_LEN`] bytes.
    pub fn new(secret: impl Into<String>) -> crate::Result<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.len() < MIN_MASTER_SECRET_LEN {
            return Err(QueryGateError::configuration(format!(
                "Master secret must be at least {MIN_MASTER_SECRET_LEN} bytes"
            )));
        }
        Ok(Self(Arc::new(secret)))
    }

    /// Reads the secret from [`MASTER_SECRET_ENV`].
    ///
    /// A missing secret is a startup failure, not a per-request error.
    ///
    /// # Errors
    /// Returns a configuration error if the variable is unset, empty or too
    /// short.
    pub fn from_env() -> crate::Result<Self> {
        match std::env::var(MASTER_SECRET_ENV) {
            Ok(value) if !value.is_empty() => Self::new(value),
            _ => Err(QueryGateError::configuration(format!(
                "{MASTER_SECRET_ENV} is not set"
            ))),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(****)")
    }
}

/// Encrypted-at-rest representation of a connection descriptor.
///
/// Every field is hex-encoded in JSON. The field aliases accept the
/// `encrypted`/`iv`/`tag` names used by earlier exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    /// Encrypted descriptor JSON (tag stored separately)
    #[serde(with = "hex", alias = "encrypted")]
    pub ciphertext: Vec<u8>,
    /// Random 128-bit nonce
    #[serde(with = "hex", alias = "iv")]
    pub initialization_vector: Vec<u8>,
    /// Random 64-byte PBKDF2 salt
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    /// 128-bit GCM authentication tag
    #[serde(with = "hex", alias = "tag")]
    pub authentication_tag: Vec<u8>,
}

impl EncryptedBlob {
    /// Checks field lengths before any key derivation happens.
    fn validate(&self) -> crate::Result<()> {
        if self.initialization_vector.len() != NONCE_SIZE {
            return Err(QueryGateError::decryption(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                self.initialization_vector.len()
            )));
        }
        if self.authentication_tag.len() != TAG_SIZE {
            return Err(QueryGateError::decryption(format!(
                "Invalid authentication tag length: expected {}, got {}",
                TAG_SIZE,
                self.authentication_tag.len()
            )));
        }
        if self.salt.len() != SALT_SIZE {
            return Err(QueryGateError::decryption(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_SIZE,
                self.salt.len()
            )));
        }
        Ok(())
    }
}

/// Key derivation parameters.
///
/// Lengths are fixed; only the PBKDF2 work factor can be lowered, and only
/// blobs written with the same work factor decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultParams {
    iterations: u32,
}

impl VaultParams {
    /// Parameters with a custom iteration count (minimum 1).
    ///
    /// Intended for tests and fixtures; production vaults use
    /// [`VaultParams::default`].
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    /// PBKDF2 iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

/// Encrypts and decrypts connection descriptors.
///
/// Stateless apart from the read-only master secret, so one vault can be
/// shared by any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    secret: MasterSecret,
    params: VaultParams,
}

impl CredentialVault {
    /// Creates a vault around an injected master secret.
    pub fn new(secret: MasterSecret) -> Self {
        Self::with_params(secret, VaultParams::default())
    }

    /// Creates a vault with explicit key derivation parameters.
    pub fn with_params(secret: MasterSecret, params: VaultParams) -> Self {
        Self { secret, params }
    }

    /// Active key derivation parameters.
    pub fn params(&self) -> VaultParams {
        self.params
    }

    /// Encrypts a descriptor with a fresh salt and nonce.
    ///
    /// # Errors
    /// Returns an encryption error if serialization or the cipher fails.
    pub fn encrypt(&self, descriptor: &ConnectionDescriptor) -> crate::Result<EncryptedBlob> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(descriptor)
                .map_err(|e| QueryGateError::serialization("Failed to encode descriptor", e))?,
        );
        self.encrypt_bytes(&plaintext)
    }

    /// Decrypts a blob back into a descriptor.
    ///
    /// # Errors
    /// Returns a decryption error if any field is malformed, the tag does not
    /// verify, or the plaintext is not a descriptor. No partial plaintext is
    /// ever returned.
    ///
    /// Payloads written by the connection form (`type`, flat credentials,
    /// string port) are normalised the same way as incoming descriptors.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> crate::Result<ConnectionDescriptor> {
        let plaintext = self.decrypt_bytes(blob)?;
        serde_json::from_slice::<serde_json::Value>(&plaintext)
            .ok()
            .and_then(|value| ConnectionDescriptor::from_value(value).ok())
            .ok_or_else(|| QueryGateError::decryption("Decrypted payload is not a descriptor"))
    }

    fn encrypt_bytes(&self, plaintext: &[u8]) -> crate::Result<EncryptedBlob> {
        let mut salt = vec![0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(&salt);
        let cipher = VaultCipher::new(Key::<VaultCipher>::from_slice(&*key));
        let nonce = VaultCipher::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| QueryGateError::encryption("Cipher rejected the payload"))?;

        // AES-GCM appends the tag to the ciphertext
        let split_at = sealed.len().checked_sub(TAG_SIZE).ok_or_else(|| {
            QueryGateError::encryption("Cipher output shorter than authentication tag")
        })?;
        let (payload, tag) = sealed.split_at(split_at);

        Ok(EncryptedBlob {
            ciphertext: payload.to_vec(),
            initialization_vector: nonce.to_vec(),
            salt,
            authentication_tag: tag.to_vec(),
        })
    }

    fn decrypt_bytes(&self, blob: &EncryptedBlob) -> crate::Result<Zeroizing<Vec<u8>>> {
        blob.validate()?;

        let key = self.derive_key(&blob.salt);
        let cipher = VaultCipher::new(Key::<VaultCipher>::from_slice(&*key));
        let nonce = Nonce::<U16>::from_slice(&blob.initialization_vector);

        let mut sealed = Vec::with_capacity(blob.ciphertext.len().saturating_add(TAG_SIZE));
        sealed.extend_from_slice(&blob.ciphertext);
        sealed.extend_from_slice(&blob.authentication_tag);

        cipher
            .decrypt(nonce, sealed.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| {
                QueryGateError::decryption("Authentication failed (wrong key or corrupted data)")
            })
    }

    fn derive_key(&self, salt: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.secret.as_bytes(),
            salt,
            self.params.iterations,
            &mut *key,
        );
        key
    }
}
