//! Credential protection.
//!
//! # Security Guarantees
//! - Passwords live in zeroizing containers and never appear in `Debug` output
//! - Descriptors are encrypted at rest with AES-256-GCM
//! - Decrypted plaintext buffers are zeroed after use
//!
//! # Module Structure
//! - `credentials`: login container with masked formatting
//! - `vault`: encryption of connection descriptors under a master secret

mod credentials;
mod vault;

pub use credentials::Credentials;
pub use vault::{
    CredentialVault, EncryptedBlob, MASTER_SECRET_ENV, MIN_MASTER_SECRET_LEN, MasterSecret,
    NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE, TAG_SIZE, VaultParams,
};
