//! Encryption collaborator interface. The core never implements ciphers; it hands
//! plaintext plus an authorization context to an external provider and stores
//! whatever ciphertext comes back.

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::model::{DataCategory, Role};

/// Additional authenticated data bound into every ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub owner: String,
    pub author: String,
    pub author_role: Role,
    pub category: DataCategory,
    pub created_at: i64,
}

pub trait EncryptionProvider: Send + Sync {
    /// Encrypt `plaintext` under `identity` (the data owner's address).
    fn encrypt(&self, plaintext: &[u8], identity: &str, auth: &AuthContext) -> CoreResult<Vec<u8>>;

    /// Decrypt for `identity`. `None` means the ciphertext is not decryptable for that
    /// identity (ownership or authorization mismatch); it is not an error.
    fn decrypt(&self, ciphertext: &[u8], identity: &str) -> Option<Vec<u8>>;
}
