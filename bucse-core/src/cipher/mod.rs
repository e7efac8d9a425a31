//! Cipher Interface (spec §4.2, §6.4).

mod aes_cbc;
mod none;

pub use aes_cbc::AesCbcCipher;
pub use none::NoneCipher;

use crate::error::Result;

/// Capability-set the rest of the core consumes from the cipher (spec
/// §4.2). Two variants exist today (`NoneCipher`, `AesCbcCipher`); both are
/// dispatched through this trait object so the projection/block engine
/// stay oblivious to which is in use (spec §9 "Polymorphism").
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], passphrase: Option<&str>) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8], passphrase: Option<&str>) -> Result<Vec<u8>>;
    fn needs_passphrase(&self) -> bool;
    /// The string stored in `repository.json`'s `encryption` field.
    fn name(&self) -> &'static str;
}

/// Resolves the cipher named in a repository's plaintext control blob
/// (spec §6.2). Unknown names are an `Unsupported` error (spec §7).
pub fn from_name(name: &str) -> Result<Box<dyn Cipher>> {
    match name {
        "none" => Ok(Box::new(NoneCipher)),
        "aes" => Ok(Box::new(AesCbcCipher)),
        _ => Err(crate::error::BucseError::Unsupported("unknown cipher")),
    }
}
