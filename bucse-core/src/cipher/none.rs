use super::Cipher;
use crate::error::Result;

/// Identity cipher: ignores the passphrase entirely (spec §4.2).
pub struct NoneCipher;

impl Cipher for NoneCipher {
    fn encrypt(&self, plaintext: &[u8], _passphrase: Option<&str>) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8], _passphrase: Option<&str>) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn needs_passphrase(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let c = NoneCipher;
        let pt = b"hello world";
        let ct = c.encrypt(pt, None).unwrap();
        assert_eq!(ct, pt);
        let back = c.decrypt(&ct, None).unwrap();
        assert_eq!(back, pt);
    }
}
