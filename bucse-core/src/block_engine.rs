//! Block engine (spec §4.7, C7): file content is split into fixed-size
//! plaintext blocks, each independently encrypted and stored under a
//! random content-address (spec §3, §6.1). Grounded in the teacher's
//! "buffer every write, assemble and upload once on release" strategy
//! (`client/src/fs/write.rs`), generalized to a chunked store instead of a
//! single whole-file PUT.

use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;

use crate::cache::BlockCache;
use crate::cipher::Cipher;
use crate::error::{BucseError, Result};
use crate::store::ObjectStore;

/// Block size bounds (spec §4.7.1), matching the original's
/// `getBlockSize()` (`operations/flush.c`).
const MIN_BLOCK_SIZE: i64 = 512;
const MAX_BLOCK_SIZE: i64 = 128 * 1024 * 1024;
const STORAGE_NAME_BYTES: usize = 20; // 160-bit identifiers (spec §3.2)

pub fn storage_name() -> String {
    let mut bytes = [0u8; STORAGE_NAME_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn largest_pow2_leq(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    let mut p = 1i64;
    while p * 2 <= n {
        p *= 2;
    }
    p
}

/// Picks a block size for a file of `total_len` bytes: the largest power
/// of two no greater than `total_len / 4`, clamped to `[MIN_BLOCK_SIZE,
/// MAX_BLOCK_SIZE]` (spec §4.7.1). A fresh empty file has no block size.
pub fn choose_block_size(total_len: i64) -> i64 {
    if total_len == 0 {
        return 0;
    }
    largest_pow2_leq(total_len / 4).clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

pub struct BlockEngine {
    store: Arc<dyn ObjectStore>,
    cipher: Arc<dyn Cipher>,
    passphrase: Option<String>,
}

impl BlockEngine {
    pub fn new(store: Arc<dyn ObjectStore>, cipher: Arc<dyn Cipher>, passphrase: Option<String>) -> Self {
        BlockEngine {
            store,
            cipher,
            passphrase,
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.encrypt(plaintext, self.passphrase.as_deref())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt(ciphertext, self.passphrase.as_deref())
    }

    /// Reads `len` bytes starting at `offset` out of a file described by
    /// its ordered block list, total size, and block size (spec §4.7 read
    /// path: block range -> cache -> decrypt -> assemble).
    pub async fn read(
        &self,
        cache: &parking_lot::Mutex<BlockCache>,
        content: &[String],
        size: i64,
        block_size: i64,
        offset: i64,
        len: usize,
    ) -> Result<Vec<u8>> {
        if offset >= size || len == 0 {
            return Ok(Vec::new());
        }
        let end = ((offset as i64) + len as i64).min(size);
        let first_block = (offset / block_size) as usize;
        let last_block = ((end - 1) / block_size) as usize;

        let mut out = Vec::with_capacity((end - offset) as usize);
        for idx in first_block..=last_block {
            let name = content
                .get(idx)
                .ok_or_else(|| BucseError::MalformedAction(format!("missing block index {idx}")))?;
            let plaintext = self.fetch_block(cache, name).await?;

            let block_start = idx as i64 * block_size;
            let want_start = offset.max(block_start) - block_start;
            let want_end = end.min(block_start + block_size) - block_start;
            let want_start = want_start as usize;
            let want_end = (want_end as usize).min(plaintext.len());
            if want_start < want_end {
                out.extend_from_slice(&plaintext[want_start..want_end]);
            }
        }
        Ok(out)
    }

    async fn fetch_block(&self, cache: &parking_lot::Mutex<BlockCache>, name: &str) -> Result<Bytes> {
        if let Some(hit) = cache.lock().get(name) {
            return Ok(hit);
        }
        let ciphertext = self.store.get_storage_file(name).await?;
        let plaintext = Bytes::from(self.decrypt(&ciphertext)?);
        cache.lock().put(name.to_string(), plaintext.clone());
        Ok(plaintext)
    }

    /// Writes back a full new file content buffer, choosing a block size,
    /// re-chunking, and uploading only blocks whose plaintext actually
    /// changed (spec §4.7 flush path: resize policy + block-rewrite
    /// marking). Returns the new content list, size, and block size to
    /// store in the file's next `Action`.
    pub async fn flush(
        &self,
        cache: &parking_lot::Mutex<BlockCache>,
        old_content: &[String],
        old_block_size: i64,
        new_data: &[u8],
    ) -> Result<(Vec<String>, i64, i64)> {
        let size = new_data.len() as i64;
        let block_size = choose_block_size(size);

        let mut new_content = Vec::new();
        let mut offset: i64 = 0;
        let mut idx = 0usize;
        while offset < size {
            let end = (offset + block_size).min(size);
            let chunk = &new_data[offset as usize..end as usize];

            let reused = if block_size == old_block_size {
                self.block_unchanged(cache, old_content.get(idx), chunk).await
            } else {
                None
            };

            let name = match reused {
                Some(name) => name,
                None => {
                    let name = storage_name();
                    let ciphertext = self.encrypt(chunk)?;
                    self.store.put_storage_file(&name, &ciphertext).await?;
                    cache.lock().put(name.clone(), Bytes::copy_from_slice(chunk));
                    name
                }
            };
            new_content.push(name);
            offset = end;
            idx += 1;
        }

        Ok((new_content, size, block_size))
    }

    /// Returns `Some(name)` if the existing block at the same index already
    /// holds exactly `chunk`, avoiding a redundant re-encrypt-and-upload
    /// (spec §4.7 "mark block for rewrite only when its plaintext changed").
    async fn block_unchanged(
        &self,
        cache: &parking_lot::Mutex<BlockCache>,
        existing_name: Option<&String>,
        chunk: &[u8],
    ) -> Option<String> {
        let name = existing_name?;
        let plaintext = self.fetch_block(cache, name).await.ok()?;
        (plaintext.as_ref() == chunk).then(|| name.clone())
    }
}
