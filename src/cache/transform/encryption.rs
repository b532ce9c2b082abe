//! Pluggable payload encryption
//!
//! Concrete ciphers are external collaborators; the cache only requires
//! the reversibility contract `decrypt(encrypt(d)) == d`. The default
//! implementation is an HMAC-SHA256 counter-mode keystream with an
//! appended integrity tag; callers with stronger requirements plug in
//! their own [`Encryptor`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::cache::traits::CacheOperationError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 32;

/// Reversible payload cipher
pub trait Encryptor: Send + Sync + 'static {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CacheOperationError>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CacheOperationError>;
}

/// Default cipher: HMAC-SHA256 keystream with integrity tag
///
/// Layout: `nonce (16) || tag (32) || ciphertext`. The tag covers
/// `nonce || ciphertext`, so truncation or bit flips fail decryption
/// instead of yielding garbage plaintext.
pub struct KeystreamEncryptor {
    key: Vec<u8>,
}

impl KeystreamEncryptor {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, CacheOperationError> {
        let key = key.into();
        if key.len() < 16 {
            return Err(CacheOperationError::configuration_error(
                "encryption key must be at least 16 bytes",
            ));
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Result<HmacSha256, CacheOperationError> {
        <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| CacheOperationError::transform_failed(e.to_string()))
    }

    fn apply_keystream(
        &self,
        nonce: &[u8],
        data: &mut [u8],
    ) -> Result<(), CacheOperationError> {
        for (block_index, chunk) in data.chunks_mut(BLOCK_LEN).enumerate() {
            let mut mac = self.mac()?;
            mac.update(nonce);
            mac.update(&(block_index as u64).to_le_bytes());
            let block = mac.finalize().into_bytes();
            for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= pad;
            }
        }
        Ok(())
    }

    fn tag(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CacheOperationError> {
        let mut mac = self.mac()?;
        mac.update(nonce);
        mac.update(ciphertext);
        Ok(mac)
    }
}

impl Encryptor for KeystreamEncryptor {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CacheOperationError> {
        let nonce = Uuid::new_v4().into_bytes();

        let mut ciphertext = data.to_vec();
        self.apply_keystream(&nonce, &mut ciphertext)?;

        let tag = self.tag(&nonce, &ciphertext)?.finalize().into_bytes();

        let mut output = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&tag);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CacheOperationError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CacheOperationError::transform_failed(
                "encrypted payload shorter than header",
            ));
        }
        let (nonce, rest) = data.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        self.tag(nonce, ciphertext)?
            .verify_slice(tag)
            .map_err(|_| CacheOperationError::transform_failed("integrity tag mismatch"))?;

        let mut plaintext = ciphertext.to_vec();
        self.apply_keystream(nonce, &mut plaintext)?;
        Ok(plaintext)
    }
}
