//! Crypto module: AES-128-CBC, random IVs and hex helpers.
//!
//! The gateway shares one AES-128 key with its clients. The key only ever
//! protects the authentication handshake: the server issues a random 16-byte
//! challenge, the client encrypts its credential string under the shared key
//! with the challenge as CBC IV, and the server decrypts and compares.
//!
//! Conventions:
//!
//! - **Padding**: plaintext is zero-padded to `len + 16 - len % 16` bytes, so
//!   a block-aligned input still gains one full block of zeros. Decryption does
//!   not strip padding; callers read up to the first NUL.
//! - **IV**: always 16 raw bytes. On the wire it travels as 32 hex digits.
//! - **Hex**: [`to_hex`] emits uppercase; [`from_hex`] accepts either case.
//!
//! Block operations use the RustCrypto `aes` crate; CBC chaining is done here.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES-128 key.
pub type Key = [u8; BLOCK_SIZE];

/// CBC initialisation vector.
pub type Iv = [u8; BLOCK_SIZE];

/// AES-128-CBC cipher bound to a fixed key.
#[derive(Clone)]
pub struct Cipher {
    aes: Aes128,
}

impl Cipher {
    pub fn new(key: &Key) -> Self {
        Self {
            aes: Aes128::new(key.into()),
        }
    }

    /// Build a cipher from a 32-digit hex key as stored in settings.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CryptoError> {
        let key = parse_key(key_hex)?;
        Ok(Self::new(&key))
    }

    /// Encrypt `plaintext` with zero padding. Output length is
    /// [`padded_len`]`(plaintext.len())`.
    pub fn encrypt(&self, iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; padded_len(plaintext.len())];
        out[..plaintext.len()].copy_from_slice(plaintext);

        let mut chain = *iv;
        for block in out.chunks_mut(BLOCK_SIZE) {
            xor_in_place(block, &chain);
            self.aes.encrypt_block(block.into());
            chain.copy_from_slice(block);
        }
        out
    }

    /// Decrypt `ciphertext`. Padding is left in place.
    pub fn decrypt(&self, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidLength);
        }

        let mut out = ciphertext.to_vec();
        let mut chain = *iv;
        for block in out.chunks_mut(BLOCK_SIZE) {
            let mut next_chain = [0u8; BLOCK_SIZE];
            next_chain.copy_from_slice(block);
            self.aes.decrypt_block(block.into());
            xor_in_place(block, &chain);
            chain = next_chain;
        }
        Ok(out)
    }
}

impl core::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        f.write_str("Cipher(AES-128-CBC)")
    }
}

/// Length of the zero-padded buffer for `len` plaintext bytes.
pub const fn padded_len(len: usize) -> usize {
    len + BLOCK_SIZE - len % BLOCK_SIZE
}

/// Fresh random IV (used as the per-client auth challenge).
pub fn generate_iv() -> Iv {
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Fresh random AES-128 key.
pub fn generate_key() -> Key {
    let mut key = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Uppercase hex, two digits per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decode hex in either case. Odd length or non-hex digits are rejected.
pub fn from_hex(s: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(s).map_err(|_| CryptoError::InvalidHex)
}

/// Decode exactly 16 bytes of hex (an IV or a key).
pub fn parse_key(s: &str) -> Result<Key, CryptoError> {
    let mut key = [0u8; BLOCK_SIZE];
    hex::decode_to_slice(s, &mut key).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { .. } => CryptoError::InvalidHex,
        _ => CryptoError::InvalidKeyLength,
    })?;
    Ok(key)
}

/// Compare two byte strings without early exit on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn xor_in_place(block: &mut [u8], other: &[u8; BLOCK_SIZE]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}
