use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose;
use base64::Engine;
use log::*;
use rand::RngCore;
use sha2::{Digest, Sha256};

use commons_error::*;

use crate::dk_aes::{decrypt_aes256, encrypt_aes256, AES_KEY_LEN};
use crate::dk_chacha::{decrypt_cc20, encrypt_cc20};

pub const KEY_LEN: usize = AES_KEY_LEN;
pub const NONCE_SEED_LEN: usize = 8;
pub const CHUNK_NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CypherMode {
    AES,
    CC20,
}

impl CypherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CypherMode::AES => "AES",
            CypherMode::CC20 => "CC20",
        }
    }
}

impl Display for CypherMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CypherMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AES" => Ok(CypherMode::AES),
            "CC20" => Ok(CypherMode::CC20),
            other => Err(BackupError::validation(format!("Unknown cypher mode, mode=[{}]", other))),
        }
    }
}

/// Secret material of one file: a 256 bits key and the seed the chunk nonces derive from.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKeyMaterial {
    pub key: Vec<u8>,
    pub nonce_seed: Vec<u8>,
}

impl FileKeyMaterial {
    /// Randomly generate the key and the nonce seed of a new file
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = vec![0u8; KEY_LEN];
        let mut nonce_seed = vec![0u8; NONCE_SEED_LEN];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut nonce_seed);
        FileKeyMaterial { key, nonce_seed }
    }

    pub fn from_parts(key: Vec<u8>, nonce_seed: Vec<u8>) -> BackupResult<Self> {
        let material = FileKeyMaterial { key, nonce_seed };
        material.validate()?;
        Ok(material)
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.key.len() != KEY_LEN || self.nonce_seed.len() != NONCE_SEED_LEN {
            return Err(BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial));
        }
        Ok(())
    }
}

// Never print the secret
impl Debug for FileKeyMaterial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FileKeyMaterial {{ key: <{} bytes>, nonce_seed: <{} bytes> }}",
            self.key.len(),
            self.nonce_seed.len()
        )
    }
}

///
/// Nonce of the chunk [index] : seed (8 bytes) followed by the index (4 bytes, big endian).
/// Two chunks of the same file never share a nonce.
///
pub fn chunk_nonce(nonce_seed: &[u8], index: u32) -> BackupResult<[u8; CHUNK_NONCE_LEN]> {
    if nonce_seed.len() != NONCE_SEED_LEN {
        return Err(BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial));
    }
    let mut nonce = [0u8; CHUNK_NONCE_LEN];
    nonce[..NONCE_SEED_LEN].copy_from_slice(nonce_seed);
    nonce[NONCE_SEED_LEN..].copy_from_slice(&index.to_be_bytes());
    Ok(nonce)
}

/// Authenticated encryption of the chunk payloads.
/// The engine holds no secret, the key material is always given by the caller.
#[derive(Debug, Clone, Copy)]
pub struct CipherEngine {
    pub mode: CypherMode,
}

impl CipherEngine {
    pub fn new(mode: CypherMode) -> CipherEngine {
        CipherEngine { mode }
    }

    /// Encrypts the chunk [index] of a file.
    /// The same inputs always give the same ciphertext, since the nonce is derived from the seed and the index.
    /// # Returns
    /// * `Ok(Vec<u8>)` - The ciphertext followed by the 16 bytes tag.
    /// * `Err(BackupError::Crypto)` - The key or the seed is malformed.
    pub fn encrypt_chunk(&self, key: &[u8], nonce_seed: &[u8], index: u32, plaintext: &[u8]) -> BackupResult<Vec<u8>> {
        let nonce = chunk_nonce(nonce_seed, index)?;
        match self.mode {
            CypherMode::AES => encrypt_aes256(plaintext, key, &nonce),
            CypherMode::CC20 => encrypt_cc20(plaintext, key, &nonce),
        }
    }

    /// Decrypts the chunk [index] of a file.
    /// A tampered ciphertext, or the wrong key/seed/index, fails with an AuthenticationFailure.
    pub fn decrypt_chunk(&self, key: &[u8], nonce_seed: &[u8], index: u32, ciphertext: &[u8]) -> BackupResult<Vec<u8>> {
        let nonce = chunk_nonce(nonce_seed, index)?;
        let r_plain = match self.mode {
            CypherMode::AES => decrypt_aes256(ciphertext, key, &nonce),
            CypherMode::CC20 => decrypt_cc20(ciphertext, key, &nonce),
        };
        r_plain.map_err(err_fwd!("Cannot decrypt the chunk, index=[{}], mode=[{}]", index, self.mode))
    }

    ///
    /// SHA-256 digest of the data, base64url encoded
    ///
    pub fn checksum(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }
}
