use orion::hazardous::aead::chacha20poly1305::{open, seal, Nonce, SecretKey};
use orion::hazardous::mac::poly1305::POLY1305_OUTSIZE;

use commons_error::{BackupError, BackupResult, CryptoErrorKind};

pub const CC20_KEY_LEN: usize = 32;
pub const CC20_NONCE_LEN: usize = 12;

fn key_and_nonce(key: &[u8], nonce: &[u8]) -> BackupResult<(SecretKey, Nonce)> {
    if key.len() != CC20_KEY_LEN || nonce.len() != CC20_NONCE_LEN {
        return Err(BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial));
    }
    let key = SecretKey::from_slice(key).map_err(|_| BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial))?;
    let nonce = Nonce::from_slice(nonce).map_err(|_| BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial))?;
    Ok((key, nonce))
}

/// Encrypts the plaintext with ChaCha20-Poly1305 (IETF, 12 bytes nonce).
///
/// ## Format
///
/// {0,n: ciphertext} {n,n+16: tag}
///
/// Unlike the password based routines, the nonce is given by the caller and is not part of the output.
pub fn encrypt_cc20(plaintext: &[u8], key: &[u8], nonce: &[u8]) -> BackupResult<Vec<u8>> {
    let (key, nonce) = key_and_nonce(key, nonce)?;

    let output_len = match plaintext.len().checked_add(POLY1305_OUTSIZE) {
        Some(len) => len,
        None => return Err(BackupError::validation("Plaintext is too long")),
    };

    let mut output = vec![0u8; output_len];
    seal(&key, &nonce, plaintext, None, &mut output)
        .map_err(|_| BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial))?;

    Ok(output)
}

/// Decrypts the ciphertext (+ tag) with ChaCha20-Poly1305
pub fn decrypt_cc20(ciphertext: &[u8], key: &[u8], nonce: &[u8]) -> BackupResult<Vec<u8>> {
    let (key, nonce) = key_and_nonce(key, nonce)?;

    if ciphertext.len() < POLY1305_OUTSIZE {
        return Err(BackupError::Crypto(CryptoErrorKind::AuthenticationFailure));
    }

    let mut output = vec![0u8; ciphertext.len() - POLY1305_OUTSIZE];
    open(&key, &nonce, ciphertext, None, &mut output)
        .map_err(|_| BackupError::Crypto(CryptoErrorKind::AuthenticationFailure))?;
    Ok(output)
}
