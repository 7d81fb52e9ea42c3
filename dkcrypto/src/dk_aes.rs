use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

use commons_error::{BackupResult, BackupError, CryptoErrorKind};

pub const AES_KEY_LEN: usize = 32;
pub const AES_NONCE_LEN: usize = 12;
pub const AES_TAG_LEN: usize = 16;

fn build_cipher(key: &[u8]) -> BackupResult<Aes256Gcm> {
    if key.len() != AES_KEY_LEN {
        return Err(BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial))
}

fn check_nonce(nonce: &[u8]) -> BackupResult<&Nonce<aes_gcm::aead::consts::U12>> {
    if nonce.len() != AES_NONCE_LEN {
        return Err(BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial));
    }
    Ok(Nonce::from_slice(nonce))
}

/// Encrypts the plaintext with AES-256 in GCM mode.
///
/// ## Arguments
/// - `plaintext`: The plaintext to encrypt
/// - `key`: The 32 bytes key
/// - `nonce`: The 12 bytes nonce, it must never be used twice with the same key
///
/// ## Returns
/// The ciphertext + Tag (16 bytes)
pub fn encrypt_aes256(plaintext: &[u8], key: &[u8], nonce: &[u8]) -> BackupResult<Vec<u8>> {
    let cipher = build_cipher(key)?;
    let nonce = check_nonce(nonce)?;
    let mut buffer: Vec<u8> = Vec::with_capacity(plaintext.len() + AES_TAG_LEN);
    buffer.extend_from_slice(plaintext);
    cipher
        .encrypt_in_place(nonce, b"", &mut buffer)
        .map_err(|_| BackupError::Crypto(CryptoErrorKind::InvalidKeyMaterial))?;
    Ok(buffer)
}

/// Decrypts the ciphertext (+ Tag) with AES-256 in GCM mode.
///
/// Any alteration of the data, or a wrong key/nonce, ends in an AuthenticationFailure.
pub fn decrypt_aes256(ciphertext: &[u8], key: &[u8], nonce: &[u8]) -> BackupResult<Vec<u8>> {
    let cipher = build_cipher(key)?;
    let nonce = check_nonce(nonce)?;
    if ciphertext.len() < AES_TAG_LEN {
        return Err(BackupError::Crypto(CryptoErrorKind::AuthenticationFailure));
    }
    let mut buffer: Vec<u8> = Vec::from(ciphertext);
    cipher
        .decrypt_in_place(nonce, b"", &mut buffer)
        .map_err(|_| BackupError::Crypto(CryptoErrorKind::AuthenticationFailure))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use commons_error::CryptoErrorKind;

    use crate::dk_aes::{decrypt_aes256, encrypt_aes256};

    const KEY: &[u8; 32] = b"0123456789ABCDEF0123456789ABCDEF";
    const NONCE: &[u8; 12] = b"0123456789AB";

    #[test]
    fn test_encrypt_aes256() {
        let orignal_text = "Un text utf-8 et plus ❤❤  ⡌⠁⠧⠑ ⠼⠁⠒  ⡍⠜⠇⠑⠹⠰⠎ ⡣⠕⠌";
        let r = encrypt_aes256(orignal_text.as_bytes(), KEY, NONCE).unwrap();
        assert_eq!(orignal_text.len() + 16, r.len());
        let bb = decrypt_aes256(&r, KEY, NONCE).unwrap();
        assert_eq!(orignal_text, String::from_utf8_lossy(&bb));
    }

    #[test]
    fn test_wrong_key_length() {
        let err = encrypt_aes256(b"data", b"too short", NONCE).unwrap_err();
        assert_eq!(Some(CryptoErrorKind::InvalidKeyMaterial), err.crypto_kind());
        let err = encrypt_aes256(b"data", KEY, b"0123").unwrap_err();
        assert_eq!(Some(CryptoErrorKind::InvalidKeyMaterial), err.crypto_kind());
    }

    #[test]
    fn test_truncated_ciphertext() {
        let err = decrypt_aes256(b"short", KEY, NONCE).unwrap_err();
        assert_eq!(Some(CryptoErrorKind::AuthenticationFailure), err.crypto_kind());
    }
}
