//! Display-name recovery.
//!
//! Clients join with their name encrypted under the room identifier. The
//! relay only needs the plaintext for its own logs, so every failure here
//! degrades to an empty name rather than rejecting the client.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

const BLOCK_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("ciphertext length {0} is not a multiple of the block size")]
    BlockLength(usize),
}

/// Symmetric cipher keyed by a shared secret string
#[cfg_attr(test, mockall::automock)]
pub trait Cipher: Send + Sync {
    fn decrypt(&self, secret: &str, payload: &str) -> Result<String, CipherError>;
    // Only tests produce ciphertext; the relay itself just decrypts
    #[allow(dead_code)]
    fn encrypt(&self, secret: &str, plaintext: &str) -> String;
}

/// AES-128/ECB with PKCS#5 padding, keyed by the first 16 bytes of SHA-1(secret),
/// ciphertext carried as standard base64.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesEcbCipher;

impl AesEcbCipher {
    fn key(secret: &str) -> Aes128 {
        let digest = Sha1::digest(secret.as_bytes());
        Aes128::new(GenericArray::from_slice(&digest[..BLOCK_SIZE]))
    }
}

impl Cipher for AesEcbCipher {
    fn decrypt(&self, secret: &str, payload: &str) -> Result<String, CipherError> {
        let mut data = STANDARD.decode(payload)?;
        if data.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::BlockLength(data.len()));
        }

        let cipher = Self::key(secret);
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        Ok(String::from_utf8_lossy(unpad(&data)).into_owned())
    }

    fn encrypt(&self, secret: &str, plaintext: &str) -> String {
        let mut data = pad(plaintext.as_bytes());

        let cipher = Self::key(secret);
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }

        STANDARD.encode(data)
    }
}

#[allow(dead_code)]
fn pad(data: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding, padding as u8);
    padded
}

// A trailing byte larger than the data itself means the data was never padded.
fn unpad(data: &[u8]) -> &[u8] {
    match data.last() {
        Some(&padding) if usize::from(padding) <= data.len() => {
            &data[..data.len() - usize::from(padding)]
        }
        _ => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_names_under_room_secret() {
        let cipher = AesEcbCipher;
        let encrypted = cipher.encrypt("r1", "Zezima");

        assert_ne!(encrypted, "Zezima");
        assert_eq!(cipher.decrypt("r1", &encrypted).unwrap(), "Zezima");
    }

    #[test]
    fn encryption_is_deterministic_per_secret() {
        let cipher = AesEcbCipher;

        assert_eq!(cipher.encrypt("r1", "Na"), cipher.encrypt("r1", "Na"));
        assert_ne!(cipher.encrypt("r1", "Na"), cipher.encrypt("r2", "Na"));
    }

    #[test]
    fn block_aligned_plaintext_gets_a_full_padding_block() {
        let cipher = AesEcbCipher;
        let encrypted = cipher.encrypt("room", "0123456789abcdef");

        assert_eq!(STANDARD.decode(&encrypted).unwrap().len(), 2 * BLOCK_SIZE);
        assert_eq!(cipher.decrypt("room", &encrypted).unwrap(), "0123456789abcdef");
    }

    #[test]
    fn rejects_non_base64_payload() {
        let err = AesEcbCipher.decrypt("r1", "Na!").unwrap_err();
        assert!(matches!(err, CipherError::Base64(_)));
    }

    #[test]
    fn rejects_partial_blocks() {
        let payload = STANDARD.encode([0u8; 5]);
        let err = AesEcbCipher.decrypt("r1", &payload).unwrap_err();
        assert!(matches!(err, CipherError::BlockLength(5)));
    }

    #[test]
    fn unpad_leaves_unpadded_data_alone() {
        assert_eq!(unpad(&[1, 2, 200]), [1u8, 2, 200].as_slice());
        assert_eq!(unpad(&[1, 2, 2]), [1u8].as_slice());
        assert!(unpad(&[]).is_empty());
    }
}
