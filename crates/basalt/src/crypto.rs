//! Cryptography for the login handshake.
//!
//! This module covers the pieces the encryption handshake needs:
//! RSA keypairs and PKCS#1 v1.5 encryption, the AES-128-CFB8 stream
//! cipher that wraps the transport after the handshake, and Minecraft's
//! SHA-1 session hash with its non-standard signed hex rendering.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use bytes::Bytes;
use num_bigint::BigInt;
use rand::Rng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::Result;

/// RSA key size in bits.
const RSA_KEY_SIZE: usize = 1024;

/// Size of the symmetric shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 16;

/// Convert wire-format (DER `SubjectPublicKeyInfo`) public key bytes into
/// an [`RsaPublicKey`].
///
/// # Errors
///
/// Returns an error if the bytes are not a valid DER public key.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey> {
    Ok(RsaPublicKey::from_public_key_der(der)?)
}

/// RSA-encrypt `data` against the peer's public key (PKCS#1 v1.5).
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn rsa_encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    Ok(key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)?)
}

/// Server-side RSA keypair for the encryption handshake.
pub struct ServerKeys {
    /// RSA private key for decrypting handshake responses.
    private_key: RsaPrivateKey,
    /// RSA public key, DER-encoded as sent on the wire.
    public_key_der: Bytes,
}

impl ServerKeys {
    /// Generate a new keypair.
    ///
    /// # Errors
    ///
    /// Returns an error if RSA key generation fails.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_SIZE)?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_der = public_key.to_public_key_der()?.into_vec();

        Ok(Self {
            private_key,
            public_key_der: Bytes::from(public_key_der),
        })
    }

    /// Get the DER-encoded public key.
    #[must_use]
    pub fn public_key_der(&self) -> Bytes {
        self.public_key_der.clone()
    }

    /// RSA-decrypt a handshake response field.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.private_key.decrypt(Pkcs1v15Encrypt, data)?)
    }
}

/// Generate a random 16-byte shared secret.
#[must_use]
pub fn generate_shared_secret() -> [u8; SHARED_SECRET_SIZE] {
    let mut secret = [0u8; SHARED_SECRET_SIZE];
    rand::thread_rng().fill(&mut secret);
    secret
}

/// Calculate the session-binding hash.
///
/// The hash is `SHA1(server_id ++ shared_secret ++ public_key)`, rendered
/// in Minecraft's signed hex digest format.
#[must_use]
pub fn session_hash(server_id: &str, shared_secret: &[u8], public_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key);
    hex_digest(&hasher.finalize())
}

/// Render a SHA-1 digest in Minecraft's signed hex format.
///
/// The 20 digest bytes are treated as a two's-complement signed big
/// integer and printed in lowercase hex without leading zeros; negative
/// values get a `-` prefix.
#[must_use]
pub fn hex_digest(hash: &[u8]) -> String {
    let bigint = BigInt::from_signed_bytes_be(hash);
    format!("{bigint:x}")
}

/// AES-128-CFB8 cipher state.
///
/// CFB8 mode encrypts/decrypts one byte at a time, using the previous
/// ciphertext byte to update the IV for the next byte. Minecraft uses the
/// shared secret as both key and IV.
pub struct Cfb8Cipher {
    cipher: Aes128,
    iv: [u8; 16],
}

impl Cfb8Cipher {
    /// Create a new CFB8 cipher keyed with the shared secret.
    #[must_use]
    pub fn new(secret: &[u8; SHARED_SECRET_SIZE]) -> Self {
        let cipher = Aes128::new(GenericArray::from_slice(secret));
        Self { cipher, iv: *secret }
    }

    /// Encrypt data in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = GenericArray::clone_from_slice(&self.iv);
            self.cipher.encrypt_block(&mut block);

            let ciphertext_byte = *byte ^ block[0];
            *byte = ciphertext_byte;

            self.iv.copy_within(1.., 0);
            self.iv[15] = ciphertext_byte;
        }
    }

    /// Decrypt data in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = GenericArray::clone_from_slice(&self.iv);
            self.cipher.encrypt_block(&mut block);

            let ciphertext_byte = *byte;
            *byte ^= block[0];

            self.iv.copy_within(1.., 0);
            self.iv[15] = ciphertext_byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_digest() {
        // Test vectors from wiki.vg
        // "Notch" should produce: 4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48
        let hash1: [u8; 20] = [
            0x4e, 0xd1, 0xf4, 0x6b, 0xbe, 0x04, 0xbc, 0x75, 0x6b, 0xcb, 0x17, 0xc0, 0xc7, 0xce,
            0x3e, 0x46, 0x32, 0xf0, 0x6a, 0x48,
        ];
        assert_eq!(hex_digest(&hash1), "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48");

        // "jeb_" should produce: -7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1
        let hash2: [u8; 20] = [
            0x83, 0x62, 0xa4, 0xff, 0xbb, 0x3e, 0xcf, 0xef, 0x65, 0xa2, 0x84, 0xa0, 0x4a, 0x3c,
            0xe8, 0x3f, 0xd4, 0xb1, 0xd7, 0x3f,
        ];
        assert_eq!(hex_digest(&hash2), "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1");
    }

    #[test]
    fn test_session_hash_known_value() {
        // SHA1("Notch") rendered as a signed digest
        assert_eq!(
            session_hash("Notch", b"", b""),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
    }

    #[test]
    fn test_cfb8_cipher_roundtrip() {
        let secret = [0x01u8; 16];

        let mut encryptor = Cfb8Cipher::new(&secret);
        let mut decryptor = Cfb8Cipher::new(&secret);

        let original = b"Hello, Minecraft!".to_vec();
        let mut data = original.clone();

        encryptor.encrypt(&mut data);
        assert_ne!(data, original);

        decryptor.decrypt(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_cfb8_cipher_streams_across_calls() {
        let secret = [0x42u8; 16];

        let mut one_shot = Cfb8Cipher::new(&secret);
        let mut chunked = Cfb8Cipher::new(&secret);

        let mut whole = b"split across several writes".to_vec();
        one_shot.encrypt(&mut whole);

        let mut pieces = b"split across several writes".to_vec();
        let (a, rest) = pieces.split_at_mut(5);
        let (b, c) = rest.split_at_mut(9);
        chunked.encrypt(a);
        chunked.encrypt(b);
        chunked.encrypt(c);

        assert_eq!(pieces, whole);
    }

    #[test]
    fn test_rsa_handshake_fields_roundtrip() {
        let keys = ServerKeys::generate().unwrap();
        let public = public_key_from_der(&keys.public_key_der()).unwrap();

        let secret = generate_shared_secret();
        let encrypted = rsa_encrypt(&public, &secret).unwrap();
        assert_eq!(keys.decrypt(&encrypted).unwrap(), secret);
    }
}
