//! Session cryptography for the `dh-ietf1024-sha256-aes128-cbc-pkcs7` algorithm.
//!
//! Diffie-Hellman over the IETF 1024-bit MODP group (generator 2), HKDF-SHA256
//! key derivation, and AES-128-CBC with PKCS#7 padding for secret payloads.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::RngCore;
use sesame_core::SecretBytes;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{Result, SecretError};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Size of the derived AES key.
pub const KEY_SIZE: usize = 16;

/// Size of the AES-CBC initialisation vector.
pub const IV_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;
const PRIME_SIZE: usize = 128;

/// RFC 2409 second Oakley group.
const MODP_1024_PRIME: [u8; PRIME_SIZE] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xc9, 0x0f, 0xda, 0xa2, 0x21, 0x68, 0xc2, 0x34,
    0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74,
    0x02, 0x0b, 0xbe, 0xa6, 0x3b, 0x13, 0x9b, 0x22,
    0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b,
    0x30, 0x2b, 0x0a, 0x6d, 0xf2, 0x5f, 0x14, 0x37,
    0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6,
    0xf4, 0x4c, 0x42, 0xe9, 0xa6, 0x37, 0xed, 0x6b,
    0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5,
    0xae, 0x9f, 0x24, 0x11, 0x7c, 0x4b, 0x1f, 0xe6,
    0x49, 0x28, 0x66, 0x51, 0xec, 0xe6, 0x53, 0x81,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

const GENERATOR: u32 = 2;

static PRIME: Lazy<BigUint> = Lazy::new(|| BigUint::from_bytes_be(&MODP_1024_PRIME));

/// An ephemeral Diffie-Hellman keypair.
pub struct DhKeypair {
    private: SecretBytes,
    public: Vec<u8>,
}

impl DhKeypair {
    /// Generate a fresh keypair with a private exponent in `[2, p-2]`.
    pub fn generate() -> Self {
        let prime = &*PRIME;
        let mut raw = vec![0u8; PRIME_SIZE];
        rand::thread_rng().fill_bytes(&mut raw);

        let range = prime - 3u32;
        let exponent = BigUint::from_bytes_be(&raw) % range + 2u32;
        raw.zeroize();

        let public = BigUint::from(GENERATOR).modpow(&exponent, prime).to_bytes_be();
        Self {
            private: SecretBytes::new(exponent.to_bytes_be()),
            public,
        }
    }

    /// Public value as unsigned big-endian bytes.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Derive the 16-byte session key from the peer's public value.
    ///
    /// Returns `None` for degenerate peer values outside `(1, p-1)`.
    pub fn derive_session_key(&self, peer_public: &[u8]) -> Option<SecretBytes> {
        let prime = &*PRIME;
        let peer = BigUint::from_bytes_be(peer_public);
        if peer <= BigUint::from(1u32) || peer >= prime - 1u32 {
            return None;
        }

        let exponent = BigUint::from_bytes_be(self.private.expose_secret());
        let shared = peer.modpow(&exponent, prime);
        session_key_from_shared(&shared)
    }
}

impl std::fmt::Debug for DhKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeypair")
            .field("public_len", &self.public.len())
            .finish_non_exhaustive()
    }
}

/// HKDF-SHA256 over the shared secret left-padded to the prime length.
fn session_key_from_shared(shared: &BigUint) -> Option<SecretBytes> {
    let mut bytes = shared.to_bytes_be();
    if bytes.len() > PRIME_SIZE {
        bytes.zeroize();
        return None;
    }
    let mut ikm = vec![0u8; PRIME_SIZE - bytes.len()];
    ikm.extend_from_slice(&bytes);
    bytes.zeroize();

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = vec![0u8; KEY_SIZE];
    let expanded = hk.expand(&[], &mut okm);
    ikm.zeroize();

    expanded.ok().map(|_| SecretBytes::new(okm))
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Returns `(iv, ciphertext)`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut iv = vec![0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes128CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| SecretError::protocol(format!("Couldn't set up AES cipher: {}", e)))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok((iv, ciphertext))
}

/// Decrypt a payload produced by [`encrypt`].
///
/// Returns `None` unless the IV is 16 bytes, the ciphertext is a non-empty
/// multiple of the block size, and the padding is valid.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Option<SecretBytes> {
    if iv.len() != IV_SIZE {
        return None;
    }
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return None;
    }

    let cipher = Aes128CbcDec::new_from_slices(key, iv).ok()?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .ok()
        .map(SecretBytes::new)
}
