//! WinZip AES entry encryption.
//!
//! An encrypted entry's payload is laid out as
//! `salt | password verifier (2) | ciphertext | authentication code (10)`.
//! The salt length depends on the key strength. The key material is derived
//! with PBKDF2-HMAC-SHA1 (1000 iterations) and split into the AES key, the
//! HMAC key and the two verifier bytes. The keystream is AES-CTR with a
//! little-endian block counter starting at 1, and the authentication code is
//! the first 10 bytes of HMAC-SHA1 over the ciphertext.

use ::aes::cipher::{KeyIvInit, StreamCipher};
use ::aes::{Aes128, Aes192, Aes256};
use ctr::Ctr128LE;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// PBKDF2 iteration count fixed by the WinZip format
pub const KDF_ITERATIONS: u32 = 1000;

/// Length of the password verification value
pub const VERIFIER_LEN: usize = 2;

/// Length of the truncated HMAC-SHA1 authentication code
pub const AUTH_CODE_LEN: usize = 10;

/// AES key strength as stored in the WinZip extra field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AesStrength::Aes128 => 1,
            AesStrength::Aes192 => 2,
            AesStrength::Aes256 => 3,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }

    /// Bytes added to an entry's payload by encryption
    pub fn overhead(self) -> u64 {
        (self.salt_len() + VERIFIER_LEN + AUTH_CODE_LEN) as u64
    }
}

/// Key material derived from a password and salt
pub struct DerivedKey {
    pub encryption_key: Vec<u8>,
    pub mac_key: Vec<u8>,
    pub verifier: [u8; VERIFIER_LEN],
}

/// Derive the AES key, HMAC key and password verifier for one entry.
pub fn derive_key(password: &[u8], salt: &[u8], strength: AesStrength) -> DerivedKey {
    let key_len = strength.key_len();
    let mut derived = vec![0u8; key_len * 2 + VERIFIER_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, KDF_ITERATIONS, &mut derived);

    let verifier = [derived[key_len * 2], derived[key_len * 2 + 1]];
    let mac_key = derived[key_len..key_len * 2].to_vec();
    derived.truncate(key_len);

    DerivedKey {
        encryption_key: derived,
        mac_key,
        verifier,
    }
}

enum Keystream {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

impl Keystream {
    fn new(strength: AesStrength, key: &[u8]) -> Result<Self> {
        let mut iv = [0u8; 16];
        iv[0] = 1;
        let keystream = match strength {
            AesStrength::Aes128 => Ctr128LE::new_from_slices(key, &iv).map(Keystream::Aes128),
            AesStrength::Aes192 => Ctr128LE::new_from_slices(key, &iv).map(Keystream::Aes192),
            AesStrength::Aes256 => Ctr128LE::new_from_slices(key, &iv).map(Keystream::Aes256),
        };
        keystream.map_err(|_| Error::format("invalid AES key length"))
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

fn new_mac(key: &[u8]) -> Result<HmacSha1> {
    <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| Error::format("invalid HMAC key length"))
}

/// Streaming decryptor for one AES entry
pub struct AesDecryptor {
    keystream: Keystream,
    mac: HmacSha1,
}

impl AesDecryptor {
    /// Derive keys from `password` and `salt`, checking the stored verifier.
    ///
    /// A mismatch is reported before any payload byte is decrypted.
    pub fn new(
        password: &[u8],
        strength: AesStrength,
        salt: &[u8],
        verifier: [u8; VERIFIER_LEN],
    ) -> Result<Self> {
        if salt.len() != strength.salt_len() {
            return Err(Error::format(format!(
                "AES salt length {} does not match key strength",
                salt.len()
            )));
        }

        let key = derive_key(password, salt, strength);
        if key.verifier != verifier {
            return Err(Error::bad_password("password verification failed"));
        }

        Ok(Self {
            keystream: Keystream::new(strength, &key.encryption_key)?,
            mac: new_mac(&key.mac_key)?,
        })
    }

    /// Decrypt `buf` in place, feeding the ciphertext to the authenticator.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.mac.update(buf);
        self.keystream.apply(buf);
    }

    /// Check the trailing authentication code once the entry is consumed.
    pub fn verify(self, auth_code: &[u8]) -> Result<()> {
        self.mac
            .verify_truncated_left(auth_code)
            .map_err(|_| Error::bad_password("authentication code mismatch"))
    }
}

/// Streaming encryptor for one AES entry
pub struct AesEncryptor {
    keystream: Keystream,
    mac: HmacSha1,
}

impl AesEncryptor {
    /// Create an encryptor with a fresh random salt.
    ///
    /// Returns the encryptor and the `salt | verifier` prefix that must be
    /// written before the ciphertext.
    pub fn new(password: &[u8], strength: AesStrength) -> Result<(Self, Vec<u8>)> {
        let mut salt = vec![0u8; strength.salt_len()];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(password, strength, salt)
    }

    fn with_salt(password: &[u8], strength: AesStrength, salt: Vec<u8>) -> Result<(Self, Vec<u8>)> {
        let key = derive_key(password, &salt, strength);
        let encryptor = Self {
            keystream: Keystream::new(strength, &key.encryption_key)?,
            mac: new_mac(&key.mac_key)?,
        };

        let mut header = salt;
        header.extend_from_slice(&key.verifier);
        Ok((encryptor, header))
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.keystream.apply(buf);
        self.mac.update(buf);
    }

    pub fn finalize(self) -> [u8; AUTH_CODE_LEN] {
        let tag = self.mac.finalize().into_bytes();
        let mut out = [0u8; AUTH_CODE_LEN];
        out.copy_from_slice(&tag[..AUTH_CODE_LEN]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_all(password: &[u8], strength: AesStrength, plain: &[u8]) -> (Vec<u8>, Vec<u8>, [u8; 10]) {
        let (mut enc, header) = AesEncryptor::new(password, strength).unwrap();
        let mut data = plain.to_vec();
        // split across calls to exercise the keystream position
        let (a, b) = data.split_at_mut(plain.len() / 3);
        enc.encrypt(a);
        enc.encrypt(b);
        (header, data, enc.finalize())
    }

    fn split_header(header: &[u8], strength: AesStrength) -> (&[u8], [u8; 2]) {
        let (salt, verifier) = header.split_at(strength.salt_len());
        (salt, [verifier[0], verifier[1]])
    }

    #[test]
    fn derived_key_lengths() {
        for strength in [AesStrength::Aes128, AesStrength::Aes192, AesStrength::Aes256] {
            let salt = vec![7u8; strength.salt_len()];
            let key = derive_key(b"secret", &salt, strength);
            assert_eq!(key.encryption_key.len(), strength.key_len());
            assert_eq!(key.mac_key.len(), strength.key_len());
        }
    }

    #[test]
    fn derivation_is_deterministic_and_salted() {
        let a = derive_key(b"pw", &[1u8; 16], AesStrength::Aes256);
        let b = derive_key(b"pw", &[1u8; 16], AesStrength::Aes256);
        let c = derive_key(b"pw", &[2u8; 16], AesStrength::Aes256);
        assert_eq!(a.encryption_key, b.encryption_key);
        assert_eq!(a.verifier, b.verifier);
        assert_ne!(a.encryption_key, c.encryption_key);
    }

    #[test]
    fn encrypt_then_decrypt() {
        let plain: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        for strength in [AesStrength::Aes128, AesStrength::Aes192, AesStrength::Aes256] {
            let (header, mut data, tag) = encrypt_all(b"hunter2", strength, &plain);
            assert_ne!(data, plain);

            let (salt, verifier) = split_header(&header, strength);
            let mut dec = AesDecryptor::new(b"hunter2", strength, salt, verifier).unwrap();
            dec.decrypt(&mut data);
            assert_eq!(data, plain);
            dec.verify(&tag).unwrap();
        }
    }

    #[test]
    fn wrong_password_fails_verifier() {
        let (header, _, _) = encrypt_all(b"right", AesStrength::Aes256, b"payload");
        let (salt, verifier) = split_header(&header, AesStrength::Aes256);
        // The 2-byte verifier lets roughly 1 in 65536 wrong passwords through.
        let key = derive_key(b"wrong", salt, AesStrength::Aes256);
        if key.verifier != verifier {
            let err = AesDecryptor::new(b"wrong", AesStrength::Aes256, salt, verifier)
                .err()
                .unwrap();
            assert!(matches!(err, Error::BadPassword(_)));
        }
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (header, mut data, tag) = encrypt_all(b"pw", AesStrength::Aes256, b"some important bytes");
        data[3] ^= 0x40;
        let (salt, verifier) = split_header(&header, AesStrength::Aes256);
        let mut dec = AesDecryptor::new(b"pw", AesStrength::Aes256, salt, verifier).unwrap();
        dec.decrypt(&mut data);
        assert!(matches!(dec.verify(&tag), Err(Error::BadPassword(_))));
    }

    #[test]
    fn strength_codes_round_trip() {
        for code in 1..=3 {
            assert_eq!(AesStrength::from_code(code).unwrap().code(), code);
        }
        assert!(AesStrength::from_code(4).is_none());
        assert_eq!(AesStrength::Aes256.overhead(), 16 + 2 + 10);
    }
}
