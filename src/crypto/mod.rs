//! Entry payload encryption.
//!
//! Two schemes are supported:
//!
//! - [`aes`]: the WinZip AES extension (AE-1 / AE-2). AES in CTR mode with a
//!   PBKDF2-HMAC-SHA1 derived key and a truncated HMAC-SHA1 authentication code.
//! - [`zipcrypto`]: the traditional PKWARE stream cipher. It is broken by
//!   known-plaintext attacks and is only ever used when requested explicitly.

pub mod aes;
pub mod zipcrypto;

pub use self::aes::{
    AUTH_CODE_LEN, AesDecryptor, AesEncryptor, AesStrength, DerivedKey, KDF_ITERATIONS,
    VERIFIER_LEN, derive_key,
};
pub use self::zipcrypto::{HEADER_LEN as ZIPCRYPTO_HEADER_LEN, ZipCryptoDecryptor, ZipCryptoEncryptor};

/// Encryption scheme used when writing entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    Aes(AesStrength),
    /// Legacy PKWARE encryption. Weak; prefer AES.
    ZipCrypto,
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        EncryptionMethod::Aes(AesStrength::Aes256)
    }
}
