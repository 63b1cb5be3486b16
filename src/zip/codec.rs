//! Per-entry payload transforms.
//!
//! Reading runs `decrypt -> inflate`, writing runs `deflate -> encrypt`.
//! Every stage works on whole chunks so an entry never has to fit in memory.

use flate2::Compression;
use flate2::write::{DeflateDecoder, DeflateEncoder};
use std::io::Write;

use crate::crypto::{AesDecryptor, AesEncryptor, ZipCryptoDecryptor, ZipCryptoEncryptor};
use crate::error::{Error, Result};

use super::structures::CompressionMethod;

/// Size of the chunks streamed through the pipeline
pub const CHUNK_SIZE: usize = 64 * 1024;

fn corrupt(name: &str, err: std::io::Error) -> Error {
    Error::format(format!("corrupt compressed data in {name}: {err}"))
}

/// Decompression stage
pub enum Inflater {
    Stored,
    Deflate(DeflateDecoder<Vec<u8>>),
}

impl Inflater {
    pub fn new(method: CompressionMethod, name: &str) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Inflater::Stored),
            CompressionMethod::Deflate => Ok(Inflater::Deflate(DeflateDecoder::new(Vec::new()))),
            CompressionMethod::Unknown(m) => Err(Error::format(format!(
                "unsupported compression method {m} for {name}"
            ))),
        }
    }

    /// Feed compressed bytes, returning whatever plaintext is ready.
    pub fn push(&mut self, data: &[u8], name: &str) -> Result<Vec<u8>> {
        match self {
            Inflater::Stored => Ok(data.to_vec()),
            Inflater::Deflate(decoder) => {
                decoder.write_all(data).map_err(|e| corrupt(name, e))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
        }
    }

    pub fn finish(self, name: &str) -> Result<Vec<u8>> {
        match self {
            Inflater::Stored => Ok(Vec::new()),
            Inflater::Deflate(decoder) => decoder.finish().map_err(|e| corrupt(name, e)),
        }
    }
}

/// Compression stage
pub enum Deflater {
    Stored,
    Deflate(DeflateEncoder<Vec<u8>>),
}

impl Deflater {
    pub fn new(method: CompressionMethod, level: Compression) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Deflater::Stored),
            CompressionMethod::Deflate => {
                Ok(Deflater::Deflate(DeflateEncoder::new(Vec::new(), level)))
            }
            CompressionMethod::Unknown(m) => Err(Error::format(format!(
                "cannot write compression method {m}"
            ))),
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Deflater::Stored => Ok(data.to_vec()),
            Deflater::Deflate(encoder) => {
                encoder.write_all(data)?;
                Ok(std::mem::take(encoder.get_mut()))
            }
        }
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            Deflater::Stored => Ok(Vec::new()),
            Deflater::Deflate(encoder) => Ok(encoder.finish()?),
        }
    }
}

/// Decryption stage
pub enum Decipher {
    None,
    Aes(AesDecryptor),
    ZipCrypto(ZipCryptoDecryptor),
}

impl Decipher {
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        match self {
            Decipher::None => {}
            Decipher::Aes(d) => d.decrypt(buf),
            Decipher::ZipCrypto(d) => d.decrypt(buf),
        }
    }
}

/// Encryption stage
pub enum Encipher {
    None,
    Aes(AesEncryptor),
    ZipCrypto(ZipCryptoEncryptor),
}

impl Encipher {
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        match self {
            Encipher::None => {}
            Encipher::Aes(e) => e.encrypt(buf),
            Encipher::ZipCrypto(e) => e.encrypt(buf),
        }
    }

    /// Trailer appended after the ciphertext (the AES authentication code)
    pub fn finish(self) -> Vec<u8> {
        match self {
            Encipher::Aes(e) => e.finalize().to_vec(),
            Encipher::None | Encipher::ZipCrypto(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_pipeline_round_trip() {
        let plain: Vec<u8> = b"abcabcabc".iter().copied().cycle().take(200_000).collect();

        let mut deflater = Deflater::new(CompressionMethod::Deflate, Compression::best()).unwrap();
        let mut compressed = Vec::new();
        for chunk in plain.chunks(CHUNK_SIZE) {
            compressed.extend(deflater.push(chunk).unwrap());
        }
        compressed.extend(deflater.finish().unwrap());
        assert!(compressed.len() < plain.len() / 10);

        let mut inflater = Inflater::new(CompressionMethod::Deflate, "t").unwrap();
        let mut out = Vec::new();
        for chunk in compressed.chunks(1000) {
            out.extend(inflater.push(chunk, "t").unwrap());
        }
        out.extend(inflater.finish("t").unwrap());
        assert_eq!(out, plain);
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(
            Inflater::new(CompressionMethod::Unknown(14), "lzma.bin"),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn garbage_deflate_is_format_error() {
        let mut inflater = Inflater::new(CompressionMethod::Deflate, "bad").unwrap();
        let pushed = inflater.push(&[0xFF; 64], "bad");
        let result = pushed.and_then(|_| inflater.finish("bad"));
        assert!(matches!(result, Err(Error::Format(_))));
    }
}
