//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! This cipher is broken: twelve bytes of known plaintext are enough to
//! recover the internal keys. It exists for reading old archives and is never
//! selected unless a caller asks for it by name.

use rand::RngCore;

use crate::error::{Error, Result};

/// Length of the encryption header preceding the ciphertext
pub const HEADER_LEN: usize = 12;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

fn crc_update(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize]
}

#[derive(Clone)]
struct Keys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl Keys {
    fn new(password: &[u8]) -> Self {
        let mut keys = Keys {
            k0: 0x1234_5678,
            k1: 0x2345_6789,
            k2: 0x3456_7890,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.k0 = crc_update(self.k0, plain);
        self.k1 = self
            .k1
            .wrapping_add(self.k0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.k2 = crc_update(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let t = (self.k2 | 2) & 0xFFFF;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

/// Streaming ZipCrypto decryptor
pub struct ZipCryptoDecryptor {
    keys: Keys,
}

impl ZipCryptoDecryptor {
    /// Decrypt the 12-byte header and compare its last byte to `check`.
    ///
    /// `check` is the high byte of the entry CRC, or of the DOS modification
    /// time when the entry uses a data descriptor.
    pub fn new(password: &[u8], header: &[u8; HEADER_LEN], check: u8) -> Result<Self> {
        let mut keys = Keys::new(password);
        let mut last = 0;
        for &b in header {
            last = keys.decrypt_byte(b);
        }
        if last != check {
            return Err(Error::bad_password("password verification failed"));
        }
        Ok(Self { keys })
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.keys.decrypt_byte(*b);
        }
    }
}

/// Streaming ZipCrypto encryptor
pub struct ZipCryptoEncryptor {
    keys: Keys,
}

impl ZipCryptoEncryptor {
    /// Create an encryptor and its encrypted header, ending in `check`.
    pub fn new(password: &[u8], check: u8) -> (Self, [u8; HEADER_LEN]) {
        let mut header = [0u8; HEADER_LEN];
        rand::thread_rng().fill_bytes(&mut header[..HEADER_LEN - 1]);
        header[HEADER_LEN - 1] = check;

        let mut keys = Keys::new(password);
        for b in header.iter_mut() {
            *b = keys.encrypt_byte(*b);
        }
        (Self { keys }, header)
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.keys.encrypt_byte(*b);
        }
    }
}
