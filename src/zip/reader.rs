use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::crypto::{
    AUTH_CODE_LEN, AesDecryptor, VERIFIER_LEN, ZIPCRYPTO_HEADER_LEN, ZipCryptoDecryptor,
};
use crate::error::{Error, Result};
use crate::io::{LocalFileReader, ReadAt};
use crate::path::resolve_entry_path;
use crate::progress::{CancellationToken, ProgressState};

use super::codec::{CHUNK_SIZE, Decipher, Inflater};
use super::parser::ZipParser;
use super::structures::{CompressionMethod, EntryDescriptor, EntryEncryption, FLAG_DATA_DESCRIPTOR};

/// An open archive: the parsed central directory plus an optional password.
pub struct ZipReader<R: ReadAt> {
    parser: ZipParser<R>,
    entries: Vec<EntryDescriptor>,
    password: Option<String>,
}

impl ZipReader<LocalFileReader> {
    /// Open an archive on the local filesystem.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Arc::new(LocalFileReader::new(path)?);
        let archive = Self::from_reader(reader).await?;
        info!(
            archive = %path.display(),
            entries = archive.entries.len(),
            encrypted = archive.is_encrypted(),
            "opened archive"
        );
        Ok(archive)
    }
}

impl<R: ReadAt> ZipReader<R> {
    /// Parse the central directory of any random-access source.
    pub async fn from_reader(reader: Arc<R>) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let entries = parser.list_files().await?;
        Ok(Self {
            parser,
            entries,
            password: None,
        })
    }

    /// Entries in central directory order
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&EntryDescriptor> {
        self.entries.iter().find(|e| e.file_name == name)
    }

    /// True if any entry is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.entries.iter().any(EntryDescriptor::is_encrypted)
    }

    /// Remember a password for later decoding. Not checked until an
    /// encrypted entry is read.
    pub fn set_password(&mut self, password: impl Into<String>) {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
    }

    /// Sum of all entries' stored sizes; the `total` of extraction progress
    pub fn total_compressed_size(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |total, e| total.saturating_add(e.compressed_size))
    }

    /// Extract every entry below `destination`.
    pub async fn extract_all(&self, destination: impl AsRef<Path>) -> Result<ProgressState> {
        self.extract_all_with(destination, &mut |_| {}, &CancellationToken::new())
            .await
    }

    /// Extract every entry, reporting progress after each one and checking
    /// `cancel` before starting the next.
    ///
    /// The first failure aborts the whole operation. A failing entry leaves
    /// no file behind; entries extracted before it are kept.
    pub async fn extract_all_with(
        &self,
        destination: impl AsRef<Path>,
        on_progress: &mut (dyn FnMut(ProgressState) + Send),
        cancel: &CancellationToken,
    ) -> Result<ProgressState> {
        let destination = destination.as_ref();
        ensure_directory(destination).await?;

        if self.is_encrypted() && self.password.is_none() {
            return Err(Error::bad_password("archive is encrypted and no password was given"));
        }

        let mut progress = ProgressState::new(self.total_compressed_size());
        for entry in &self.entries {
            if cancel.is_cancelled() {
                warn!(entry = %entry.file_name, "extraction cancelled");
                return Err(Error::Cancelled);
            }
            self.extract_entry(entry, destination).await?;
            progress.advance(entry.compressed_size);
            on_progress(progress);
        }

        progress.complete();
        Ok(progress)
    }

    /// Extract a single named entry below `destination`.
    pub async fn extract_one(
        &self,
        entry_name: &str,
        destination: impl AsRef<Path>,
    ) -> Result<ProgressState> {
        let entry = self
            .entry(entry_name)
            .ok_or_else(|| Error::EntryNotFound(entry_name.to_string()))?;
        let destination = destination.as_ref();
        ensure_directory(destination).await?;

        self.extract_entry(entry, destination).await?;

        let mut progress = ProgressState::new(entry.compressed_size);
        progress.complete();
        Ok(progress)
    }

    /// Decode an entry into memory.
    pub async fn read_entry(&self, entry: &EntryDescriptor) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(entry.uncompressed_size.min(CHUNK_SIZE as u64 * 16) as usize);
        self.decode_entry(entry, &mut out).await?;
        Ok(out)
    }

    async fn extract_entry(&self, entry: &EntryDescriptor, destination: &Path) -> Result<()> {
        let target = resolve_entry_path(destination, &entry.file_name).inspect_err(|_| {
            warn!(entry = %entry.file_name, "refusing entry outside destination");
        })?;

        if entry.is_directory {
            fs::create_dir_all(&target).await?;
            return Ok(());
        }

        let parent = target.parent().unwrap_or(destination);
        fs::create_dir_all(parent).await?;

        debug!(
            entry = %entry.file_name,
            compressed = entry.compressed_size,
            size = entry.uncompressed_size,
            "extracting"
        );

        // Decode into a sibling temp file; it is deleted on drop unless persisted.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".zipkit-")
            .tempfile_in(parent)?
            .into_parts();
        let mut file = fs::File::from_std(file);

        self.decode_entry(entry, &mut file).await?;
        file.flush().await?;
        drop(file);

        temp_path.persist(&target).map_err(|e| Error::Io(e.error))?;
        apply_permissions(&target, entry).await?;
        Ok(())
    }

    /// Stream an entry's payload through decryption, decompression and CRC
    /// checking into `out`.
    async fn decode_entry<W>(&self, entry: &EntryDescriptor, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if entry.is_directory {
            return Ok(());
        }
        if entry.compression_method == CompressionMethod::Stored
            && !entry.is_encrypted()
            && entry.compressed_size != entry.uncompressed_size
        {
            return Err(Error::format(format!(
                "stored entry {} has mismatched sizes",
                entry.file_name
            )));
        }

        let reader = self.parser.reader();
        let mut offset = self.parser.get_data_offset(entry).await?;
        let mut remaining = entry.compressed_size;

        let mut decipher = self.open_decipher(entry, &mut offset, &mut remaining).await?;
        let trailer_len = match entry.encryption {
            EntryEncryption::Aes { .. } => AUTH_CODE_LEN as u64,
            _ => 0,
        };
        let payload_len = remaining.checked_sub(trailer_len).ok_or_else(|| {
            Error::format(format!("entry {} is too short for its encryption", entry.file_name))
        })?;

        let streamed = self
            .stream_payload(entry, &mut decipher, offset, payload_len, out)
            .await;
        offset += payload_len;

        // With a wrong key that slipped past the short verifier, garbage
        // usually surfaces as a decode error before the MAC is reached.
        let crc = match streamed {
            Err(Error::Format(msg)) if entry.is_encrypted() => {
                return Err(Error::bad_password(format!("{msg} (wrong password?)")));
            }
            other => other?,
        };

        if let Decipher::Aes(aes) = decipher {
            let mut auth_code = [0u8; AUTH_CODE_LEN];
            reader.read_exact_at(offset, &mut auth_code).await?;
            aes.verify(&auth_code)?;
        }

        let crc_is_stored = !matches!(entry.encryption, EntryEncryption::Aes { vendor_version: 2, .. });
        if crc_is_stored && crc != entry.crc32 {
            let msg = format!(
                "CRC mismatch in {}: expected {:08x}, got {crc:08x}",
                entry.file_name, entry.crc32
            );
            return Err(if entry.is_encrypted() {
                Error::bad_password(msg)
            } else {
                Error::format(msg)
            });
        }

        Ok(())
    }

    /// Decrypt and inflate `payload_len` bytes starting at `offset` into
    /// `out`, returning the CRC-32 of the plaintext.
    async fn stream_payload<W>(
        &self,
        entry: &EntryDescriptor,
        decipher: &mut Decipher,
        mut offset: u64,
        mut payload_len: u64,
        out: &mut W,
    ) -> Result<u32>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let reader = self.parser.reader();
        let mut inflater = Inflater::new(entry.compression_method, &entry.file_name)?;
        let mut hasher = crc32fast::Hasher::new();
        let mut written = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];

        while payload_len > 0 {
            let n = payload_len.min(CHUNK_SIZE as u64) as usize;
            reader.read_exact_at(offset, &mut buf[..n]).await?;
            offset += n as u64;
            payload_len -= n as u64;

            decipher.decrypt(&mut buf[..n]);
            let plain = inflater.push(&buf[..n], &entry.file_name)?;
            written += plain.len() as u64;
            if written > entry.uncompressed_size {
                return Err(Error::format(format!(
                    "entry {} inflates past its declared size",
                    entry.file_name
                )));
            }
            hasher.update(&plain);
            out.write_all(&plain).await?;
        }

        let tail = inflater.finish(&entry.file_name)?;
        written += tail.len() as u64;
        hasher.update(&tail);
        out.write_all(&tail).await?;

        if written != entry.uncompressed_size {
            return Err(Error::format(format!(
                "entry {} decoded to {written} bytes, expected {}",
                entry.file_name, entry.uncompressed_size
            )));
        }
        Ok(hasher.finalize())
    }

    /// Read the encryption header, verify the password against it and
    /// advance `offset`/`remaining` past it.
    async fn open_decipher(
        &self,
        entry: &EntryDescriptor,
        offset: &mut u64,
        remaining: &mut u64,
    ) -> Result<Decipher> {
        let password = match entry.encryption {
            EntryEncryption::None => return Ok(Decipher::None),
            _ => self.password.as_deref().ok_or_else(|| {
                Error::bad_password(format!("entry {} is encrypted", entry.file_name))
            })?,
        };
        let reader = self.parser.reader();

        let header_len = match entry.encryption {
            EntryEncryption::Aes { strength, .. } => strength.salt_len() + VERIFIER_LEN,
            _ => ZIPCRYPTO_HEADER_LEN,
        };
        if *remaining < header_len as u64 {
            return Err(Error::format(format!(
                "entry {} is too short for its encryption header",
                entry.file_name
            )));
        }
        let mut header = vec![0u8; header_len];
        reader.read_exact_at(*offset, &mut header).await?;
        *offset += header_len as u64;
        *remaining -= header_len as u64;

        match entry.encryption {
            EntryEncryption::Aes { strength, .. } => {
                let (salt, verifier) = header.split_at(strength.salt_len());
                let decryptor = AesDecryptor::new(
                    password.as_bytes(),
                    strength,
                    salt,
                    [verifier[0], verifier[1]],
                )?;
                Ok(Decipher::Aes(decryptor))
            }
            _ => {
                let check = if entry.flags & FLAG_DATA_DESCRIPTOR != 0 {
                    (entry.last_mod_time >> 8) as u8
                } else {
                    (entry.crc32 >> 24) as u8
                };
                let mut header_bytes = [0u8; ZIPCRYPTO_HEADER_LEN];
                header_bytes.copy_from_slice(&header);
                let decryptor = ZipCryptoDecryptor::new(password.as_bytes(), &header_bytes, check)?;
                Ok(Decipher::ZipCrypto(decryptor))
            }
        }
    }
}

/// Make sure `path` is an existing directory, creating it if needed.
pub(crate) async fn ensure_directory(path: &Path) -> Result<()> {
    match fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(source) => Err(Error::DirectoryCreation {
            path: path.to_path_buf(),
            source: Some(source),
        }),
    }
}

#[cfg(unix)]
async fn apply_permissions(target: &Path, entry: &EntryDescriptor) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    // Temp files are created 0600; fall back to the usual file mode.
    let mode = entry.unix_mode().unwrap_or(0o644) & 0o777;
    fs::set_permissions(target, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn apply_permissions(_target: &Path, _entry: &EntryDescriptor) -> Result<()> {
    Ok(())
}
