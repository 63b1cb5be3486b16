//! Archive creation.
//!
//! Entries are streamed one chunk at a time. Each local header is written
//! with placeholder CRC and sizes, the payload follows, and the header is
//! patched in place once the payload is complete. Output goes to a temporary
//! file next to the destination which replaces it only in [`ZipWriter::finalize`].

use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::crypto::{AesEncryptor, EncryptionMethod, ZipCryptoEncryptor};
use crate::error::{Error, Result};
use crate::progress::{CancellationToken, ProgressState};

use super::codec::{CHUNK_SIZE, Deflater, Encipher};
use super::params::ArchiveParameters;
use super::structures::*;

/// APPNOTE 6.3, as written into "version made by"
const APPNOTE_VERSION: u16 = 63;

const ZIP64_VERSION: u16 = 45;

/// MS-DOS directory attribute
const DOS_DIRECTORY: u32 = 0x10;

/// Writer for one new archive.
pub struct ZipWriter {
    destination: PathBuf,
    params: ArchiveParameters,
    file: Option<fs::File>,
    temp_path: Option<TempPath>,
    entries: Vec<EntryDescriptor>,
    offset: u64,
}

impl ZipWriter {
    /// Start a new archive that will replace `destination` on finalize.
    pub async fn create(destination: impl AsRef<Path>, params: ArchiveParameters) -> Result<Self> {
        params.validate()?;
        let destination = destination.as_ref().to_path_buf();
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".zipkit-")
            .suffix(".zip.tmp")
            .tempfile_in(&parent)?
            .into_parts();

        debug!(archive = %destination.display(), ?params, "creating archive");

        Ok(Self {
            destination,
            params,
            file: Some(fs::File::from_std(file)),
            temp_path: Some(temp_path),
            entries: Vec::new(),
            offset: 0,
        })
    }

    /// Entries written so far
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Add a directory tree.
    pub async fn add_folder(&mut self, source_dir: impl AsRef<Path>) -> Result<ProgressState> {
        self.add_folder_with(source_dir, &mut |_| {}, &CancellationToken::new())
            .await
    }

    /// Add a directory tree in lexicographic order, reporting progress in
    /// source bytes after each file.
    pub async fn add_folder_with(
        &mut self,
        source_dir: impl AsRef<Path>,
        on_progress: &mut (dyn FnMut(ProgressState) + Send),
        cancel: &CancellationToken,
    ) -> Result<ProgressState> {
        self.ensure_open()?;
        let source_dir = source_dir.as_ref();
        match fs::metadata(source_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(Error::NotFound {
                    path: source_dir.to_path_buf(),
                });
            }
        }

        let mut walk = WalkDir::new(source_dir)
            .sort_by_file_name()
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Io(e.into()))?;

        // The archive may be written inside the tree it is built from.
        let own_temp = self
            .temp_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_os_string());
        walk.retain(|item| own_temp.as_deref() != Some(item.file_name()));

        let mut total = 0;
        for item in &walk {
            if item.file_type().is_file() {
                total += item.metadata().map_err(|e| Error::Io(e.into()))?.len();
            }
        }
        let mut progress = ProgressState::new(total);

        let root_name = source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let include_root = self.params.includes_root_folder() && !root_name.is_empty();

        for item in walk {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let relative = item
                .path()
                .strip_prefix(source_dir)
                .map(archive_name)
                .unwrap_or_default();
            let name = match (include_root, relative.is_empty()) {
                (true, true) => root_name.clone(),
                (true, false) => format!("{root_name}/{relative}"),
                (false, true) => continue,
                (false, false) => relative,
            };
            let meta = item.metadata().map_err(|e| Error::Io(e.into()))?;

            if item.file_type().is_dir() {
                self.write_directory(&format!("{name}/"), &meta).await?;
            } else if item.file_type().is_file() {
                let size = self.write_file(item.path(), &name, &meta).await?;
                progress.advance(size);
                on_progress(progress);
            } else {
                warn!(path = %item.path().display(), "skipping non-regular file");
            }
        }

        progress.complete();
        Ok(progress)
    }

    /// Add one file under an explicit archive name.
    pub async fn add_file(&mut self, source: impl AsRef<Path>, name: &str) -> Result<()> {
        self.ensure_open()?;
        let source = source.as_ref();
        let meta = fs::metadata(source).await.map_err(|_| Error::NotFound {
            path: source.to_path_buf(),
        })?;
        let name = name.trim_start_matches('/').replace('\\', "/");
        self.write_file(source, &name, &meta).await?;
        Ok(())
    }

    /// Write the central directory and move the archive into place.
    ///
    /// Must be called exactly once; the writer is closed afterwards.
    pub async fn finalize(&mut self) -> Result<()> {
        let mut file = self.file.take().ok_or(Error::ClosedHandle)?;
        let temp_path = self.temp_path.take().ok_or(Error::ClosedHandle)?;

        let cd_offset = self.offset;
        let count = self.entries.len();
        let tail = central_directory(&self.entries, cd_offset);

        file.write_all(&tail).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_path
            .persist(&self.destination)
            .map_err(|e| Error::Io(e.error))?;

        info!(
            archive = %self.destination.display(),
            entries = count,
            bytes = cd_offset + tail.len() as u64,
            "archive written"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::ClosedHandle);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::ClosedHandle)?;
        file.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Drop the partial output after a failed entry; the writer is closed.
    fn abandon(&mut self, name: &str, err: &Error) {
        warn!(entry = name, error = %err, "discarding unfinished archive");
        self.file = None;
        self.temp_path = None;
    }

    async fn write_directory(&mut self, name: &str, meta: &Metadata) -> Result<()> {
        check_name(name)?;
        let result = self.write_directory_record(name, meta).await;
        if let Err(err) = &result {
            self.abandon(name, err);
        }
        result
    }

    async fn write_file(&mut self, path: &Path, name: &str, meta: &Metadata) -> Result<u64> {
        check_name(name)?;
        if meta.len() >= 0xFFFFFFFF {
            return Err(Error::format(format!(
                "{} is too large for a non-ZIP64 entry",
                path.display()
            )));
        }
        let result = self.stream_file(path, name, meta).await;
        if let Err(err) = &result {
            self.abandon(name, err);
        }
        result
    }

    async fn write_directory_record(&mut self, name: &str, meta: &Metadata) -> Result<()> {
        let (last_mod_time, last_mod_date) = dos_timestamp(meta);
        let entry = EntryDescriptor {
            file_name: name.to_string(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: self.offset,
            last_mod_time,
            last_mod_date,
            flags: FLAG_UTF8,
            version_made_by: (HOST_UNIX << 8) | APPNOTE_VERSION,
            external_attributes: (unix_mode(meta, 0o040755) << 16) | DOS_DIRECTORY,
            encryption: EntryEncryption::None,
            is_directory: true,
        };

        let mut header = Vec::new();
        write_local_header(&mut header, &entry);
        self.write(&header).await?;
        debug!(entry = name, "added directory");
        self.entries.push(entry);
        Ok(())
    }

    /// Stream one file into the archive; returns the number of source bytes.
    async fn stream_file(&mut self, path: &Path, name: &str, meta: &Metadata) -> Result<u64> {
        let method = self.params.get_compression_method();
        let encryption = if !self.params.is_encrypting() {
            None
        } else {
            Some(self.params.get_encryption_method())
        };

        // ZipCrypto's header check byte comes from the CRC, so compute it first.
        let precomputed_crc = match encryption {
            Some(EncryptionMethod::ZipCrypto) => Some(file_crc(path).await?),
            _ => None,
        };

        let (last_mod_time, last_mod_date) = dos_timestamp(meta);
        let mut entry = EntryDescriptor {
            file_name: name.to_string(),
            compression_method: method,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: precomputed_crc.unwrap_or(0),
            lfh_offset: self.offset,
            last_mod_time,
            last_mod_date,
            flags: FLAG_UTF8 | if encryption.is_some() { FLAG_ENCRYPTED } else { 0 },
            version_made_by: (HOST_UNIX << 8) | APPNOTE_VERSION,
            external_attributes: unix_mode(meta, 0o100644) << 16,
            encryption: match encryption {
                None => EntryEncryption::None,
                Some(EncryptionMethod::ZipCrypto) => EntryEncryption::ZipCrypto,
                Some(EncryptionMethod::Aes(strength)) => EntryEncryption::Aes {
                    strength,
                    vendor_version: 2,
                },
            },
            is_directory: false,
        };

        let mut header = Vec::new();
        write_local_header(&mut header, &entry);
        self.write(&header).await?;
        let payload_start = self.offset;

        let password = self.params.get_password().unwrap_or_default().as_bytes().to_vec();
        let mut encipher = match encryption {
            None => Encipher::None,
            Some(EncryptionMethod::Aes(strength)) => {
                let (encryptor, prefix) = AesEncryptor::new(&password, strength)?;
                self.write(&prefix).await?;
                Encipher::Aes(encryptor)
            }
            Some(EncryptionMethod::ZipCrypto) => {
                let check = (entry.crc32 >> 24) as u8;
                let (encryptor, prefix) = ZipCryptoEncryptor::new(&password, check);
                self.write(&prefix).await?;
                Encipher::ZipCrypto(encryptor)
            }
        };

        let mut deflater = Deflater::new(method, self.params.get_compression_level().to_flate2())?;
        let mut source = fs::File::open(path).await?;
        let mut hasher = crc32fast::Hasher::new();
        let mut read_total = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            read_total += n as u64;
            hasher.update(&buf[..n]);

            let mut out = deflater.push(&buf[..n])?;
            encipher.encrypt(&mut out);
            self.write(&out).await?;
        }

        let mut out = deflater.finish()?;
        encipher.encrypt(&mut out);
        self.write(&out).await?;
        let trailer = encipher.finish();
        self.write(&trailer).await?;

        let crc = hasher.finalize();
        if precomputed_crc.is_some_and(|pre| pre != crc) {
            return Err(Error::Io(std::io::Error::other(format!(
                "{} changed while it was being archived",
                path.display()
            ))));
        }

        let compressed_size = self.offset - payload_start;
        if compressed_size >= 0xFFFFFFFF || read_total >= 0xFFFFFFFF {
            return Err(Error::format(format!(
                "{} is too large for a non-ZIP64 entry",
                path.display()
            )));
        }

        // AE-2 leaves the CRC out; the authentication code covers the data.
        entry.crc32 = match entry.encryption {
            EntryEncryption::Aes { .. } => 0,
            _ => crc,
        };
        entry.compressed_size = compressed_size;
        entry.uncompressed_size = read_total;
        self.patch_local_header(&entry).await?;

        debug!(
            entry = name,
            size = read_total,
            compressed = compressed_size,
            "added file"
        );
        self.entries.push(entry);
        Ok(read_total)
    }

    /// Rewrite the CRC and size fields of an already written local header.
    async fn patch_local_header(&mut self, entry: &EntryDescriptor) -> Result<()> {
        let end = self.offset;
        let file = self.file.as_mut().ok_or(Error::ClosedHandle)?;

        let mut fields = Vec::with_capacity(12);
        fields.extend_from_slice(&entry.crc32.to_le_bytes());
        fields.extend_from_slice(&(entry.compressed_size as u32).to_le_bytes());
        fields.extend_from_slice(&(entry.uncompressed_size as u32).to_le_bytes());

        file.flush().await?;
        file.seek(SeekFrom::Start(entry.lfh_offset + LFH_CRC_OFFSET))
            .await?;
        file.write_all(&fields).await?;
        file.flush().await?;
        file.seek(SeekFrom::Start(end)).await?;
        Ok(())
    }
}

/// Central directory records followed by the end records, ZIP64 ones
/// included when a count, size or offset no longer fits the classic fields.
fn central_directory(entries: &[EntryDescriptor], cd_offset: u64) -> Vec<u8> {
    let mut tail = Vec::new();
    for entry in entries {
        write_central_header(&mut tail, entry);
    }
    let cd_size = tail.len() as u64;
    let count = entries.len() as u64;

    if count >= 0xFFFF || cd_offset >= 0xFFFFFFFF || cd_size >= 0xFFFFFFFF {
        Zip64EOCD {
            eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
            version_made_by: (HOST_UNIX << 8) | APPNOTE_VERSION,
            version_needed: ZIP64_VERSION,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count,
            total_entries: count,
            cd_size,
            cd_offset,
        }
        .write_to(&mut tail);
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: cd_offset + cd_size,
            total_disks: 1,
        }
        .write_to(&mut tail);
    }

    EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: count.min(0xFFFF) as u16,
        total_entries: count.min(0xFFFF) as u16,
        cd_size: cd_size.min(0xFFFFFFFF) as u32,
        cd_offset: cd_offset.min(0xFFFFFFFF) as u32,
        comment_len: 0,
    }
    .write_to(&mut tail);

    tail
}

/// Header name fields are 16 bits wide.
fn check_name(name: &str) -> Result<()> {
    if name.len() > u16::MAX as usize {
        return Err(Error::format(format!(
            "entry name of {} bytes is too long",
            name.len()
        )));
    }
    Ok(())
}

/// Join path components with `/` as the archive format requires.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn file_crc(path: &Path) -> Result<u32> {
    let mut source = fs::File::open(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(hasher.finalize());
        }
        hasher.update(&buf[..n]);
    }
}

fn dos_timestamp(meta: &Metadata) -> (u16, u16) {
    let modified: NaiveDateTime = meta
        .modified()
        .map(|t| chrono::DateTime::<Local>::from(t).naive_local())
        .unwrap_or_else(|_| Local::now().naive_local());
    to_dos_datetime(modified)
}

#[cfg(unix)]
fn unix_mode(meta: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn unix_mode(_meta: &Metadata, default: u32) -> u32 {
    default
}

fn version_needed(entry: &EntryDescriptor) -> u16 {
    match entry.encryption {
        EntryEncryption::Aes { .. } => 51,
        _ if entry.is_directory => 20,
        _ if entry.compression_method == CompressionMethod::Deflate => 20,
        EntryEncryption::ZipCrypto => 20,
        EntryEncryption::None => 10,
    }
}

/// Method id and extra field as they appear in the headers
fn method_and_extra(entry: &EntryDescriptor) -> (u16, Vec<u8>) {
    match entry.encryption {
        EntryEncryption::Aes {
            strength,
            vendor_version,
        } => {
            let field = AesExtraField {
                vendor_version,
                strength,
                compression_method: entry.compression_method.as_u16(),
            };
            (AES_METHOD, field.to_bytes())
        }
        _ => (entry.compression_method.as_u16(), Vec::new()),
    }
}

fn write_local_header(out: &mut Vec<u8>, entry: &EntryDescriptor) {
    let (method, extra) = method_and_extra(entry);
    out.extend_from_slice(LFH_SIGNATURE);
    out.extend_from_slice(&version_needed(entry).to_le_bytes());
    out.extend_from_slice(&entry.flags.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(&entry.last_mod_time.to_le_bytes());
    out.extend_from_slice(&entry.last_mod_date.to_le_bytes());
    out.extend_from_slice(&entry.crc32.to_le_bytes());
    out.extend_from_slice(&(entry.compressed_size as u32).to_le_bytes());
    out.extend_from_slice(&(entry.uncompressed_size as u32).to_le_bytes());
    out.extend_from_slice(&(entry.file_name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(entry.file_name.as_bytes());
    out.extend_from_slice(&extra);
}

fn write_central_header(out: &mut Vec<u8>, entry: &EntryDescriptor) {
    let (method, mut extra) = method_and_extra(entry);

    let offset = if entry.lfh_offset >= 0xFFFFFFFF {
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&8u16.to_le_bytes());
        extra.extend_from_slice(&entry.lfh_offset.to_le_bytes());
        0xFFFFFFFF
    } else {
        entry.lfh_offset as u32
    };
    let version_needed = if entry.lfh_offset >= 0xFFFFFFFF {
        ZIP64_VERSION.max(version_needed(entry))
    } else {
        version_needed(entry)
    };

    out.extend_from_slice(CDFH_SIGNATURE);
    out.extend_from_slice(&entry.version_made_by.to_le_bytes());
    out.extend_from_slice(&version_needed.to_le_bytes());
    out.extend_from_slice(&entry.flags.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(&entry.last_mod_time.to_le_bytes());
    out.extend_from_slice(&entry.last_mod_date.to_le_bytes());
    out.extend_from_slice(&entry.crc32.to_le_bytes());
    out.extend_from_slice(&(entry.compressed_size as u32).to_le_bytes());
    out.extend_from_slice(&(entry.uncompressed_size as u32).to_le_bytes());
    out.extend_from_slice(&(entry.file_name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    out.extend_from_slice(&entry.external_attributes.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(entry.file_name.as_bytes());
    out.extend_from_slice(&extra);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::io::ReadAt;
    use crate::zip::{ZipParser, ZipReader};

    /// Archive whose bytes are all zero except for a tail starting at `base`.
    struct SparseArchive {
        base: u64,
        tail: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl ReadAt for SparseArchive {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let size = self.size();
            if offset >= size {
                return Ok(0);
            }
            let n = buf.len().min((size - offset) as usize);
            for (i, b) in buf[..n].iter_mut().enumerate() {
                let pos = offset + i as u64;
                *b = if pos < self.base {
                    0
                } else {
                    self.tail[(pos - self.base) as usize]
                };
            }
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.base + self.tail.len() as u64
        }
    }

    fn far_entry(lfh_offset: u64) -> EntryDescriptor {
        EntryDescriptor {
            file_name: "far.bin".into(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 10,
            uncompressed_size: 10,
            crc32: 0x1234_5678,
            lfh_offset,
            last_mod_time: 0,
            last_mod_date: 0x21,
            flags: FLAG_UTF8,
            version_made_by: (HOST_UNIX << 8) | APPNOTE_VERSION,
            external_attributes: 0o100644 << 16,
            encryption: EntryEncryption::None,
            is_directory: false,
        }
    }

    #[tokio::test]
    async fn zip64_end_records_past_4gib() {
        let near = far_entry(1024);
        let far = far_entry(5 << 30);
        let cd_offset = 6u64 << 30;
        let tail = central_directory(&[near, far], cd_offset);

        let eocd_start = tail.len() - EndOfCentralDirectory::SIZE;
        let eocd = EndOfCentralDirectory::from_bytes(&tail[eocd_start..]).unwrap();
        assert!(eocd.is_zip64());
        assert_eq!(eocd.cd_offset, 0xFFFF_FFFF);

        let parser = ZipParser::new(Arc::new(SparseArchive {
            base: cd_offset,
            tail,
        }));
        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lfh_offset, 1024);
        assert_eq!(entries[1].lfh_offset, 5 << 30);
        assert_eq!(entries[1].compressed_size, 10);
        assert_eq!(entries[1].crc32, 0x1234_5678);
    }

    #[test]
    fn small_archives_have_no_zip64_records() {
        let tail = central_directory(&[far_entry(0)], 40);
        assert!(!tail.windows(4).any(|w| w == Zip64EOCD::SIGNATURE));
        assert_eq!(tail.len(), CDFH_MIN_SIZE + "far.bin".len() + EndOfCentralDirectory::SIZE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_entry_discards_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("broken.zip");
        std::fs::write(dir.path().join("ok.txt"), b"fine").unwrap();
        let not_a_file = dir.path().join("folder");
        std::fs::create_dir(&not_a_file).unwrap();

        let mut writer = ZipWriter::create(&dest, ArchiveParameters::new()).await.unwrap();
        writer.add_file(dir.path().join("ok.txt"), "ok.txt").await.unwrap();

        // Opening a directory succeeds on Unix; reading it does not.
        let err = writer.add_file(&not_a_file, "folder.bin").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
        assert!(writer.is_closed());

        let err = writer.add_file(dir.path().join("ok.txt"), "again.txt").await.unwrap_err();
        assert!(matches!(err, Error::ClosedHandle));
        assert!(matches!(writer.finalize().await, Err(Error::ClosedHandle)));
        assert!(!dest.exists());

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".zipkit-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn overlong_name_is_rejected_without_closing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("names.zip");
        let src = dir.path().join("f.txt");
        std::fs::write(&src, b"data").unwrap();

        let mut writer = ZipWriter::create(&dest, ArchiveParameters::new()).await.unwrap();
        let long_name = "n".repeat(u16::MAX as usize + 1);
        let err = writer.add_file(&src, &long_name).await.unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err:?}");
        assert!(!writer.is_closed());

        writer.add_file(&src, "f.txt").await.unwrap();
        writer.finalize().await.unwrap();

        let reader = ZipReader::open(&dest).await.unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["f.txt"]);
    }

    #[tokio::test]
    async fn empty_archive_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("empty.zip");

        let mut writer = ZipWriter::create(&dest, ArchiveParameters::new()).await.unwrap();
        writer.finalize().await.unwrap();

        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);

        let reader = ZipReader::open(&dest).await.unwrap();
        assert!(reader.entries().is_empty());
    }

    #[tokio::test]
    async fn closed_handle_rejects_more_work() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("closed.zip");
        std::fs::write(dir.path().join("f.txt"), b"data").unwrap();

        let mut writer = ZipWriter::create(&dest, ArchiveParameters::new()).await.unwrap();
        writer.finalize().await.unwrap();
        assert!(writer.is_closed());

        let err = writer.add_file(dir.path().join("f.txt"), "f.txt").await.unwrap_err();
        assert!(matches!(err, Error::ClosedHandle));
        let err = writer.add_folder(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::ClosedHandle));
        assert!(matches!(writer.finalize().await, Err(Error::ClosedHandle)));
    }

    #[tokio::test]
    async fn unfinished_archive_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("never.zip");
        std::fs::write(dir.path().join("f.txt"), b"data").unwrap();

        let mut writer = ZipWriter::create(&dest, ArchiveParameters::new()).await.unwrap();
        writer.add_file(dir.path().join("f.txt"), "f.txt").await.unwrap();
        drop(writer);

        assert!(!dest.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".zipkit-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn local_header_is_patched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("one.zip");
        let src = dir.path().join("hello.txt");
        std::fs::write(&src, b"hello hello hello hello").unwrap();

        let params = ArchiveParameters::new().compression_method(CompressionMethod::Stored);
        let mut writer = ZipWriter::create(&dest, params).await.unwrap();
        writer.add_file(&src, "hello.txt").await.unwrap();
        writer.finalize().await.unwrap();

        let bytes = std::fs::read(&dest).unwrap();
        let crc = u32::from_le_bytes(bytes[14..18].try_into().unwrap());
        let csize = u32::from_le_bytes(bytes[18..22].try_into().unwrap());
        let usize_ = u32::from_le_bytes(bytes[22..26].try_into().unwrap());
        assert_eq!(crc, crc32fast::hash(b"hello hello hello hello"));
        assert_eq!(csize, 23);
        assert_eq!(usize_, 23);
    }

    #[test]
    fn archive_names_use_forward_slashes() {
        let p: PathBuf = ["sub", "dir", "file.txt"].iter().collect();
        assert_eq!(archive_name(&p), "sub/dir/file.txt");
    }

    #[test]
    fn aes_headers_carry_extra_field() {
        let entry = EntryDescriptor {
            file_name: "secret.txt".into(),
            compression_method: CompressionMethod::Deflate,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            flags: FLAG_ENCRYPTED,
            version_made_by: 0,
            external_attributes: 0,
            encryption: EntryEncryption::Aes {
                strength: crate::crypto::AesStrength::Aes256,
                vendor_version: 2,
            },
            is_directory: false,
        };
        let mut header = Vec::new();
        write_local_header(&mut header, &entry);
        assert_eq!(u16::from_le_bytes([header[8], header[9]]), AES_METHOD);
        assert_eq!(header.len(), LFH_SIZE + "secret.txt".len() + 11);
    }
}
