//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Any structural inconsistency (missing EOCD, a directory that points
//! outside the file, a short or over-long directory) is reported as
//! [`Error::Format`].

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bit 6 of the general purpose flags: PKWARE strong encryption
const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;

/// Low-level ZIP file parser.
///
/// Generic over the reader type so archives can come from a local file or
/// from memory. Typically used through [`ZipReader`](super::ZipReader).
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Tries the no-comment position first, then searches backwards through
    /// the largest possible comment.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // The comment length must account for every byte after the record.
        if buf.len() >= EndOfCentralDirectory::SIZE {
            for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
                if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                    let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                    if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                        let eocd = EndOfCentralDirectory::from_bytes(
                            &buf[i..i + EndOfCentralDirectory::SIZE],
                        )?;
                        return Ok((eocd, search_start + i as u64));
                    }
                }
            }
        }

        Err(Error::format("end of central directory record not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::format("missing ZIP64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all entries in the archive, in central directory order.
    pub async fn list_files(&self) -> Result<Vec<EntryDescriptor>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        // The directory has to sit entirely before the record that describes it.
        let fits = cd_offset
            .checked_add(cd_size)
            .is_some_and(|end| end <= eocd_offset);
        if !fits {
            return Err(Error::format("central directory lies outside the archive"));
        }
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            return Err(Error::format(format!(
                "central directory of {cd_size} bytes cannot hold {total_entries} entries"
            )));
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for index in 0..total_entries {
            let entry = Self::parse_cdfh(&mut cursor).map_err(|e| match e {
                Error::Io(io) => {
                    Error::format(format!("central directory truncated at entry {index}: {io}"))
                }
                other => other,
            })?;
            entries.push(entry);
        }

        if cursor.position() != cd_size {
            return Err(Error::format(format!(
                "declared entry count {total_entries} does not match central directory"
            )));
        }

        // Every local header and payload sits in front of the central directory.
        for entry in &entries {
            let payload_end = entry
                .lfh_offset
                .checked_add(LFH_SIZE as u64)
                .and_then(|end| end.checked_add(entry.compressed_size));
            if !payload_end.is_some_and(|end| end <= cd_offset) {
                return Err(Error::format(format!(
                    "payload of {} runs past end of archive",
                    entry.file_name
                )));
            }
        }

        Ok(entries)
    }

    /// Parse one Central Directory File Header from a cursor.
    pub(crate) fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<EntryDescriptor> {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(Error::format("invalid central directory file header"));
        }

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();
        let is_directory = file_name.ends_with('/') || file_name.ends_with('\\');

        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra)?;

        let mut aes = None;
        let mut extra_cursor = Cursor::new(extra.as_slice());
        while extra_cursor.position() + 4 <= extra.len() as u64 {
            let header_id = extra_cursor.read_u16::<LittleEndian>()?;
            let field_size = extra_cursor.read_u16::<LittleEndian>()? as u64;
            let field_start = extra_cursor.position();
            let field_end = field_start + field_size;
            if field_end > extra.len() as u64 {
                break;
            }

            match header_id {
                ZIP64_EXTRA_ID => {
                    // Fields are present only if the header field is saturated
                    if uncompressed_size == 0xFFFFFFFF && extra_cursor.position() + 8 <= field_end {
                        uncompressed_size = extra_cursor.read_u64::<LittleEndian>()?;
                    }
                    if compressed_size == 0xFFFFFFFF && extra_cursor.position() + 8 <= field_end {
                        compressed_size = extra_cursor.read_u64::<LittleEndian>()?;
                    }
                    if lfh_offset == 0xFFFFFFFF && extra_cursor.position() + 8 <= field_end {
                        lfh_offset = extra_cursor.read_u64::<LittleEndian>()?;
                    }
                }
                AesExtraField::ID => {
                    let data = &extra[field_start as usize..field_end as usize];
                    aes = Some(AesExtraField::from_bytes(data)?);
                }
                _ => {}
            }

            extra_cursor.set_position(field_end);
        }

        // Skip over the file comment
        cursor.set_position(cursor.position() + file_comment_length as u64);
        if cursor.position() > cursor.get_ref().len() as u64 {
            return Err(Error::format("file comment runs past central directory"));
        }

        let (compression_method, encryption) = if flags & FLAG_ENCRYPTED == 0 {
            (CompressionMethod::from_u16(compression_method), EntryEncryption::None)
        } else if compression_method == AES_METHOD {
            let aes = aes.ok_or_else(|| {
                Error::format(format!("AES entry {file_name} has no AES extra field"))
            })?;
            (
                CompressionMethod::from_u16(aes.compression_method),
                EntryEncryption::Aes {
                    strength: aes.strength,
                    vendor_version: aes.vendor_version,
                },
            )
        } else if flags & FLAG_STRONG_ENCRYPTION != 0 {
            return Err(Error::format(format!(
                "entry {file_name} uses unsupported strong encryption"
            )));
        } else {
            (CompressionMethod::from_u16(compression_method), EntryEncryption::ZipCrypto)
        };

        Ok(EntryDescriptor {
            file_name,
            compression_method,
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            flags,
            version_made_by,
            external_attributes,
            encryption,
            is_directory,
        })
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header has variable-length fields (filename, extra
    /// field) that may differ from the Central Directory entry, so it is read
    /// to find where the payload begins.
    pub async fn get_data_offset(&self, entry: &EntryDescriptor) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf).await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::format(format!(
                "invalid local file header for {}",
                entry.file_name
            )));
        }

        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26); // Offset to filename length field

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        let data_offset = entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64 + file_name_length + extra_field_length);
        let payload_end = data_offset.and_then(|start| start.checked_add(entry.compressed_size));

        match (data_offset, payload_end) {
            (Some(start), Some(end)) if end <= self.size => Ok(start),
            _ => Err(Error::format(format!(
                "payload of {} runs past end of archive",
                entry.file_name
            ))),
        }
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}
