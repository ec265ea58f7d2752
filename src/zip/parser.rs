//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Reject ZIP64 archives (sentinel values or a ZIP64 locator)
//! 3. Read the Central Directory to get metadata for all files
//! 4. For each entry, read its Local File Header to learn where the data begins
//!
//! The explode engine needs exact byte boundaries rather than file contents,
//! so the parser never decompresses anything.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Result, XzipError};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// Generic over the reader type, so the same parser runs against
/// archives on disk, in memory, or reassembled from a descriptor.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let cd = parser.read_central_directory().await?;
/// for entry in &cd.entries {
///     let lfh = parser.read_local_header(entry).await?;
///     let data_offset = entry.lfh_offset + lfh.header_len();
/// }
/// ```
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
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(XzipError::parse(format!(
                "file too small to be a zip archive ({} bytes)",
                self.size
            )));
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;

        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            if self.plausible_eocd(&eocd, offset).await? {
                return Ok((eocd, offset));
            }
        }

        // EOCD not at expected location - the archive has a comment.
        // Search backwards from the end of the file.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must reach exactly to end of file.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    let candidate = search_start + i as u64;
                    if self.plausible_eocd(&eocd, candidate).await? {
                        return Ok((eocd, candidate));
                    }
                }
            }
        }

        Err(XzipError::parse("no End of Central Directory record found"))
    }

    /// Whether an EOCD-shaped record at `offset` points at a central directory.
    ///
    /// Comments may contain bytes that look like an EOCD. A real one has its
    /// directory ending at or before it, starting with a CDFH signature when
    /// it has entries. ZIP64 sentinels are accepted here and rejected later.
    async fn plausible_eocd(&self, eocd: &EndOfCentralDirectory, offset: u64) -> Result<bool> {
        if eocd.is_zip64() {
            return Ok(true);
        }
        let cd_offset = eocd.cd_offset as u64;
        if cd_offset + eocd.cd_size as u64 > offset {
            return Ok(false);
        }
        if eocd.total_entries == 0 {
            return Ok(true);
        }
        if (eocd.cd_size as usize) < CDFH_SIGNATURE.len() {
            return Ok(false);
        }
        let mut sig = [0u8; 4];
        self.reader.read_exact_at(cd_offset, &mut sig).await?;
        Ok(sig == CDFH_SIGNATURE)
    }

    /// Fail if the archive uses ZIP64 extensions anywhere the EOCD can tell us.
    async fn reject_zip64(&self, eocd: &EndOfCentralDirectory, eocd_offset: u64) -> Result<()> {
        if eocd.is_zip64() {
            return Err(XzipError::Zip64Unsupported(
                "End of Central Directory carries ZIP64 sentinel values".to_string(),
            ));
        }

        // The ZIP64 EOCD Locator sits immediately before the regular EOCD
        if eocd_offset >= ZIP64_LOCATOR_SIZE as u64 {
            let mut sig = [0u8; 4];
            self.reader
                .read_exact_at(eocd_offset - ZIP64_LOCATOR_SIZE as u64, &mut sig)
                .await?;
            if sig == ZIP64_LOCATOR_SIGNATURE {
                return Err(XzipError::Zip64Unsupported(
                    "ZIP64 End of Central Directory Locator present".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Read and parse the whole Central Directory.
    ///
    /// Validates that the directory lies before the EOCD and that
    /// every record the EOCD promises is present.
    pub async fn read_central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        self.reject_zip64(&eocd, eocd_offset).await?;

        if eocd.disk_number != 0 || eocd.disk_with_cd != 0 {
            return Err(XzipError::parse("multi-disk archives are not supported"));
        }

        let cd_offset = eocd.cd_offset as u64;
        let cd_size = eocd.cd_size as u64;
        if cd_offset + cd_size > eocd_offset {
            return Err(XzipError::parse(format!(
                "central directory [{}, {}) overruns End of Central Directory at {}",
                cd_offset,
                cd_offset + cd_size,
                eocd_offset
            )));
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(eocd.total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for index in 0..eocd.total_entries {
            let entry = Self::parse_cdfh(&mut cursor).map_err(|e| match e {
                XzipError::Io(io) => XzipError::parse(format!(
                    "central directory record {} is truncated: {}",
                    index, io
                )),
                other => other,
            })?;
            entries.push(entry);
        }

        Ok(CentralDirectory {
            entries,
            offset: cd_offset,
            size: cd_size,
            eocd_offset,
        })
    }

    /// List all entries in the ZIP archive.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        Ok(self.read_central_directory().await?.entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(XzipError::parse("invalid Central Directory File Header"));
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset = cursor.read_u32::<LittleEndian>()?;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        if compressed_size == 0xFFFFFFFF
            || uncompressed_size == 0xFFFFFFFF
            || lfh_offset == 0xFFFFFFFF
        {
            return Err(XzipError::Zip64Unsupported(format!(
                "entry {} uses ZIP64 sizes or offsets",
                file_name
            )));
        }

        // Skip extra field and comment; both stay in the literal directory bytes
        let skip = extra_field_length as u64 + file_comment_length as u64;
        let end = cursor.position() + skip;
        if end > cursor.get_ref().len() as u64 {
            return Err(XzipError::parse(format!(
                "central directory record for {} is truncated",
                file_name
            )));
        }
        cursor.set_position(end);

        let is_directory = file_name.ends_with('/');

        Ok(ZipFileEntry {
            file_name,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            crc32,
            lfh_offset: lfh_offset as u64,
            is_directory,
        })
    }

    /// Read and parse the Local File Header of an entry.
    ///
    /// The LFH has variable-length fields (filename, extra field) that may
    /// differ from the Central Directory entry, so the data offset must be
    /// computed from the LFH itself.
    pub async fn read_local_header(&self, entry: &ZipFileEntry) -> Result<LocalFileHeader> {
        if entry.lfh_offset + LFH_SIZE as u64 > self.size {
            return Err(XzipError::parse(format!(
                "local header of {} at offset {} lies past end of archive",
                entry.file_name, entry.lfh_offset
            )));
        }

        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf).await?;

        LocalFileHeader::from_bytes(&lfh_buf).map_err(|_| {
            XzipError::parse(format!(
                "invalid local header for {} at offset {}",
                entry.file_name, entry.lfh_offset
            ))
        })
    }

    /// Get the actual data offset for a file entry.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let lfh = self.read_local_header(entry).await?;
        Ok(entry.lfh_offset + lfh.header_len())
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
