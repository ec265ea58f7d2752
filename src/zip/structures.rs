use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, XzipError};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(XzipError::parse("invalid End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator signature. Only detected, never parsed.
pub const ZIP64_LOCATOR_SIGNATURE: &[u8] = b"PK\x06\x07";
pub const ZIP64_LOCATOR_SIZE: usize = 20;

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// General purpose flag bit: sizes and CRC follow the data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Parsed Local File Header: only the parts that decide its length.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LFH_SIZE || &data[0..4] != LFH_SIGNATURE {
            return Err(XzipError::parse("invalid Local File Header"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;

        // Offset to filename length field
        cursor.set_position(22);
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            file_name_length,
            extra_field_length,
        })
    }

    /// Bytes from the signature to the first byte of entry data.
    pub fn header_len(&self) -> u64 {
        LFH_SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Parsed ZIP file entry information, taken from the central directory
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// Location and contents of an archive's central directory
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    pub entries: Vec<ZipFileEntry>,
    /// Offset of the first central directory record
    pub offset: u64,
    pub size: u64,
    /// Offset of the End of Central Directory record
    pub eocd_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd_bytes(entries: u16, cd_size: u32, cd_offset: u32) -> Vec<u8> {
        let mut buf = EndOfCentralDirectory::SIGNATURE.to_vec();
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf
    }

    #[test]
    fn test_eocd_parse() {
        let eocd = EndOfCentralDirectory::from_bytes(&eocd_bytes(3, 120, 4000)).unwrap();
        assert_eq!(eocd.total_entries, 3);
        assert_eq!(eocd.cd_size, 120);
        assert_eq!(eocd.cd_offset, 4000);
        assert!(!eocd.is_zip64());
    }

    #[test]
    fn test_eocd_zip64_sentinel() {
        let eocd = EndOfCentralDirectory::from_bytes(&eocd_bytes(3, 120, 0xFFFFFFFF)).unwrap();
        assert!(eocd.is_zip64());
    }

    #[test]
    fn test_eocd_bad_signature() {
        let mut data = eocd_bytes(0, 0, 0);
        data[3] = 0x07;
        assert!(matches!(
            EndOfCentralDirectory::from_bytes(&data),
            Err(XzipError::Parse(_))
        ));
    }

    #[test]
    fn test_local_header_len() {
        let mut data = LFH_SIGNATURE.to_vec();
        data.extend_from_slice(&20u16.to_le_bytes()); // version
        data.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes()); // deflate
        data.extend_from_slice(&[0u8; 16]); // time, date, crc, sizes
        data.extend_from_slice(&5u16.to_le_bytes());
        data.extend_from_slice(&9u16.to_le_bytes());
        let lfh = LocalFileHeader::from_bytes(&data).unwrap();
        assert_eq!(lfh.compression_method, CompressionMethod::Deflate);
        assert_eq!(lfh.flags, FLAG_DATA_DESCRIPTOR);
        assert_eq!(lfh.header_len(), 30 + 5 + 9);
    }
}
