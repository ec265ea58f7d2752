//! Binary encoding of the three descriptor files.
//!
//! Every file is `magic (4) | version (u8) | body | crc32 (u32)`, all
//! little-endian. The CRC covers everything before it. Encoding is
//! deterministic; decoding rejects short, long or corrupted input.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Result, XzipError};
use crate::store::BlobHash;

use super::jump::JumpEntry;
use super::{DirectoryMeta, Segment};

pub const DIR_MAGIC: &[u8; 4] = b"XZDR";
pub const JUMP_MAGIC: &[u8; 4] = b"XZJT";
pub const STREAM_MAGIC: &[u8; 4] = b"XZSM";
pub const VERSION: u8 = 1;

const TAG_LITERAL: u8 = 0;
const TAG_REFERENCE: u8 = 1;

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

fn header(magic: &[u8; 4]) -> Vec<u8> {
    let mut buf = magic.to_vec();
    buf.push(VERSION);
    buf
}

fn seal(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc32(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    body
}

/// Check the trailer and header, returning a cursor over the body.
fn open<'a>(data: &'a [u8], magic: &[u8; 4], source: &str) -> Result<Cursor<&'a [u8]>> {
    if data.len() < magic.len() + 1 + 4 {
        return Err(XzipError::format(source, format!("only {} bytes", data.len())));
    }
    let (body, trailer) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32(body) != stored {
        return Err(XzipError::format(source, "checksum mismatch"));
    }
    if &body[..4] != magic {
        return Err(XzipError::format(source, "bad magic"));
    }
    if body[4] != VERSION {
        return Err(XzipError::format(source, format!("unknown version {}", body[4])));
    }
    let mut cursor = Cursor::new(body);
    cursor.set_position(5);
    Ok(cursor)
}

fn finish(cursor: &Cursor<&[u8]>, source: &str) -> Result<()> {
    let left = cursor.get_ref().len() as u64 - cursor.position();
    if left != 0 {
        return Err(XzipError::format(source, format!("{} trailing bytes", left)));
    }
    Ok(())
}

/// Map a short read inside a body onto a format error.
fn short(source: &str) -> impl Fn(std::io::Error) -> XzipError + '_ {
    move |e| XzipError::format(source, format!("truncated: {}", e))
}

pub fn encode_dir(meta: &DirectoryMeta) -> Vec<u8> {
    let mut buf = header(DIR_MAGIC);
    let name = meta.name.as_bytes();
    buf.extend_from_slice(&meta.total_len.to_le_bytes());
    buf.extend_from_slice(&meta.mode.to_le_bytes());
    buf.extend_from_slice(&meta.mtime_secs.to_le_bytes());
    buf.extend_from_slice(&meta.mtime_nanos.to_le_bytes());
    buf.push(meta.depth);
    buf.extend_from_slice(&meta.entry_count.to_le_bytes());
    buf.extend_from_slice(&meta.segment_count.to_le_bytes());
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(name);
    seal(buf)
}

pub fn decode_dir(data: &[u8], source: &str) -> Result<DirectoryMeta> {
    let mut cursor = open(data, DIR_MAGIC, source)?;
    let err = short(source);

    let total_len = cursor.read_u64::<LittleEndian>().map_err(&err)?;
    let mode = cursor.read_u32::<LittleEndian>().map_err(&err)?;
    let mtime_secs = cursor.read_i64::<LittleEndian>().map_err(&err)?;
    let mtime_nanos = cursor.read_u32::<LittleEndian>().map_err(&err)?;
    let depth = cursor.read_u8().map_err(&err)?;
    let entry_count = cursor.read_u16::<LittleEndian>().map_err(&err)?;
    let segment_count = cursor.read_u32::<LittleEndian>().map_err(&err)?;
    let name_len = cursor.read_u16::<LittleEndian>().map_err(&err)?;
    let mut name = vec![0u8; name_len as usize];
    cursor.read_exact(&mut name).map_err(&err)?;
    finish(&cursor, source)?;

    if mtime_nanos >= 1_000_000_000 {
        return Err(XzipError::format(source, format!("mtime nanos {}", mtime_nanos)));
    }
    let name = String::from_utf8(name)
        .map_err(|_| XzipError::format(source, "archive name is not UTF-8"))?;

    Ok(DirectoryMeta {
        name,
        total_len,
        mode,
        mtime_secs,
        mtime_nanos,
        depth,
        entry_count,
        segment_count,
    })
}

pub fn encode_jump(entries: &[JumpEntry]) -> Vec<u8> {
    let mut buf = header(JUMP_MAGIC);
    buf.reserve(4 + entries.len() * 12 + 4);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.start.to_le_bytes());
        buf.extend_from_slice(&entry.segment.to_le_bytes());
    }
    seal(buf)
}

pub fn decode_jump(data: &[u8], source: &str) -> Result<Vec<JumpEntry>> {
    let mut cursor = open(data, JUMP_MAGIC, source)?;
    let err = short(source);

    let count = cursor.read_u32::<LittleEndian>().map_err(&err)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if remaining != count * 12 {
        return Err(XzipError::format(
            source,
            format!("{} entries declared, {} bytes of entries present", count, remaining),
        ));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let start = cursor.read_u64::<LittleEndian>().map_err(&err)?;
        let segment = cursor.read_u32::<LittleEndian>().map_err(&err)?;
        entries.push(JumpEntry { start, segment });
    }
    finish(&cursor, source)?;
    Ok(entries)
}

pub fn encode_stream(segments: &[Segment]) -> Vec<u8> {
    let mut buf = header(STREAM_MAGIC);
    buf.extend_from_slice(&(segments.len() as u32).to_le_bytes());
    for segment in segments {
        match segment {
            Segment::Literal(bytes) => {
                buf.push(TAG_LITERAL);
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            Segment::Reference { hash, len } => {
                buf.push(TAG_REFERENCE);
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(hash.as_bytes());
            }
        }
    }
    seal(buf)
}

pub fn decode_stream(data: &[u8], source: &str) -> Result<Vec<Segment>> {
    let mut cursor = open(data, STREAM_MAGIC, source)?;
    let err = short(source);

    let count = cursor.read_u32::<LittleEndian>().map_err(&err)? as usize;
    // every segment needs at least 5 bytes; don't trust count for allocation
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if count > remaining / 5 {
        return Err(XzipError::format(
            source,
            format!("{} segments declared in {} bytes", count, remaining),
        ));
    }

    let mut segments = Vec::with_capacity(count);
    for index in 0..count {
        let tag = cursor.read_u8().map_err(&err)?;
        let len = cursor.read_u32::<LittleEndian>().map_err(&err)?;
        let segment = match tag {
            TAG_LITERAL => {
                let remaining = cursor.get_ref().len() as u64 - cursor.position();
                if len as u64 > remaining {
                    return Err(XzipError::format(
                        source,
                        format!("literal {} needs {} bytes, {} left", index, len, remaining),
                    ));
                }
                let mut bytes = vec![0u8; len as usize];
                cursor.read_exact(&mut bytes).map_err(&err)?;
                Segment::Literal(bytes)
            }
            TAG_REFERENCE => {
                let mut hash = [0u8; BlobHash::LEN];
                cursor.read_exact(&mut hash).map_err(&err)?;
                Segment::Reference {
                    hash: BlobHash(hash),
                    len,
                }
            }
            other => {
                return Err(XzipError::format(
                    source,
                    format!("segment {} has unknown tag {}", index, other),
                ));
            }
        };
        segments.push(segment);
    }
    finish(&cursor, source)?;
    Ok(segments)
}
