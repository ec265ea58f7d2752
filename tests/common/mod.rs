//! Builds real zip archives for integration tests.

#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflated,
}

impl Method {
    fn code(self) -> u16 {
        match self {
            Method::Stored => 0,
            Method::Deflated => 8,
        }
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Writes local headers and payloads as entries are added, the central
/// directory and end record on [`build`](Self::build).
pub struct ZipBuilder {
    out: Vec<u8>,
    central: Vec<u8>,
    count: u16,
    comment: Vec<u8>,
    dos_time: u16,
    dos_date: u16,
}

impl Default for ZipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            central: Vec::new(),
            count: 0,
            comment: Vec::new(),
            dos_time: 0x6000,
            dos_date: 0x5821,
        }
    }

    /// Bytes before the first entry, like a self-extractor stub.
    pub fn prefix(mut self, bytes: &[u8]) -> Self {
        assert!(self.out.is_empty());
        self.out.extend_from_slice(bytes);
        self
    }

    /// Timestamp stamped on entries added from now on.
    pub fn timestamp(mut self, time: u16, date: u16) -> Self {
        self.dos_time = time;
        self.dos_date = date;
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn entry(self, name: &str, data: &[u8], method: Method) -> Self {
        self.add(name, data, method, false)
    }

    /// Entry whose sizes and CRC follow the payload in a data descriptor.
    pub fn entry_with_descriptor(self, name: &str, data: &[u8], method: Method) -> Self {
        self.add(name, data, method, true)
    }

    pub fn directory(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.add(name, b"", Method::Stored, false)
    }

    fn add(mut self, name: &str, data: &[u8], method: Method, descriptor: bool) -> Self {
        let payload = match method {
            Method::Stored => data.to_vec(),
            Method::Deflated => deflate(data),
        };
        let crc = crc32(data);
        let flags: u16 = if descriptor { 0x0008 } else { 0 };
        let offset = self.out.len() as u32;
        let name = name.as_bytes();

        let (lfh_crc, lfh_csize, lfh_usize) = if descriptor {
            (0, 0, 0)
        } else {
            (crc, payload.len() as u32, data.len() as u32)
        };
        let out = &mut self.out;
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&method.code().to_le_bytes());
        out.extend_from_slice(&self.dos_time.to_le_bytes());
        out.extend_from_slice(&self.dos_date.to_le_bytes());
        out.extend_from_slice(&lfh_crc.to_le_bytes());
        out.extend_from_slice(&lfh_csize.to_le_bytes());
        out.extend_from_slice(&lfh_usize.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&payload);
        if descriptor {
            out.extend_from_slice(b"PK\x07\x08");
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }

        let external_attrs: u32 = if name.ends_with(b"/") {
            (0o040755 << 16) | 0x10
        } else {
            0o100644 << 16
        };
        let cd = &mut self.central;
        cd.extend_from_slice(b"PK\x01\x02");
        cd.extend_from_slice(&0x031eu16.to_le_bytes());
        cd.extend_from_slice(&20u16.to_le_bytes());
        cd.extend_from_slice(&flags.to_le_bytes());
        cd.extend_from_slice(&method.code().to_le_bytes());
        cd.extend_from_slice(&self.dos_time.to_le_bytes());
        cd.extend_from_slice(&self.dos_date.to_le_bytes());
        cd.extend_from_slice(&crc.to_le_bytes());
        cd.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        cd.extend_from_slice(&(data.len() as u32).to_le_bytes());
        cd.extend_from_slice(&(name.len() as u16).to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes()); // extra
        cd.extend_from_slice(&0u16.to_le_bytes()); // comment
        cd.extend_from_slice(&0u16.to_le_bytes()); // disk
        cd.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        cd.extend_from_slice(&external_attrs.to_le_bytes());
        cd.extend_from_slice(&offset.to_le_bytes());
        cd.extend_from_slice(name);

        self.count += 1;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.out;
        let cd_offset = out.len() as u32;
        out.extend_from_slice(&self.central);

        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&(self.central.len() as u32).to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}

/// Deterministic, poorly compressible filler.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// An archive exercising every structure the exploder has to handle.
pub fn mixed_archive() -> Vec<u8> {
    ZipBuilder::new()
        .directory("docs/")
        .entry("docs/readme.txt", b"read me, read me, read me, read me", Method::Deflated)
        .entry("bin/blob.bin", &noise(5000, 1), Method::Stored)
        .entry_with_descriptor("logs/app.log", &b"line\n".repeat(300), Method::Deflated)
        .entry("empty.txt", b"", Method::Stored)
        .comment(b"built for tests")
        .build()
}

pub fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Number of blob files under `<root>/data`, temporaries excluded.
pub fn count_blobs(root: &Path) -> usize {
    fn walk(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .map(|e| e.unwrap())
            .map(|e| {
                let path = e.path();
                if path.is_dir() {
                    walk(&path)
                } else if e.file_name().to_string_lossy().starts_with(".tmp") {
                    0
                } else {
                    1
                }
            })
            .sum()
    }
    walk(&root.join("data"))
}
