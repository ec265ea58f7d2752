//! Offset index over a segment stream.

use std::ops::Range;

use crate::error::{Result, XzipError};

/// Start offset of one segment in the reassembled archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpEntry {
    pub start: u64,
    pub segment: u32,
}

/// Sorted `(start offset, segment index)` pairs, one per segment.
///
/// Entries begin at 0, are strictly increasing, and together with the total
/// length partition `[0, total_len)` with no gaps, so a binary search gives
/// the one segment covering any in-range offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpTable {
    entries: Vec<JumpEntry>,
    total_len: u64,
}

impl JumpTable {
    /// Build the table from segment lengths in stream order.
    ///
    /// Every length must be non-zero; an empty segment would share its start
    /// offset with its successor.
    pub fn from_lengths<I: IntoIterator<Item = u64>>(lengths: I) -> Self {
        let mut entries = Vec::new();
        let mut offset = 0u64;
        for (i, len) in lengths.into_iter().enumerate() {
            debug_assert!(len > 0, "segment {} is empty", i);
            entries.push(JumpEntry {
                start: offset,
                segment: i as u32,
            });
            offset += len;
        }
        Self {
            entries,
            total_len: offset,
        }
    }

    /// Wrap decoded entries, checking the partition invariant.
    pub fn from_entries(entries: Vec<JumpEntry>, total_len: u64) -> Result<Self> {
        let table = Self { entries, total_len };
        table.validate().map_err(|reason| XzipError::format("jump table", reason))?;
        Ok(table)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let Some(first) = self.entries.first() else {
            return if self.total_len == 0 {
                Ok(())
            } else {
                Err(format!("no entries for {} bytes", self.total_len))
            };
        };
        if first.start != 0 {
            return Err(format!("first entry starts at {}, not 0", first.start));
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.segment as usize != i {
                return Err(format!("entry {} names segment {}", i, entry.segment));
            }
            if i > 0 && entry.start <= self.entries[i - 1].start {
                return Err(format!(
                    "entry {} starts at {}, not after {}",
                    i,
                    entry.start,
                    self.entries[i - 1].start
                ));
            }
        }
        let last = self.entries[self.entries.len() - 1];
        if last.start >= self.total_len {
            return Err(format!(
                "last entry starts at {}, past total length {}",
                last.start, self.total_len
            ));
        }
        Ok(())
    }

    pub fn entries(&self) -> &[JumpEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Index of the segment covering `offset`, or `None` at or past the end.
    pub fn locate(&self, offset: u64) -> Option<usize> {
        if offset >= self.total_len {
            return None;
        }
        // greatest start <= offset
        let idx = self.entries.partition_point(|e| e.start <= offset);
        Some(idx - 1)
    }

    /// Byte range of segment `index` in the reassembled archive.
    pub fn range(&self, index: usize) -> Range<u64> {
        let start = self.entries[index].start;
        let end = self
            .entries
            .get(index + 1)
            .map(|e| e.start)
            .unwrap_or(self.total_len);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_locate_boundaries() {
        let table = JumpTable::from_lengths([30, 100, 16]);
        assert_eq!(table.total_len(), 146);
        assert_eq!(table.locate(0), Some(0));
        assert_eq!(table.locate(29), Some(0));
        assert_eq!(table.locate(30), Some(1));
        assert_eq!(table.locate(129), Some(1));
        assert_eq!(table.locate(130), Some(2));
        assert_eq!(table.locate(145), Some(2));
        assert_eq!(table.locate(146), None);
        assert_eq!(table.range(1), 30..130);
        assert_eq!(table.range(2), 130..146);
    }

    #[test]
    fn test_empty_table() {
        let table = JumpTable::from_lengths(std::iter::empty());
        assert!(table.is_empty());
        assert_eq!(table.locate(0), None);
        assert!(JumpTable::from_entries(Vec::new(), 0).is_ok());
        assert!(JumpTable::from_entries(Vec::new(), 5).is_err());
    }

    #[test]
    fn test_rejects_bad_tables() {
        let e = |start, segment| JumpEntry { start, segment };
        assert!(JumpTable::from_entries(vec![e(1, 0)], 10).is_err());
        assert!(JumpTable::from_entries(vec![e(0, 0), e(0, 1)], 10).is_err());
        assert!(JumpTable::from_entries(vec![e(0, 0), e(5, 2)], 10).is_err());
        assert!(JumpTable::from_entries(vec![e(0, 0), e(10, 1)], 10).is_err());
        assert!(JumpTable::from_entries(vec![e(0, 0), e(4, 1)], 10).is_ok());
    }

    proptest! {
        #[test]
        fn prop_partition_covers_every_offset(lengths in prop::collection::vec(1u64..500, 1..40)) {
            let table = JumpTable::from_lengths(lengths.clone());
            prop_assert!(JumpTable::from_entries(table.entries().to_vec(), table.total_len()).is_ok());
            prop_assert_eq!(table.total_len(), lengths.iter().sum::<u64>());

            let mut expected_start = 0u64;
            for (i, len) in lengths.iter().enumerate() {
                let range = table.range(i);
                prop_assert_eq!(range.start, expected_start);
                prop_assert_eq!(range.end - range.start, *len);
                prop_assert_eq!(table.locate(range.start), Some(i));
                prop_assert_eq!(table.locate(range.end - 1), Some(i));
                expected_start = range.end;
            }
            prop_assert_eq!(table.locate(expected_start), None);
        }
    }
}
