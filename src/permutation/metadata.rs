//! On-disk metadata for one permutation: the sidecar read at `load()` time
//! and used to drive the binary search in [`super::Permutation::scan`].

use crate::value::Id;
use serde::{Deserialize, Serialize};

/// Per-block bookkeeping written alongside the compressed block bytes.
/// `first_row`/`last_row` are full rows (width columns), compared
/// lexicographically by [`Id::compare_without_local_vocab`] — this is what
/// the binary search over blocks keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub first_row: Vec<Id>,
    pub last_row: Vec<Id>,
    /// Per-payload-column `(min, max)`, used for `size_estimate` pruning
    /// without decompressing the block.
    pub col_min_max: Vec<(Id, Id)>,
    pub num_rows: u32,
    /// Byte offset of this block's compressed bytes within the data file.
    pub compressed_offset: u64,
    /// Compressed size, in bytes, of each column's independently
    /// compressed segment, in column order. Summing gives the block's
    /// total compressed size.
    pub compressed_col_sizes: Vec<u32>,
    /// CRC32 over the raw concatenated compressed bytes, checked on read
    /// when the permutation is configured to verify checksums.
    pub checksum: u32,
}

impl BlockMetadata {
    pub fn total_compressed_size(&self) -> u64 {
        self.compressed_col_sizes.iter().map(|&s| s as u64).sum()
    }
}

/// One entry per distinct value of the leading (index) column: the block
/// range that holds every row with that value, plus a row count used for
/// `size_estimate` without even consulting block metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMetadata {
    pub col0: Id,
    pub first_block: usize,
    pub last_block: usize,
    pub num_rows: u64,
}

/// The full sidecar: written once by [`super::PermutationWriter::finish`],
/// read once by [`super::Permutation::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermutationMetadata {
    pub magic: u32,
    pub version: u32,
    pub width: usize,
    pub key_order: Vec<usize>,
    pub blocks: Vec<BlockMetadata>,
    pub relations: Vec<RelationMetadata>,
}

/// Arbitrary constant distinguishing a permutation metadata file from
/// other binary formats; checked on load, a mismatch is `Corruption`.
pub const METADATA_MAGIC: u32 = 0x5350_4143; // "SPAC"
pub const METADATA_VERSION: u32 = 1;

impl PermutationMetadata {
    /// Binary search for the range of block indices that could contain
    /// `prefix` (spec §4.2: "the block range whose first row is ≤ the query
    /// prefix and last row is ≥ it").
    pub fn blocks_covering(&self, prefix: &[Id]) -> std::ops::Range<usize> {
        let start = self.blocks.partition_point(|b| {
            compare_prefix(&b.last_row, prefix) == std::cmp::Ordering::Less
        });
        let end = self.blocks.partition_point(|b| {
            compare_prefix(&b.first_row, prefix) != std::cmp::Ordering::Greater
        });
        start..end.max(start)
    }

    pub fn relation(&self, col0: Id) -> Option<&RelationMetadata> {
        self.relations
            .binary_search_by(|r| r.col0.compare_without_local_vocab(&col0))
            .ok()
            .map(|i| &self.relations[i])
    }
}

/// Compares `row`'s first `prefix.len()` columns against `prefix`
/// lexicographically.
fn compare_prefix(row: &[Id], prefix: &[Id]) -> std::cmp::Ordering {
    for (a, b) in row.iter().zip(prefix.iter()) {
        let ord = a.compare_without_local_vocab(b);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(first: i64, last: i64) -> BlockMetadata {
        BlockMetadata {
            first_row: vec![Id::from_int(first)],
            last_row: vec![Id::from_int(last)],
            col_min_max: vec![],
            num_rows: (last - first + 1) as u32,
            compressed_offset: 0,
            compressed_col_sizes: vec![],
            checksum: 0,
        }
    }

    #[test]
    fn blocks_covering_finds_single_matching_block() {
        let meta = PermutationMetadata {
            magic: METADATA_MAGIC,
            version: METADATA_VERSION,
            width: 1,
            key_order: vec![0],
            blocks: vec![block(0, 9), block(10, 19), block(20, 29)],
            relations: vec![],
        };
        let range = meta.blocks_covering(&[Id::from_int(15)]);
        assert_eq!(range, 1..2);
    }

    #[test]
    fn blocks_covering_returns_empty_range_for_missing_value() {
        let meta = PermutationMetadata {
            magic: METADATA_MAGIC,
            version: METADATA_VERSION,
            width: 1,
            key_order: vec![0],
            blocks: vec![block(0, 9), block(20, 29)],
            relations: vec![],
        };
        let range = meta.blocks_covering(&[Id::from_int(15)]);
        assert_eq!(range.start, range.end);
    }
}
