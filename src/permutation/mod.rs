//! Compressed Permutation Store (spec §4.2)
//!
//! One sort order of the triple relation, persisted write-once: the index
//! builder drives [`PermutationWriter`] to completion, then queries only
//! ever go through the read-only [`Permutation`].
//!
//! ## Design
//!
//! Grounded on the teacher's `storage::persist::batch` (`Batch`/`ShardMeta`
//! as the on-disk block/metadata split) and `src/index_manager.rs`'s
//! lazy-load-on-first-use pattern, generalized from one relation's Parquet
//! batches to six fixed sort orders of one triple relation, each with
//! per-block compression instead of a columnar file format.

mod block;
mod metadata;

pub use metadata::{BlockMetadata, PermutationMetadata, RelationMetadata};

use crate::cancellation::CancellationToken;
use crate::error::CancellationError;
use crate::value::Id;
use block::BlockColumns;
use metadata::{METADATA_MAGIC, METADATA_VERSION};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermutationError {
    #[error("permutation I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("permutation metadata is malformed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("scan cancelled: {0}")]
    Cancelled(#[from] CancellationError),

    #[error("permutation file is corrupt: {0}")]
    Corruption(String),

    #[error("permutation is closed")]
    Closed,
}

pub type PermutationResult<T> = Result<T, PermutationError>;

impl From<PermutationError> for crate::error::EngineError {
    fn from(err: PermutationError) -> crate::error::EngineError {
        match err {
            PermutationError::Io(e) => crate::error::EngineError::Io(e),
            PermutationError::Cancelled(e) => crate::error::EngineError::Cancelled(e),
            PermutationError::Bincode(e) => crate::error::EngineError::Corruption(e.to_string()),
            PermutationError::Corruption(msg) => crate::error::EngineError::Corruption(msg),
            PermutationError::Closed => crate::error::EngineError::Internal("permutation is closed".to_string()),
        }
    }
}

/// The out-of-scope SPARQL UPDATE overlay's snapshot token (spec §5: "A
/// reader implementer may treat the snapshot as an empty opaque value").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot;

/// A query over one permutation: `col0` always bound (it drives the block
/// binary search), `filters[i]` is an optional equality constraint on
/// column `i + 1`.
#[derive(Debug, Clone)]
pub struct ScanRange {
    pub col0: Id,
    pub filters: Vec<Option<Id>>,
}

impl ScanRange {
    pub fn exact(col0: Id) -> ScanRange {
        ScanRange {
            col0,
            filters: Vec::new(),
        }
    }

    pub fn with_filters(col0: Id, filters: Vec<Option<Id>>) -> ScanRange {
        ScanRange { col0, filters }
    }

    fn matches(&self, row: &[Id]) -> bool {
        if row[0] != self.col0 {
            return false;
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if let Some(expected) = filter {
                if row.get(i + 1) != Some(expected) {
                    return false;
                }
            }
        }
        true
    }
}

// ---------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PermutationWriterConfig {
    pub width: usize,
    /// Target uncompressed block size in bytes (spec §4.2: "a few MB").
    pub block_target_bytes: usize,
    pub checksum: bool,
}

impl PermutationWriterConfig {
    pub fn new(width: usize) -> PermutationWriterConfig {
        PermutationWriterConfig {
            width,
            block_target_bytes: 4 * 1024 * 1024,
            checksum: true,
        }
    }
}

/// Write-once builder for one permutation. Rows must arrive already sorted
/// by the target key-order (typically straight from
/// [`crate::sorter::SortedBlocks`]).
pub struct PermutationWriter {
    config: PermutationWriterConfig,
    data_file: BufWriter<File>,
    offset: u64,
    pending_rows: Vec<Vec<Id>>,
    pending_bytes: usize,
    blocks: Vec<BlockMetadata>,
    relations: Vec<RelationMetadata>,
}

impl PermutationWriter {
    pub fn create(data_path: impl AsRef<Path>, config: PermutationWriterConfig) -> PermutationResult<PermutationWriter> {
        let data_file = BufWriter::new(File::create(data_path)?);
        Ok(PermutationWriter {
            config,
            data_file,
            offset: 0,
            pending_rows: Vec::new(),
            pending_bytes: 0,
            blocks: Vec::new(),
            relations: Vec::new(),
        })
    }

    /// Append one row (spec §4.2 write path step 1-2). A block boundary is
    /// only placed where the leading column's value changes, so a single
    /// value's rows never straddle two blocks unless that value alone
    /// exceeds `block_target_bytes`.
    pub fn push_row(&mut self, row: &[Id]) -> PermutationResult<()> {
        debug_assert_eq!(row.len(), self.config.width);
        if let Some(last) = self.pending_rows.last() {
            if last[0] != row[0] && self.pending_bytes >= self.config.block_target_bytes {
                self.flush_block()?;
            }
        }
        self.pending_bytes += self.config.width * 8;
        self.pending_rows.push(row.to_vec());
        Ok(())
    }

    pub fn push_rows(&mut self, rows: &[Vec<Id>]) -> PermutationResult<()> {
        for row in rows {
            self.push_row(row)?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> PermutationResult<()> {
        if self.pending_rows.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending_rows);
        self.pending_bytes = 0;

        let first_row = rows[0].clone();
        let last_row = rows[rows.len() - 1].clone();
        let col0 = first_row[0];

        let cols = BlockColumns::from_rows(self.config.width, &rows);
        let mut col_min_max = Vec::with_capacity(self.config.width);
        let mut compressed_col_sizes = Vec::with_capacity(self.config.width);
        let mut block_bytes = Vec::new();
        for column in &cols.columns {
            let min = *column.iter().min().expect("flush_block only runs on a non-empty pending buffer");
            let max = *column.iter().max().expect("flush_block only runs on a non-empty pending buffer");
            col_min_max.push((min, max));
            let compressed = block::compress_column(column)?;
            compressed_col_sizes.push(compressed.len() as u32);
            block_bytes.extend_from_slice(&compressed);
        }

        let checksum = if self.config.checksum {
            crc32fast::hash(&block_bytes)
        } else {
            0
        };

        self.data_file.write_all(&block_bytes)?;
        let compressed_offset = self.offset;
        self.offset += block_bytes.len() as u64;

        let block_index = self.blocks.len();
        self.blocks.push(BlockMetadata {
            first_row,
            last_row,
            col_min_max,
            num_rows: rows.len() as u32,
            compressed_offset,
            compressed_col_sizes,
            checksum,
        });

        match self.relations.last_mut() {
            Some(rel) if rel.col0 == col0 => {
                rel.last_block = block_index;
                rel.num_rows += rows.len() as u64;
            }
            _ => self.relations.push(RelationMetadata {
                col0,
                first_block: block_index,
                last_block: block_index,
                num_rows: rows.len() as u64,
            }),
        }

        Ok(())
    }

    /// Flush any pending rows and write the metadata sidecar. Returns the
    /// metadata that was written, mainly for tests.
    pub fn finish(mut self, meta_path: impl AsRef<Path>) -> PermutationResult<PermutationMetadata> {
        self.flush_block()?;
        self.data_file.flush()?;

        let metadata = PermutationMetadata {
            magic: METADATA_MAGIC,
            version: METADATA_VERSION,
            width: self.config.width,
            key_order: (0..self.config.width).collect(),
            blocks: self.blocks,
            relations: self.relations,
        };
        let file = File::create(meta_path)?;
        bincode::serialize_into(file, &metadata)?;
        Ok(metadata)
    }
}

// ---------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermutationState {
    Unloaded,
    Loaded,
    Closed,
}

/// The read-only side of one permutation: metadata resident in memory,
/// blocks decompressed lazily on demand.
pub struct Permutation {
    metadata: PermutationMetadata,
    data_path: PathBuf,
    checksum: bool,
    state: PermutationState,
}

impl Permutation {
    pub fn load(data_path: impl Into<PathBuf>, meta_path: impl AsRef<Path>, checksum: bool) -> PermutationResult<Permutation> {
        let file = File::open(meta_path)?;
        let metadata: PermutationMetadata = bincode::deserialize_from(file)?;
        if metadata.magic != METADATA_MAGIC {
            return Err(PermutationError::Corruption(format!(
                "bad metadata magic: {:#x}",
                metadata.magic
            )));
        }
        if metadata.version != METADATA_VERSION {
            return Err(PermutationError::Corruption(format!(
                "unsupported metadata version: {}",
                metadata.version
            )));
        }
        Ok(Permutation {
            metadata,
            data_path: data_path.into(),
            checksum,
            state: PermutationState::Loaded,
        })
    }

    pub fn close(&mut self) {
        self.state = PermutationState::Closed;
    }

    fn read_block(&self, index: usize) -> PermutationResult<Vec<Vec<Id>>> {
        if self.state == PermutationState::Closed {
            return Err(PermutationError::Closed);
        }
        let meta = &self.metadata.blocks[index];
        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(meta.compressed_offset))?;
        let mut block_bytes = vec![0u8; meta.total_compressed_size() as usize];
        file.read_exact(&mut block_bytes)?;

        if self.checksum {
            let actual = crc32fast::hash(&block_bytes);
            if actual != meta.checksum {
                return Err(PermutationError::Corruption(format!(
                    "checksum mismatch in block {index}: expected {:#x}, got {:#x}",
                    meta.checksum, actual
                )));
            }
        }

        let mut columns = Vec::with_capacity(self.metadata.width);
        let mut pos = 0usize;
        for &size in &meta.compressed_col_sizes {
            let segment = &block_bytes[pos..pos + size as usize];
            columns.push(block::decompress_column(segment, meta.num_rows as usize)?);
            pos += size as usize;
        }

        let mut rows = Vec::with_capacity(meta.num_rows as usize);
        for r in 0..meta.num_rows as usize {
            rows.push(columns.iter().map(|c| c[r]).collect());
        }
        Ok(rows)
    }

    /// Eagerly materialized scan (spec §4.2 read path). Polls `cancellation`
    /// at every block boundary.
    pub fn scan(
        &self,
        range: &ScanRange,
        cancellation: &CancellationToken,
        _snapshot: &Snapshot,
    ) -> PermutationResult<Vec<Vec<Id>>> {
        let block_range = self.metadata.blocks_covering(&[range.col0]);
        let mut out = Vec::new();
        for index in block_range {
            cancellation.poll("permutation_scan")?;
            let rows = self.read_block(index)?;
            out.extend(rows.into_iter().filter(|r| range.matches(r)));
        }
        Ok(out)
    }

    /// Lazy, block-at-a-time scan for operators feeding a sorter or
    /// another large producer (spec §4.2: "the streaming path is required
    /// for operators whose output feeds a sorter").
    pub fn scan_lazy<'a>(
        &'a self,
        range: ScanRange,
        cancellation: CancellationToken,
    ) -> BlockScanner<'a> {
        let block_range = self.metadata.blocks_covering(&[range.col0]);
        BlockScanner {
            permutation: self,
            range,
            cancellation,
            next_block: block_range.start,
            end_block: block_range.end,
        }
    }

    /// `sizeEstimate` from block boundaries, no decompression (spec §4.2).
    pub fn size_estimate(&self, range: &ScanRange) -> (u64, u64) {
        match self.metadata.relation(range.col0) {
            Some(rel) if range.filters.is_empty() || range.filters.iter().all(Option::is_none) => {
                (rel.num_rows, rel.num_rows)
            }
            Some(rel) => (0, rel.num_rows),
            None => (0, 0),
        }
    }
}

/// Lazy block-by-block iterator returned by [`Permutation::scan_lazy`].
pub struct BlockScanner<'a> {
    permutation: &'a Permutation,
    range: ScanRange,
    cancellation: CancellationToken,
    next_block: usize,
    end_block: usize,
}

impl<'a> BlockScanner<'a> {
    pub fn next_block(&mut self) -> PermutationResult<Option<Vec<Vec<Id>>>> {
        if self.next_block >= self.end_block {
            return Ok(None);
        }
        self.cancellation.poll("permutation_scan_lazy")?;
        let rows = self.permutation.read_block(self.next_block)?;
        self.next_block += 1;
        Ok(Some(
            rows.into_iter().filter(|r| self.range.matches(r)).collect(),
        ))
    }
}

/// The six standard sort orders of the triple relation, loaded together
/// and addressed by name (spec §3's SPO/SOP/PSO/POS/OSP/OPS permutations).
/// Grounded on `src/index_manager.rs`'s lazy-load-on-first-use map.
pub struct PermutationSet {
    permutations: HashMap<&'static str, Permutation>,
}

pub const PERMUTATION_NAMES: [&str; 6] = ["spo", "sop", "pso", "pos", "osp", "ops"];

impl PermutationSet {
    pub fn open(base_path: &Path, checksum: bool) -> PermutationResult<PermutationSet> {
        let mut permutations = HashMap::with_capacity(PERMUTATION_NAMES.len());
        for &name in &PERMUTATION_NAMES {
            let data_path = base_path.with_extension(format!("index.{name}"));
            let meta_path = base_path.with_extension(format!("index.{name}.meta"));
            if !data_path.exists() {
                continue;
            }
            permutations.insert(name, Permutation::load(data_path, meta_path, checksum)?);
        }
        Ok(PermutationSet { permutations })
    }

    pub fn get(&self, name: &str) -> Option<&Permutation> {
        self.permutations.get(name)
    }

    pub fn close_all(&mut self) {
        for permutation in self.permutations.values_mut() {
            permutation.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(a: i64, b: i64, c: i64) -> Vec<Id> {
        vec![Id::from_int(a), Id::from_int(b), Id::from_int(c)]
    }

    #[test]
    fn write_then_scan_round_trips_rows() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("test.index.spo");
        let meta_path = dir.path().join("test.index.spo.meta");

        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(3)).unwrap();
        writer.push_row(&row(1, 10, 100)).unwrap();
        writer.push_row(&row(1, 10, 200)).unwrap();
        writer.push_row(&row(2, 20, 300)).unwrap();
        writer.finish(&meta_path).unwrap();

        let permutation = Permutation::load(&data_path, &meta_path, true).unwrap();
        let token = CancellationToken::no_deadline();
        let results = permutation
            .scan(&ScanRange::exact(Id::from_int(1)), &token, &Snapshot)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r[0] == Id::from_int(1)));
    }

    #[test]
    fn scan_with_filter_narrows_results() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("test.index.spo");
        let meta_path = dir.path().join("test.index.spo.meta");

        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(3)).unwrap();
        writer.push_row(&row(1, 10, 100)).unwrap();
        writer.push_row(&row(1, 20, 200)).unwrap();
        writer.finish(&meta_path).unwrap();

        let permutation = Permutation::load(&data_path, &meta_path, true).unwrap();
        let token = CancellationToken::no_deadline();
        let range = ScanRange::with_filters(Id::from_int(1), vec![Some(Id::from_int(20))]);
        let results = permutation.scan(&range, &token, &Snapshot).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0][1], Id::from_int(20));
    }

    #[test]
    fn missing_leading_value_returns_empty() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("test.index.spo");
        let meta_path = dir.path().join("test.index.spo.meta");

        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(3)).unwrap();
        writer.push_row(&row(1, 10, 100)).unwrap();
        writer.finish(&meta_path).unwrap();

        let permutation = Permutation::load(&data_path, &meta_path, true).unwrap();
        let token = CancellationToken::no_deadline();
        let results = permutation
            .scan(&ScanRange::exact(Id::from_int(999)), &token, &Snapshot)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn lazy_scan_yields_same_rows_as_eager_scan() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("test.index.spo");
        let meta_path = dir.path().join("test.index.spo.meta");

        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig {
            width: 3,
            block_target_bytes: 1, // force a new block per distinct col0
            checksum: true,
        }).unwrap();
        for i in 0..5 {
            writer.push_row(&row(i, 0, 0)).unwrap();
        }
        writer.finish(&meta_path).unwrap();

        let permutation = Permutation::load(&data_path, &meta_path, true).unwrap();
        let token = CancellationToken::no_deadline();
        let mut scanner = permutation.scan_lazy(ScanRange::exact(Id::from_int(3)), token);
        let mut all = Vec::new();
        while let Some(block) = scanner.next_block().unwrap() {
            all.extend(block);
        }
        assert_eq!(all.len(), 1);
        assert_eq!(all[0][0], Id::from_int(3));
    }

    #[test]
    fn size_estimate_reads_relation_metadata_without_decompressing() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("test.index.spo");
        let meta_path = dir.path().join("test.index.spo.meta");

        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(3)).unwrap();
        for _ in 0..7 {
            writer.push_row(&row(1, 0, 0)).unwrap();
        }
        writer.finish(&meta_path).unwrap();

        let permutation = Permutation::load(&data_path, &meta_path, true).unwrap();
        let (lower, upper) = permutation.size_estimate(&ScanRange::exact(Id::from_int(1)));
        assert_eq!((lower, upper), (7, 7));
    }

    #[test]
    fn corrupted_block_bytes_fail_checksum() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("test.index.spo");
        let meta_path = dir.path().join("test.index.spo.meta");

        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(3)).unwrap();
        writer.push_row(&row(1, 10, 100)).unwrap();
        writer.finish(&meta_path).unwrap();

        // Flip a byte in the data file to corrupt it.
        let mut bytes = std::fs::read(&data_path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&data_path, bytes).unwrap();

        let permutation = Permutation::load(&data_path, &meta_path, true).unwrap();
        let token = CancellationToken::no_deadline();
        let result = permutation.scan(&ScanRange::exact(Id::from_int(1)), &token, &Snapshot);
        assert!(matches!(result, Err(PermutationError::Corruption(_))));
    }
}
