//! External Id-Table Sorter
//!
//! Sorts an arbitrarily large stream of fixed-width [`Id`] rows under a
//! fixed memory budget (spec §4.3): accumulate rows into an in-memory
//! buffer sized to the budget, sort and spill it as a "run" once full,
//! then perform a k-way merge across all runs (plus whatever's still in
//! memory) on `finish`.
//!
//! ## Design
//!
//! Grounded on the teacher's persistence layer
//! (`storage::persist::consolidate`'s "merge several update streams by key"
//! shape, and `storage::persist::mod`'s buffer-then-flush-to-file pattern),
//! generalized from `(data, time, diff)` updates to plain `Id` rows sorted
//! by a caller-supplied comparator.

mod run_file;

use crate::memory::{AllocationExceedsLimit, QueryAllocator};
use crate::value::Id;
use rayon::prelude::*;
use run_file::RunFile;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SorterError {
    #[error("sorter I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sorter memory budget exceeded: {0}")]
    Allocation(#[from] AllocationExceedsLimit),

    #[error("push() called after getSortedBlocks(): the sorter is single-use")]
    AlreadyFinished,

    #[error("row width {actual} does not match configured width {expected}")]
    WidthMismatch { expected: usize, actual: usize },
}

pub type SorterResult<T> = Result<T, SorterError>;

impl From<SorterError> for crate::error::EngineError {
    fn from(err: SorterError) -> crate::error::EngineError {
        match err {
            SorterError::Io(e) => crate::error::EngineError::Io(e),
            SorterError::Allocation(e) => crate::error::EngineError::AllocationExceedsLimit(e),
            other => crate::error::EngineError::Internal(other.to_string()),
        }
    }
}

/// A row comparator imposing a strict weak ordering, typically a
/// lexicographic key-order over three or four columns (spec §4.3). Tie
/// breaking on a designated "graph" column is the caller's responsibility
/// when sorting triples, so identical triples across graphs stay distinct.
pub trait RowComparator: Send + Sync {
    fn compare(&self, a: &[Id], b: &[Id]) -> Ordering;
}

/// A lexicographic comparator over an explicit column permutation — the
/// common case (spec §3: "A key-order is a 4-element permutation of column
/// indices").
#[derive(Clone, Debug)]
pub struct KeyOrder {
    pub columns: Vec<usize>,
}

impl KeyOrder {
    pub fn new(columns: Vec<usize>) -> KeyOrder {
        KeyOrder { columns }
    }

    pub fn spo() -> KeyOrder {
        KeyOrder::new(vec![0, 1, 2, 3])
    }

    /// The column order for one of the six permutation names (spec §4.2),
    /// column 3 (graph) always trailing as the tie-break. `None` for any
    /// other string.
    pub fn for_permutation(name: &str) -> Option<KeyOrder> {
        let columns = match name {
            "spo" => [0, 1, 2],
            "sop" => [0, 2, 1],
            "pso" => [1, 0, 2],
            "pos" => [1, 2, 0],
            "osp" => [2, 0, 1],
            "ops" => [2, 1, 0],
            _ => return None,
        };
        Some(KeyOrder::new(vec![columns[0], columns[1], columns[2], 3]))
    }
}

impl RowComparator for KeyOrder {
    fn compare(&self, a: &[Id], b: &[Id]) -> Ordering {
        for &c in &self.columns {
            let ord = a[c].compare_without_local_vocab(&b[c]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Configuration for an [`ExternalSorter`].
#[derive(Clone, Debug)]
pub struct SorterConfig {
    /// Row width (number of `Id` columns per row).
    pub width: usize,
    /// Target number of rows per output block from `get_sorted_blocks`.
    pub block_size: usize,
    /// Directory for spilled run files.
    pub spill_dir: PathBuf,
}

impl SorterConfig {
    pub fn new(width: usize, spill_dir: impl Into<PathBuf>) -> SorterConfig {
        SorterConfig {
            width,
            block_size: 100_000,
            spill_dir: spill_dir.into(),
        }
    }
}

struct Row(Vec<Id>);

/// A memory-bounded, streaming sort-merge engine. `push`/`push_block` while
/// in the write phase; `get_sorted_blocks` transitions to the read phase
/// and the sorter can no longer accept rows (spec §4.3: "single-use").
pub struct ExternalSorter<C: RowComparator> {
    config: SorterConfig,
    comparator: C,
    allocator: QueryAllocator,
    buffer: Vec<Row>,
    buffer_bytes: u64,
    budget_bytes: u64,
    runs: Vec<RunFile>,
    finished: bool,
}

impl<C: RowComparator> ExternalSorter<C> {
    pub fn new(config: SorterConfig, comparator: C, allocator: QueryAllocator, budget_bytes: u64) -> Self {
        ExternalSorter {
            config,
            comparator,
            allocator,
            buffer: Vec::new(),
            buffer_bytes: 0,
            budget_bytes,
            runs: Vec::new(),
            finished: false,
        }
    }

    fn row_bytes(&self) -> u64 {
        (self.config.width * std::mem::size_of::<Id>()) as u64
    }

    /// Append one row. May trigger a spill of the current in-memory buffer
    /// to a sorted run file if the buffer has grown to the memory budget.
    pub fn push(&mut self, row: &[Id]) -> SorterResult<()> {
        if self.finished {
            return Err(SorterError::AlreadyFinished);
        }
        if row.len() != self.config.width {
            return Err(SorterError::WidthMismatch {
                expected: self.config.width,
                actual: row.len(),
            });
        }
        let row_bytes = self.row_bytes();
        if self.buffer_bytes + row_bytes > self.budget_bytes && !self.buffer.is_empty() {
            self.spill_buffer()?;
        }
        self.allocator.reserve(row_bytes)?;
        self.buffer.push(Row(row.to_vec()));
        self.buffer_bytes += row_bytes;
        Ok(())
    }

    pub fn push_block(&mut self, rows: &[Vec<Id>]) -> SorterResult<()> {
        for row in rows {
            self.push(row)?;
        }
        Ok(())
    }

    /// Step 1 of the algorithm: sort the in-memory buffer in parallel and
    /// spill it to a temporary run file. The buffer's reserved bytes are
    /// released from the allocator since the run file owns the data now.
    fn spill_buffer(&mut self) -> SorterResult<()> {
        self.buffer
            .par_sort_unstable_by(|a, b| self.comparator.compare(&a.0, &b.0));
        let run = RunFile::write(&self.config.spill_dir, self.config.width, &self.buffer)?;
        self.runs.push(run);
        self.allocator.release(self.buffer_bytes);
        self.buffer.clear();
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Transition to the read phase: perform a k-way merge across every
    /// spilled run plus whatever remains in the in-memory buffer, and
    /// return a lazy iterator over fixed-size sorted blocks. The sorter is
    /// consumed by this call (spec §4.3: single-use).
    pub fn get_sorted_blocks(mut self) -> SorterResult<SortedBlocks<C>> {
        self.buffer
            .par_sort_unstable_by(|a, b| self.comparator.compare(&a.0, &b.0));
        self.finished = true;

        let sources: Vec<RunSource> = self
            .runs
            .drain(..)
            .map(RunSource::File)
            .chain(if self.buffer.is_empty() {
                None
            } else {
                Some(RunSource::Memory(std::mem::take(&mut self.buffer), 0))
            })
            .collect();

        let width = self.config.width;
        Ok(SortedBlocks::new(
            sources,
            width,
            self.config.block_size,
            std::sync::Arc::new(self.comparator),
            self.allocator,
        ))
    }
}

/// One exhausted-or-not input to the k-way merge: either a spilled run file
/// (read lazily, block by block) or the tail of the in-memory buffer.
enum RunSource {
    File(RunFile),
    Memory(Vec<Row>, usize),
}

impl RunSource {
    fn peek_and_advance(&mut self) -> SorterResult<Option<Vec<Id>>> {
        match self {
            RunSource::File(f) => f.next_row(),
            RunSource::Memory(rows, pos) => {
                if *pos >= rows.len() {
                    Ok(None)
                } else {
                    let row = rows[*pos].0.clone();
                    *pos += 1;
                    Ok(Some(row))
                }
            }
        }
    }
}

/// One slot of the merge heap: a source index plus its current head row.
struct HeapEntry {
    row: Vec<Id>,
    source: usize,
}

/// Pairs a [`HeapEntry`] with the shared comparator so `BinaryHeap` (which
/// only knows `Ord`) can still order by the caller's key-order. Ordering is
/// reversed so the max-heap pops the smallest row first.
struct HeapEntryWrapper<C: RowComparator> {
    entry: HeapEntry,
    comparator: std::sync::Arc<C>,
}

impl<C: RowComparator> PartialEq for HeapEntryWrapper<C> {
    fn eq(&self, other: &Self) -> bool {
        self.comparator.compare(&self.entry.row, &other.entry.row) == Ordering::Equal
    }
}
impl<C: RowComparator> Eq for HeapEntryWrapper<C> {}
impl<C: RowComparator> PartialOrd for HeapEntryWrapper<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<C: RowComparator> Ord for HeapEntryWrapper<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator.compare(&other.entry.row, &self.entry.row)
    }
}

/// Lazy, block-sized sequence of sorted rows produced by
/// [`ExternalSorter::get_sorted_blocks`]. Spilled run files are read lazily
/// and dropped as their sources are exhausted.
pub struct SortedBlocks<C: RowComparator> {
    sources: Vec<Option<RunSource>>,
    heads: BinaryHeap<HeapEntryWrapper<C>>,
    width: usize,
    block_size: usize,
    comparator: std::sync::Arc<C>,
    allocator: QueryAllocator,
    done: bool,
}

impl<C: RowComparator> SortedBlocks<C> {
    fn new(
        sources: Vec<RunSource>,
        width: usize,
        block_size: usize,
        comparator: std::sync::Arc<C>,
        allocator: QueryAllocator,
    ) -> SortedBlocks<C> {
        let mut blocks = SortedBlocks {
            sources: sources.into_iter().map(Some).collect(),
            heads: BinaryHeap::new(),
            width,
            block_size,
            comparator,
            allocator,
            done: false,
        };
        for i in 0..blocks.sources.len() {
            blocks.advance_source(i);
        }
        blocks
    }

    fn advance_source(&mut self, index: usize) {
        let finished = if let Some(source) = self.sources[index].as_mut() {
            match source.peek_and_advance() {
                Ok(Some(row)) => {
                    self.heads.push(HeapEntryWrapper {
                        entry: HeapEntry { row, source: index },
                        comparator: self.comparator.clone(),
                    });
                    false
                }
                Ok(None) | Err(_) => true,
            }
        } else {
            true
        };
        if finished {
            self.sources[index] = None;
        }
    }

    /// Pull the next sorted block, or `None` when every source is
    /// exhausted. Blocks are `block_size`-aligned except possibly the last.
    pub fn next_block(&mut self) -> SorterResult<Option<Vec<Vec<Id>>>> {
        if self.done {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(self.block_size);
        while out.len() < self.block_size {
            let Some(top) = self.heads.pop() else {
                break;
            };
            let HeapEntry { row, source } = top.entry;
            out.push(row);
            self.advance_source(source);
        }
        if out.is_empty() {
            self.done = true;
            return Ok(None);
        }
        let released = (out.len() * self.width * std::mem::size_of::<Id>()) as u64;
        self.allocator.release(released.min(self.allocator.outstanding_bytes().max(0) as u64));
        Ok(Some(out))
    }

    /// Drain every remaining block eagerly, for callers (like tests) that
    /// don't need streaming.
    pub fn collect_all(mut self) -> SorterResult<Vec<Vec<Id>>> {
        let mut all = Vec::new();
        while let Some(block) = self.next_block()? {
            all.extend(block);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccountant;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn make_sorter(budget: u64) -> (ExternalSorter<KeyOrder>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let accountant = MemoryAccountant::new(1_000_000_000);
        let allocator = accountant.query_allocator();
        let config = SorterConfig {
            width: 4,
            block_size: 8,
            spill_dir: dir.path().to_path_buf(),
        };
        (
            ExternalSorter::new(config, KeyOrder::spo(), allocator, budget),
            dir,
        )
    }

    fn row(a: i64, b: i64, c: i64, d: i64) -> Vec<Id> {
        vec![Id::from_int(a), Id::from_int(b), Id::from_int(c), Id::from_int(d)]
    }

    #[test]
    fn sorts_small_in_memory_input() {
        let (mut sorter, _dir) = make_sorter(1_000_000);
        sorter.push(&row(3, 0, 0, 0)).unwrap();
        sorter.push(&row(1, 0, 0, 0)).unwrap();
        sorter.push(&row(2, 0, 0, 0)).unwrap();
        let rows = sorter.get_sorted_blocks().unwrap().collect_all().unwrap();
        let firsts: Vec<i64> = rows.iter().map(|r| r[0].as_int_unchecked()).collect();
        assert_eq!(firsts, vec![1, 2, 3]);
    }

    #[test]
    fn forces_spills_under_tiny_budget_and_still_sorts() {
        // A budget that fits only a couple of rows forces multiple runs.
        let row_bytes = 4 * std::mem::size_of::<Id>() as u64;
        let (mut sorter, _dir) = make_sorter(row_bytes * 2);
        let mut expected = Vec::new();
        for i in (0..50).rev() {
            sorter.push(&row(i, 0, 0, 0)).unwrap();
            expected.push(i);
        }
        expected.sort_unstable();
        let rows = sorter.get_sorted_blocks().unwrap().collect_all().unwrap();
        let firsts: Vec<i64> = rows.iter().map(|r| r[0].as_int_unchecked()).collect();
        assert_eq!(firsts, expected);
    }

    #[test]
    fn graph_column_keeps_duplicate_triples_across_graphs_distinct() {
        let (mut sorter, _dir) = make_sorter(1_000_000);
        sorter.push(&row(1, 2, 3, 10)).unwrap();
        sorter.push(&row(1, 2, 3, 20)).unwrap();
        let rows = sorter.get_sorted_blocks().unwrap().collect_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0][3], rows[1][3]);
    }

    #[test]
    fn memory_is_fully_released_after_sort() {
        let dir = tempdir().unwrap();
        let accountant = MemoryAccountant::new(1_000_000);
        let allocator = accountant.query_allocator();
        let config = SorterConfig {
            width: 4,
            block_size: 4,
            spill_dir: dir.path().to_path_buf(),
        };
        let mut sorter = ExternalSorter::new(config, KeyOrder::spo(), allocator.clone(), 200);
        for i in 0..20 {
            sorter.push(&row(i, 0, 0, 0)).unwrap();
        }
        let blocks = sorter.get_sorted_blocks().unwrap();
        let _ = blocks.collect_all().unwrap();
        assert_eq!(allocator.outstanding_bytes(), 0);
    }

    proptest! {
        #[test]
        fn k_way_merge_output_is_monotonic(mut values in proptest::collection::vec(-1000i64..1000, 1..200)) {
            let dir = tempdir().unwrap();
            let accountant = MemoryAccountant::new(1_000_000_000);
            let allocator = accountant.query_allocator();
            let config = SorterConfig {
                width: 1,
                block_size: 16,
                spill_dir: dir.path().to_path_buf(),
            };
            let mut sorter = ExternalSorter::new(config, KeyOrder::new(vec![0]), allocator, 256);
            for v in &values {
                sorter.push(&[Id::from_int(*v)]).unwrap();
            }
            let rows = sorter.get_sorted_blocks().unwrap().collect_all().unwrap();
            let sorted: Vec<i64> = rows.iter().map(|r| r[0].as_int_unchecked()).collect();
            values.sort_unstable();
            prop_assert_eq!(sorted, values);
        }
    }
}
