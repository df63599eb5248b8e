//! Fixed-width rows of [`Id`]s and the columnar-access [`IdTable`] built on
//! top of them.
//!
//! spec §9 flags the teacher language's heavy template metaprogramming for
//! "static width" tables as needing re-architecture: the actual requirement
//! is vectorized inner loops for a handful of common column counts. We keep
//! exactly two row representations — [`StaticRow`] for widths up to
//! [`MAX_STATIC_WIDTH`], and [`DynRow`] for the general case — reached
//! through [`Row`], a small enum dispatcher. The dispatch lives here and
//! nowhere else.

use crate::value::Id;
use std::fmt;

/// Widths up to this constant get the inline, allocation-free
/// representation. The canonical triple width (4: subject, predicate,
/// object, graph) and a handful of extra payload columns for materialized
/// views both fit comfortably.
pub const MAX_STATIC_WIDTH: usize = 5;

/// A row whose width is known and small. Stored inline (no heap
/// allocation), which matters for the sorter and permutation scan inner
/// loops that process millions of rows.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticRow {
    len: u8,
    cols: [Id; MAX_STATIC_WIDTH],
}

impl StaticRow {
    pub fn new(cols: &[Id]) -> StaticRow {
        assert!(
            cols.len() <= MAX_STATIC_WIDTH,
            "StaticRow can hold at most {MAX_STATIC_WIDTH} columns, got {}",
            cols.len()
        );
        let mut buf = [Id::undefined(); MAX_STATIC_WIDTH];
        buf[..cols.len()].copy_from_slice(cols);
        StaticRow {
            len: cols.len() as u8,
            cols: buf,
        }
    }

    pub fn as_slice(&self) -> &[Id] {
        &self.cols[..self.len as usize]
    }

    pub fn width(&self) -> usize {
        self.len as usize
    }
}

impl fmt::Debug for StaticRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice().iter()).finish()
    }
}

/// A row of arbitrary width, heap-allocated. Used for materialized views
/// with many payload columns and anywhere width isn't known until runtime
/// planning.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DynRow {
    cols: Vec<Id>,
}

impl DynRow {
    pub fn new(cols: Vec<Id>) -> DynRow {
        DynRow { cols }
    }

    pub fn as_slice(&self) -> &[Id] {
        &self.cols
    }

    pub fn width(&self) -> usize {
        self.cols.len()
    }
}

/// The single dispatch point between the two row representations. Every
/// call site that needs to branch on "is this row static or dynamic" goes
/// through this enum rather than re-deciding the threshold itself.
#[derive(Clone, Debug)]
pub enum Row {
    Static(StaticRow),
    Dyn(DynRow),
}

impl Row {
    pub fn from_cols(cols: &[Id]) -> Row {
        if cols.len() <= MAX_STATIC_WIDTH {
            Row::Static(StaticRow::new(cols))
        } else {
            Row::Dyn(DynRow::new(cols.to_vec()))
        }
    }

    pub fn as_slice(&self) -> &[Id] {
        match self {
            Row::Static(r) => r.as_slice(),
            Row::Dyn(r) => r.as_slice(),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Row::Static(r) => r.width(),
            Row::Dyn(r) => r.width(),
        }
    }

    pub fn get(&self, col: usize) -> Option<Id> {
        self.as_slice().get(col).copied()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Row {}

impl fmt::Debug for DynRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.cols.iter()).finish()
    }
}

/// Column-oriented in-memory result table: the rows, the [`crate::value::LocalVocab`]
/// they reference, and the set of columns the rows are known to be sorted
/// on (spec §3 "Result table" data model entry).
#[derive(Debug, Clone)]
pub struct IdTable {
    width: usize,
    /// Column-major storage at a constant stride of `capacity_rows`:
    /// `data[c * capacity_rows + r]` is row `r`, column `c`. The stride only
    /// changes in [`IdTable::grow_to`], which re-lays-out every column, so
    /// it stays valid between geometric growths.
    data: Vec<Id>,
    capacity_rows: usize,
    num_rows: usize,
    local_vocab: crate::value::LocalVocab,
    sorted_columns: Vec<usize>,
}

impl IdTable {
    pub fn new(width: usize, local_vocab: crate::value::LocalVocab) -> IdTable {
        IdTable {
            width,
            data: Vec::new(),
            capacity_rows: 0,
            num_rows: 0,
            local_vocab,
            sorted_columns: Vec::new(),
        }
    }

    pub fn from_rows(width: usize, rows: &[Row], local_vocab: crate::value::LocalVocab) -> IdTable {
        let mut table = IdTable::new(width, local_vocab);
        for row in rows {
            table.push_row(row.as_slice());
        }
        table
    }

    pub fn push_row(&mut self, cols: &[Id]) {
        assert_eq!(cols.len(), self.width, "row width mismatch");
        if self.width > 0 && self.num_rows == self.capacity_rows {
            let new_capacity = if self.capacity_rows == 0 { 4 } else { self.capacity_rows * 2 };
            self.grow_to(new_capacity);
        }
        for (c, &value) in cols.iter().enumerate() {
            self.data[c * self.capacity_rows + self.num_rows] = value;
        }
        self.num_rows += 1;
    }

    /// Re-lay-out every column at a new, larger stride, preserving the
    /// existing cells. The only place `capacity_rows` (and therefore the
    /// column stride) is allowed to change.
    fn grow_to(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity >= self.num_rows);
        let mut new_data = vec![Id::undefined(); self.width * new_capacity];
        for c in 0..self.width {
            let old_start = c * self.capacity_rows;
            let new_start = c * new_capacity;
            new_data[new_start..new_start + self.num_rows]
                .copy_from_slice(&self.data[old_start..old_start + self.num_rows]);
        }
        self.data = new_data;
        self.capacity_rows = new_capacity;
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Read column `col`, row `row`.
    pub fn get(&self, row: usize, col: usize) -> Id {
        debug_assert!(row < self.num_rows && col < self.width);
        self.data[col * self.capacity_rows + row]
    }

    /// A whole column as a contiguous slice, for vectorized value-getter
    /// loops in the expression evaluator.
    pub fn column(&self, col: usize) -> &[Id] {
        let start = col * self.capacity_rows;
        &self.data[start..start + self.num_rows]
    }

    pub fn local_vocab(&self) -> &crate::value::LocalVocab {
        &self.local_vocab
    }

    pub fn sorted_columns(&self) -> &[usize] {
        &self.sorted_columns
    }

    pub fn set_sorted_columns(&mut self, cols: Vec<usize>) {
        self.sorted_columns = cols;
    }

    /// Debug-mode assertion that rows are actually non-decreasing on the
    /// claimed sorted columns (spec §5: "guarded by a debug-mode assertion
    /// on the sorted-columns attribute of every result").
    #[cfg(debug_assertions)]
    pub fn assert_sorted_columns_are_consistent(&self) {
        if self.sorted_columns.is_empty() || self.num_rows < 2 {
            return;
        }
        for r in 1..self.num_rows {
            for &c in &self.sorted_columns {
                let prev = self.get(r - 1, c);
                let cur = self.get(r, c);
                assert!(
                    prev.compare_without_local_vocab(&cur) != std::cmp::Ordering::Greater,
                    "IdTable claims column {c} is sorted but row {} > row {}",
                    r - 1,
                    r
                );
            }
        }
    }

    pub fn row(&self, index: usize) -> Row {
        let cols: Vec<Id> = (0..self.width).map(|c| self.get(index, c)).collect();
        Row::from_cols(&cols)
    }

    /// Approximate resident byte size, used to charge the query allocator.
    pub fn byte_size(&self) -> u64 {
        (self.data.capacity() * std::mem::size_of::<Id>()) as u64
    }
}
