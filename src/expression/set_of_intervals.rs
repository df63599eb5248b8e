//! Sorted, disjoint half-open row-index ranges encoding a boolean mask over
//! a sorted input (spec §4.4's "set-of-intervals fast path").
//!
//! Grounded on `examples/original_source/src/parser/SetOfIntervals.h`
//! almost directly: the struct is a `Vec<(usize, usize)>` with the same
//! sorted-disjoint-nonempty invariant, and [`intersect`]/[`union`] walk both
//! inputs the same two-pointer way the original's `Intersection`/`Union`
//! function objects do.

/// A sorted, pairwise-disjoint collection of nonempty `[begin, end)` row
/// ranges, representing "the rows for which some boolean expression is
/// true" without materializing one bool per row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetOfIntervals {
    intervals: Vec<(usize, usize)>,
}

impl SetOfIntervals {
    pub fn empty() -> SetOfIntervals {
        SetOfIntervals { intervals: Vec::new() }
    }

    /// Validates that `intervals` is sorted, pairwise disjoint, and every
    /// interval is nonempty (`begin < end`). Panics otherwise — a caller
    /// producing interval sets must already guarantee this invariant.
    pub fn from_sorted_disjoint(intervals: Vec<(usize, usize)>) -> SetOfIntervals {
        let mut prev_end = 0usize;
        for (i, &(begin, end)) in intervals.iter().enumerate() {
            assert!(begin < end, "interval {i} is empty: [{begin}, {end})");
            assert!(
                i == 0 || begin >= prev_end,
                "interval {i} = [{begin}, {end}) overlaps or precedes the previous interval ending at {prev_end}"
            );
            prev_end = end;
        }
        SetOfIntervals { intervals }
    }

    pub fn intervals(&self) -> &[(usize, usize)] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn contains(&self, row: usize) -> bool {
        match self.intervals.partition_point(|&(_, end)| end <= row) {
            i if i < self.intervals.len() => self.intervals[i].0 <= row,
            _ => false,
        }
    }

    /// Expand to one bool per row in `[0, target_size)`.
    pub fn to_bit_vector(&self, target_size: usize) -> Vec<bool> {
        let mut out = vec![false; target_size];
        for &(begin, end) in &self.intervals {
            assert!(end <= target_size, "interval end {end} exceeds target size {target_size}");
            out[begin..end].fill(true);
        }
        out
    }
}

/// `A && B`: two-pointer walk, emitting the overlap of the current interval
/// pair and advancing whichever side ends first.
pub fn intersect(a: &SetOfIntervals, b: &SetOfIntervals) -> SetOfIntervals {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.intervals.len() && j < b.intervals.len() {
        let (a_begin, a_end) = a.intervals[i];
        let (b_begin, b_end) = b.intervals[j];
        let begin = a_begin.max(b_begin);
        let end = a_end.min(b_end);
        if begin < end {
            result.push((begin, end));
        }
        if a_end <= b_end {
            i += 1;
        } else {
            j += 1;
        }
    }
    SetOfIntervals { intervals: result }
}

/// `A || B`: merge both interval lists and coalesce adjacent/overlapping
/// runs into single intervals.
pub fn union(a: &SetOfIntervals, b: &SetOfIntervals) -> SetOfIntervals {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(a.intervals.len() + b.intervals.len());
    merged.extend_from_slice(&a.intervals);
    merged.extend_from_slice(&b.intervals);
    merged.sort_unstable_by_key(|&(begin, _)| begin);

    let mut result: Vec<(usize, usize)> = Vec::with_capacity(merged.len());
    for (begin, end) in merged {
        match result.last_mut() {
            Some((_, last_end)) if begin <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => result.push((begin, end)),
        }
    }
    SetOfIntervals { intervals: result }
}

/// `!A` over `[0, total_rows)`: the gaps between `A`'s intervals.
pub fn negate(a: &SetOfIntervals, total_rows: usize) -> SetOfIntervals {
    let mut result = Vec::new();
    let mut prev_end = 0usize;
    for &(begin, end) in &a.intervals {
        if prev_end < begin {
            result.push((prev_end, begin));
        }
        prev_end = end;
    }
    if prev_end < total_rows {
        result.push((prev_end, total_rows));
    }
    SetOfIntervals { intervals: result }
}
