//! Aggregate accumulators (spec §4.4: "Each aggregate is parameterized by
//! (value-getter, accumulator operation, final operation, tag string)").
//!
//! Grounded on the closed-enum shape of the teacher's
//! `ir::AggregateFunction` (`src/ir/mod.rs`), narrowed from that file's
//! vector-search aggregates (`TopK`, `WithinRadius`, ...) down to the
//! numeric/string aggregates this evaluator actually needs.

use crate::error::{EngineError, EngineResult};
use crate::memory::QueryAllocator;
use crate::value::vocabulary::LocalVocab;
use crate::value::{numeric_value_getter, Id, NumericValue};
use std::collections::HashSet;

/// Estimated per-entry overhead of the `DISTINCT` hash set, charged against
/// the query allocator so a high-cardinality `DISTINCT` aggregate can't
/// silently blow past the memory budget (spec §4.4 "a memory-limited hash
/// set").
const DISTINCT_ENTRY_BYTES: u64 = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupConcat { separator: String },
}

impl AggregateKind {
    /// The tag string spec §4.4 asks every aggregate to carry, used in
    /// `cacheKey` output.
    pub fn tag(&self) -> &str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::GroupConcat { .. } => "GROUP_CONCAT",
        }
    }
}

/// Evaluate `kind` over `values`, optionally pre-filtering duplicates.
/// `COUNT` ignores undefined inputs entirely (spec §4.4); the other
/// aggregates skip inputs their value-getter can't coerce (non-numeric for
/// SUM/AVG/MIN/MAX).
pub fn evaluate_aggregate(
    kind: &AggregateKind,
    values: impl Iterator<Item = Id>,
    distinct: bool,
    local_vocab: &LocalVocab,
    allocator: &QueryAllocator,
) -> EngineResult<Id> {
    if distinct {
        let mut seen: HashSet<u64> = HashSet::new();
        let mut reserved = 0u64;
        let result = (|| -> EngineResult<Id> {
            let mut filtered = Vec::new();
            for id in values {
                if seen.insert(id.to_bits()) {
                    allocator.reserve(DISTINCT_ENTRY_BYTES)?;
                    reserved += DISTINCT_ENTRY_BYTES;
                    filtered.push(id);
                }
            }
            fold(kind, filtered.into_iter(), local_vocab)
        })();
        allocator.release(reserved);
        result
    } else {
        fold(kind, values, local_vocab)
    }
}

fn fold(kind: &AggregateKind, values: impl Iterator<Item = Id>, local_vocab: &LocalVocab) -> EngineResult<Id> {
    match kind {
        AggregateKind::Count => {
            let count = values.filter(|id| id.datatype() != crate::value::Datatype::Undefined).count();
            Ok(Id::from_int(count as i64))
        }
        AggregateKind::Sum => Ok(fold_numeric(values, 0.0, |acc, n| acc + n, |acc, any_double| {
            to_numeric_id(acc, any_double)
        })),
        AggregateKind::Avg => {
            let mut total = 0.0;
            let mut count = 0u64;
            for id in values {
                if let NumericValue::Int(_) | NumericValue::Double(_) = numeric_value_getter(id) {
                    total += numeric_value_getter(id).as_f64().expect("numeric value always convertible to f64");
                    count += 1;
                }
            }
            if count == 0 {
                Ok(Id::from_double(0.0))
            } else {
                Ok(Id::from_double(total / count as f64))
            }
        }
        AggregateKind::Min => fold_extreme(values, std::cmp::Ordering::Greater),
        AggregateKind::Max => fold_extreme(values, std::cmp::Ordering::Less),
        AggregateKind::GroupConcat { separator } => {
            let mut parts: Vec<String> = Vec::new();
            for id in values {
                parts.push(string_value_getter(id, local_vocab));
            }
            let joined = parts.join(separator);
            let local_index = local_vocab.push(joined);
            Ok(Id::from_local_vocab_index(local_index))
        }
    }
}

fn fold_numeric(
    values: impl Iterator<Item = Id>,
    init: f64,
    step: impl Fn(f64, f64) -> f64,
    finish: impl Fn(f64, bool) -> Id,
) -> Id {
    let mut acc = init;
    let mut any_double = false;
    for id in values {
        match numeric_value_getter(id) {
            NumericValue::Int(i) => acc = step(acc, i as f64),
            NumericValue::Double(d) => {
                any_double = true;
                acc = step(acc, d);
            }
            NumericValue::NotNumeric => {}
        }
    }
    finish(acc, any_double)
}

fn to_numeric_id(acc: f64, any_double: bool) -> Id {
    if any_double {
        Id::from_double(acc)
    } else {
        Id::from_int(acc as i64)
    }
}

/// `MIN`/`MAX` over numeric values; `direction` is the `Ordering` that means
/// "candidate should replace the running extreme" (`Greater` for MIN,
/// `Less` for MAX).
fn fold_extreme(values: impl Iterator<Item = Id>, direction: std::cmp::Ordering) -> EngineResult<Id> {
    let mut best: Option<Id> = None;
    for id in values {
        if numeric_value_getter(id).is_numeric() {
            best = match best {
                None => Some(id),
                Some(current) => {
                    let cmp = crate::value::compare_numeric(numeric_value_getter(current), numeric_value_getter(id))
                        .ok_or_else(|| EngineError::Internal("non-numeric value survived the numeric filter".to_string()))?;
                    if cmp == direction {
                        Some(id)
                    } else {
                        Some(current)
                    }
                }
            };
        }
    }
    Ok(best.unwrap_or_else(Id::undefined))
}

/// String value-getter: resolves vocabulary-backed ids to their string
/// content; numeric/bool ids use their canonical lexical form; anything
/// else (undefined) yields the empty string.
pub fn string_value_getter(id: Id, local_vocab: &LocalVocab) -> String {
    use crate::value::Datatype;
    match id.datatype() {
        Datatype::LocalVocabIndex => local_vocab.get(id.as_local_vocab_index_unchecked()),
        Datatype::Int => id.as_int_unchecked().to_string(),
        Datatype::Double => id.as_double_unchecked().to_string(),
        Datatype::Bool => id.as_bool_unchecked().to_string(),
        Datatype::Date => id.as_date_unchecked().to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccountant;

    fn allocator() -> QueryAllocator {
        MemoryAccountant::new(1 << 20).query_allocator()
    }

    #[test]
    fn count_ignores_undefined() {
        let values = vec![Id::from_int(1), Id::undefined(), Id::from_int(2)];
        let result = evaluate_aggregate(&AggregateKind::Count, values.into_iter(), false, &LocalVocab::new(), &allocator()).unwrap();
        assert_eq!(result.as_int_unchecked(), 2);
    }

    #[test]
    fn sum_over_ints_stays_int() {
        let values = vec![Id::from_int(1), Id::from_int(2), Id::from_int(3)];
        let result = evaluate_aggregate(&AggregateKind::Sum, values.into_iter(), false, &LocalVocab::new(), &allocator()).unwrap();
        assert_eq!(result.datatype(), crate::value::Datatype::Int);
        assert_eq!(result.as_int_unchecked(), 6);
    }

    #[test]
    fn sum_with_any_double_input_promotes_to_double() {
        let values = vec![Id::from_int(1), Id::from_double(2.5)];
        let result = evaluate_aggregate(&AggregateKind::Sum, values.into_iter(), false, &LocalVocab::new(), &allocator()).unwrap();
        assert_eq!(result.datatype(), crate::value::Datatype::Double);
        assert!((result.as_double_unchecked() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn distinct_sum_counts_each_value_once() {
        let values = vec![Id::from_int(5), Id::from_int(5), Id::from_int(7)];
        let result = evaluate_aggregate(&AggregateKind::Sum, values.into_iter(), true, &LocalVocab::new(), &allocator()).unwrap();
        assert_eq!(result.as_int_unchecked(), 12);
    }

    #[test]
    fn min_and_max_pick_correct_extremes() {
        let values = || vec![Id::from_int(3), Id::from_int(-1), Id::from_int(7)].into_iter();
        let min = evaluate_aggregate(&AggregateKind::Min, values(), false, &LocalVocab::new(), &allocator()).unwrap();
        let max = evaluate_aggregate(&AggregateKind::Max, values(), false, &LocalVocab::new(), &allocator()).unwrap();
        assert_eq!(min.as_int_unchecked(), -1);
        assert_eq!(max.as_int_unchecked(), 7);
    }

    #[test]
    fn group_concat_joins_with_separator_into_local_vocab() {
        let local = LocalVocab::new();
        let a = Id::from_local_vocab_index(local.push("foo".to_string()));
        let b = Id::from_local_vocab_index(local.push("bar".to_string()));
        let result = evaluate_aggregate(
            &AggregateKind::GroupConcat { separator: ";".to_string() },
            vec![a, b].into_iter(),
            false,
            &local,
            &allocator(),
        )
        .unwrap();
        assert_eq!(local.get(result.as_local_vocab_index_unchecked()), "foo;bar");
    }

    #[test]
    fn distinct_aggregate_releases_all_reserved_memory() {
        let accountant = MemoryAccountant::new(1 << 20);
        let allocator = accountant.query_allocator();
        let values = vec![Id::from_int(1), Id::from_int(1), Id::from_int(2)];
        evaluate_aggregate(&AggregateKind::Count, values.into_iter(), true, &LocalVocab::new(), &allocator).unwrap();
        assert_eq!(allocator.outstanding_bytes(), 0);
    }
}
