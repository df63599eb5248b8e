//! String <-> id dictionary.
//!
//! [`Vocabulary`] is the read-only, engine-wide string dictionary built once
//! during indexing (spec §4.1). [`LocalVocab`] is its per-query counterpart:
//! strings created during evaluation (e.g. the output of `GROUP_CONCAT` or a
//! `BIND` expression) that never need to survive past the query that
//! created them.

use std::collections::HashMap;
use std::sync::Arc;

/// Index into [`Vocabulary`]. Ordering is stable and compatible with
/// [`crate::value::Id::compare_without_local_vocab`] by construction: the
/// vocabulary is built by inserting strings in sorted order, so index order
/// already matches string order (spec §4.1: "stable ordering compatible
/// with `Id::compareWithoutLocalVocab`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VocabIndex(pub(crate) u64);

impl VocabIndex {
    pub fn new(index: u64) -> VocabIndex {
        VocabIndex(index)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Read-only string dictionary. Built once at index time (the index builder
/// inserts already-sorted strings via [`Vocabulary::from_sorted_strings`]);
/// queries only call [`Vocabulary::get_id`] / [`Vocabulary::index_to_string`].
#[derive(Debug, Default)]
pub struct Vocabulary {
    strings: Vec<Arc<str>>,
    index: HashMap<Arc<str>, VocabIndex>,
}

impl Vocabulary {
    /// Build a vocabulary from strings already in their final sort order
    /// (the index builder is responsible for sorting; this type does not
    /// sort on the caller's behalf so that rebuilding an existing index's
    /// vocabulary is a pure append, not a resort).
    pub fn from_sorted_strings(strings: Vec<String>) -> Vocabulary {
        let mut vocab = Vocabulary {
            strings: Vec::with_capacity(strings.len()),
            index: HashMap::with_capacity(strings.len()),
        };
        for (i, s) in strings.into_iter().enumerate() {
            let arc: Arc<str> = Arc::from(s.into_boxed_str());
            vocab.index.insert(Arc::clone(&arc), VocabIndex(i as u64));
            vocab.strings.push(arc);
        }
        vocab
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// `stringToId` from spec §4.1, minus the `Id` wrapping (callers that
    /// need an `Id` call `Id::from_vocab_index` themselves, since not every
    /// caller wants the datatype tag attached at this layer).
    pub fn get_id(&self, s: &str) -> Option<VocabIndex> {
        self.index.get(s).copied()
    }

    /// `idToString` from spec §4.1.
    pub fn index_to_string(&self, index: VocabIndex) -> Option<&str> {
        self.strings.get(index.0 as usize).map(|s| s.as_ref())
    }

    /// The vocabulary's strings in their stored (sort) order, for
    /// persistence (spec §6: `<B>.vocabulary.internal`/`.external`). Plain
    /// `Vec<String>` rather than `Arc<str>` so the on-disk format doesn't
    /// depend on this type's in-memory representation.
    pub fn sorted_strings(&self) -> Vec<String> {
        self.strings.iter().map(|s| s.to_string()).collect()
    }
}

/// Per-query string dictionary for strings that only exist inside one
/// result (e.g. `GROUP_CONCAT` output, `BIND(... AS ?x)` computed strings).
/// Ref-counted so a child operator consuming a cached parent's result
/// shares the same `LocalVocab` instead of copying it (spec §3 lifecycle:
/// "shared (ref-counted) when that result is consumed by a parent
/// operator").
#[derive(Debug, Clone, Default)]
pub struct LocalVocab {
    inner: Arc<LocalVocabInner>,
}

#[derive(Debug, Default)]
struct LocalVocabInner {
    strings: parking_lot::RwLock<Vec<String>>,
}

impl LocalVocab {
    pub fn new() -> LocalVocab {
        LocalVocab::default()
    }

    /// Append a string, returning the local-vocab index to be wrapped in an
    /// `Id::from_local_vocab_index`.
    pub fn push(&self, s: String) -> u64 {
        let mut strings = self.inner.strings.write();
        let idx = strings.len() as u64;
        strings.push(s);
        idx
    }

    pub fn get(&self, index: u64) -> String {
        self.inner
            .strings
            .read()
            .get(index as usize)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.strings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge `other`'s strings into `self`, returning the index offset that
    /// must be added to any `LocalVocabIndex` that originated in `other`.
    /// Used when combining two operators' results (e.g. a join) that each
    /// carry their own local vocab.
    pub fn merge(&self, other: &LocalVocab) -> u64 {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return 0;
        }
        let mut strings = self.inner.strings.write();
        let offset = strings.len() as u64;
        strings.extend(other.inner.strings.read().iter().cloned());
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_round_trips_strings() {
        let vocab = Vocabulary::from_sorted_strings(vec![
            "<http://a>".to_string(),
            "<http://b>".to_string(),
            "\"literal\"".to_string(),
        ]);
        let id = vocab.get_id("<http://b>").unwrap();
        assert_eq!(vocab.index_to_string(id), Some("<http://b>"));
        assert!(vocab.get_id("<http://missing>").is_none());
    }

    #[test]
    fn vocabulary_index_order_matches_insertion_order() {
        let vocab = Vocabulary::from_sorted_strings(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ]);
        let ia = vocab.get_id("a").unwrap();
        let ib = vocab.get_id("b").unwrap();
        let ic = vocab.get_id("c").unwrap();
        assert!(ia < ib);
        assert!(ib < ic);
    }

    #[test]
    fn local_vocab_push_and_get() {
        let local = LocalVocab::new();
        let i0 = local.push("hello".to_string());
        let i1 = local.push("world".to_string());
        assert_eq!(local.get(i0), "hello");
        assert_eq!(local.get(i1), "world");
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn local_vocab_merge_offsets_indices() {
        let a = LocalVocab::new();
        a.push("a0".to_string());
        let b = LocalVocab::new();
        b.push("b0".to_string());
        b.push("b1".to_string());

        let offset = a.merge(&b);
        assert_eq!(offset, 1);
        assert_eq!(a.get(offset), "b0");
        assert_eq!(a.get(offset + 1), "b1");
    }

    #[test]
    fn local_vocab_shared_clone_sees_same_strings() {
        let a = LocalVocab::new();
        let b = a.clone();
        a.push("shared".to_string());
        assert_eq!(b.get(0), "shared");
    }
}
