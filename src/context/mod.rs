//! Execution context (spec §5): the bundle of shared, read-only/shared-
//! ownership state every operator and expression needs to run a single
//! query, plus the deadline/cancellation pair every operator polls.
//!
//! Grounded on `examples/inputlayer-inputlayer/src/execution/mod.rs`'s
//! `ExecutionConfig` aggregation pattern (one struct bundling the
//! resources an execution needs) and `execution/timeout.rs`'s
//! `QueryTimeout`, already generalized into [`crate::cancellation`].

use crate::cache::{NamedResultCache, QueryResultCache};
use crate::cancellation::CancellationToken;
use crate::memory::{MemoryAccountant, QueryAllocator};
use crate::permutation::PermutationSet;
use crate::value::vocabulary::Vocabulary;
use std::sync::Arc;
use std::time::Duration;

/// The immutable, shared-by-const-reference index (spec §5: "immutable
/// during query serving; shared by const-reference"): the vocabularies and
/// the six permutations.
pub struct Index {
    pub vocabulary: Vocabulary,
    pub permutations: PermutationSet,
}

impl Index {
    pub fn new(vocabulary: Vocabulary, permutations: PermutationSet) -> Index {
        Index { vocabulary, permutations }
    }
}

/// Everything one query execution needs: an immutable index handle, the
/// two caches, a per-query allocator, and cancellation/deadline. Created
/// once per query by the server layer (external to this crate) and handed
/// by reference to every operator.
pub struct ExecutionContext {
    pub index: Arc<Index>,
    pub result_cache: Arc<QueryResultCache>,
    pub named_results: Arc<NamedResultCache>,
    pub allocator: QueryAllocator,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        index: Arc<Index>,
        result_cache: Arc<QueryResultCache>,
        named_results: Arc<NamedResultCache>,
        accountant: &MemoryAccountant,
        deadline: Option<Duration>,
    ) -> ExecutionContext {
        ExecutionContext {
            index,
            result_cache,
            named_results,
            allocator: accountant.query_allocator(),
            cancellation: CancellationToken::new(deadline),
        }
    }

    /// Install this context's result cache as the memory accountant's
    /// clear-on-allocation hook (spec §5/§7). Called once at engine
    /// start-up, not per query — the hook closes over an `Arc` clone so it
    /// outlives any single `ExecutionContext`.
    pub fn wire_clear_on_allocation(accountant: &MemoryAccountant, cache: Arc<QueryResultCache>) {
        accountant.set_clear_on_allocation(move || cache.clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use std::path::Path;

    fn empty_index() -> Arc<Index> {
        let vocabulary = Vocabulary::from_sorted_strings(vec![]);
        let permutations = PermutationSet::open(Path::new("/nonexistent-base"), true).unwrap();
        Arc::new(Index::new(vocabulary, permutations))
    }

    #[test]
    fn clear_on_allocation_hook_evicts_the_result_cache() {
        let accountant = MemoryAccountant::new(10);
        let cache = Arc::new(QueryResultCache::new(CacheConfig::new(10, 1_000_000, 1_000_000)));
        ExecutionContext::wire_clear_on_allocation(&accountant, Arc::clone(&cache));

        let mut table = crate::row::IdTable::new(1, crate::value::vocabulary::LocalVocab::new());
        table.push_row(&[crate::value::Id::from_int(1)]);
        cache.insert("k".to_string(), Arc::new(table));
        assert_eq!(cache.len(), 1);

        let allocator = accountant.query_allocator();
        let _ = allocator.reserve(20);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn execution_context_bundles_a_fresh_allocator_per_query() {
        let accountant = MemoryAccountant::new(1024);
        let cache = Arc::new(QueryResultCache::new(CacheConfig::new(10, 1_000_000, 1_000_000)));
        let named = Arc::new(NamedResultCache::new());
        let ctx = ExecutionContext::new(empty_index(), cache, named, &accountant, None);
        assert_eq!(ctx.allocator.outstanding_bytes(), 0);
        assert!(!ctx.cancellation.is_cancelled());
    }
}
