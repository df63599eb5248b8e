//! # sparql-core
//!
//! The core evaluation engine of a SPARQL query processor over RDF
//! knowledge graphs: a compressed permutation store, an external
//! id-table sorter, a SPARQL expression evaluator, and a materialized
//! view writer/reader, plus the value/vocabulary, memory accounting,
//! result cache, and execution-context layers they share.
//!
//! There is no SPARQL parser or query planner in this crate (see
//! `DESIGN.md`); it is the storage and evaluation substrate such a
//! planner would sit on top of.
//!
//! ## Module map
//!
//! | Module | Role |
//! |--------|------|
//! | [`value`] | Tagged 64-bit ids, the vocabulary, and the query-local vocabulary |
//! | [`row`] | Fixed-width rows and the columnar `IdTable` built on them |
//! | [`memory`] | Process-wide byte budget shared across concurrent queries |
//! | [`sorter`] | Memory-bounded external sort used to build each permutation |
//! | [`permutation`] | The six sort-order permutations and their block-compressed storage |
//! | [`expression`] | SPARQL value coercion, comparisons, and aggregates |
//! | [`cache`] | Query result cache and pinned named results |
//! | [`context`] | The per-query bundle of index/caches/allocator/cancellation |
//! | [`view`] | Materialized view writer and reader |
//! | [`blob`] | Serialized format for distributing a pre-built index |
//! | [`ingest`] | Minimal N-Triples reader shared by the CLI binaries |
//! | [`config`] | Index-build and engine-serving configuration |
//! | [`error`] | Crate-wide error taxonomy |
//! | [`cancellation`] | Cooperative cancellation shared by every long-running operator |

// Value type system: tagged 64-bit ids, vocabulary, local vocab
pub mod value;
pub use value::{Datatype, Id, NumericValue};
pub use value::vocabulary::{LocalVocab, VocabIndex, Vocabulary};

// Fixed-width rows and the columnar IdTable built on them
pub mod row;
pub use row::{DynRow, IdTable, Row, StaticRow};

// Memory accounting (spec §5)
pub mod memory;
pub use memory::{AllocationExceedsLimit, MemoryAccountant, QueryAllocator, ReservationGuard};

// Crate-wide error taxonomy (spec §7)
pub mod error;
pub use error::{CancellationError, ConfigError, EngineError, EngineResult};

// External id-table sorter (spec §4.3)
pub mod sorter;
pub use sorter::{ExternalSorter, KeyOrder, RowComparator, SorterConfig, SorterError, SortedBlocks};

// Cooperative cancellation, shared by every long-running operator
pub mod cancellation;
pub use cancellation::{CancellationHandle, CancellationToken};

// Compressed permutation store (spec §4.2)
pub mod permutation;
pub use permutation::{Permutation, PermutationError, PermutationWriter, ScanRange, Snapshot};

// Result cache & named results (spec §4)
pub mod cache;
pub use cache::{CacheConfig, NamedResultCache, QueryResultCache};

// SPARQL expression evaluator (spec §4.4)
pub mod expression;
pub use expression::{ArithOp, CompareOp, EvaluationContext, ExistsEvaluator, Expression, ExpressionResult};
pub use expression::aggregate::AggregateKind;

// Execution context: the index handle plus caches/allocator/cancellation
// bundle every operator needs (spec §5)
pub mod context;
pub use context::{ExecutionContext, Index};

// Materialized view writer and reader (spec §4.5)
pub mod view;
pub use view::{MaterializedView, MaterializedViewManager, MaterializedViewWriter, ViewQuery};

// Serialized blob format for distributing pre-built indices (spec §6)
pub mod blob;
pub use blob::{deserialize_from_blob, serialize_to_blob, DecodedBlob};

// Minimal N-Triples ingest path shared by the index-builder and blob-builder binaries
pub mod ingest;

// Index-build and engine-serving configuration (spec §6)
pub mod config;
pub use config::{EngineConfig, IndexConfig, ParameterRegistry};
