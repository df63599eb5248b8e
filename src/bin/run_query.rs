//! Example runner (spec §6): "single positional argument is the input
//! triples file." Builds an ephemeral index from the given N-Triples file
//! in a temporary directory, wires up an [`sparql_core::ExecutionContext`]
//! over it, and runs one demonstration scan — there is no SPARQL parser or
//! planner in this crate (spec §1), so this is a thin example of the
//! library surface rather than a query tool.

use clap::Parser;
use sparql_core::cache::{CacheConfig, NamedResultCache, QueryResultCache};
use sparql_core::error::{EngineError, EngineResult};
use sparql_core::ingest;
use sparql_core::memory::MemoryAccountant;
use sparql_core::permutation::{PermutationSet, PermutationWriter, PermutationWriterConfig, ScanRange, Snapshot};
use sparql_core::sorter::{ExternalSorter, KeyOrder, SorterConfig};
use sparql_core::value::{Id, Vocabulary};
use sparql_core::{ExecutionContext, Index};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sparql-core", about = "Build an ephemeral index from a triples file and run one demonstration scan")]
struct Args {
    /// Input triples file (N-Triples).
    triples_file: PathBuf,
}

const MEMORY_LIMIT_BYTES: u64 = 1_000_000_000;

/// Outcome of building the ephemeral index: triple/vocabulary counts plus
/// one arbitrary row's subject id, used below to demonstrate a scan.
struct BuildSummary {
    num_triples: usize,
    vocab_size: usize,
    sample_subject: Option<Id>,
}

fn build_ephemeral_index(triples_file: &Path, base: &Path) -> EngineResult<BuildSummary> {
    let triples = ingest::read_terms(triples_file)?;
    let vocabulary = ingest::build_vocabulary(&triples);
    let rows = ingest::triples_to_rows(&triples, &vocabulary);
    let sample_subject = rows.first().map(|row| row[0]);

    let spill_dir = std::env::temp_dir();
    let accountant = MemoryAccountant::new(MEMORY_LIMIT_BYTES);

    for name in sparql_core::permutation::PERMUTATION_NAMES {
        let key_order = KeyOrder::for_permutation(name).expect("name came from PERMUTATION_NAMES");
        let sorter_config = SorterConfig::new(4, spill_dir.clone());
        let mut sorter = ExternalSorter::new(sorter_config, key_order, accountant.query_allocator(), MEMORY_LIMIT_BYTES);
        for row in &rows {
            sorter.push(row)?;
        }
        let mut blocks = sorter.get_sorted_blocks()?;

        let data_path = format!("{}.index.{}", base.display(), name);
        let meta_path = format!("{}.index.{}.meta", base.display(), name);
        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(4))?;
        while let Some(block) = blocks.next_block()? {
            writer.push_rows(&block)?;
        }
        writer.finish(&meta_path)?;
    }

    write_vocabulary_bincode(&format!("{}.vocabulary.internal", base.display()), &vocabulary)?;
    Ok(BuildSummary {
        num_triples: triples.len(),
        vocab_size: vocabulary.len(),
        sample_subject,
    })
}

fn write_vocabulary_bincode(path: &str, vocabulary: &Vocabulary) -> EngineResult<()> {
    let encoded = bincode::serialize(&vocabulary.sorted_strings()).map_err(|e| EngineError::Corruption(e.to_string()))?;
    std::fs::File::create(path)?.write_all(&encoded)?;
    Ok(())
}

fn load_vocabulary(base: &Path) -> EngineResult<Vocabulary> {
    let encoded = std::fs::read(format!("{}.vocabulary.internal", base.display()))?;
    let strings: Vec<String> = bincode::deserialize(&encoded).map_err(|e| EngineError::Corruption(e.to_string()))?;
    Ok(Vocabulary::from_sorted_strings(strings))
}

fn run(args: Args) -> EngineResult<()> {
    let tmp_dir = tempfile::tempdir()?;
    let base = tmp_dir.path().join("example");

    let summary = build_ephemeral_index(&args.triples_file, &base)?;
    println!("parsed {} triples, {} distinct terms", summary.num_triples, summary.vocab_size);

    let permutations = PermutationSet::open(&base, true)?;
    let vocabulary = load_vocabulary(&base)?;
    let index = Arc::new(Index::new(vocabulary, permutations));

    let accountant = MemoryAccountant::new(MEMORY_LIMIT_BYTES);
    let result_cache = Arc::new(QueryResultCache::new(CacheConfig::new(1000, 30_000_000_000, 5_000_000_000)));
    let named_results = Arc::new(NamedResultCache::new());
    ExecutionContext::wire_clear_on_allocation(&accountant, Arc::clone(&result_cache));
    let ctx = ExecutionContext::new(Arc::clone(&index), result_cache, named_results, &accountant, None);

    if let (Some(spo), Some(subject)) = (index.permutations.get("spo"), summary.sample_subject) {
        let range = ScanRange::exact(subject);
        let rows = spo.scan(&range, &ctx.cancellation, &Snapshot)?;
        println!("scan of spo for one sample subject returned {} row(s)", rows.len());
    } else {
        println!("no triples to scan");
    }
    println!("query allocator outstanding bytes: {}", ctx.allocator.outstanding_bytes());

    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
