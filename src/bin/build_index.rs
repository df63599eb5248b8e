//! Index-builder CLI (spec §6): `-i <base> -f <file> [-F nt|ttl|nq] [...]`.
//!
//! Reads N-Triples, builds the vocabulary and all six permutations, and
//! writes the `<base>.*` sidecar files. Parsing Turtle/N-Quads is outside
//! this crate's scope (spec §1 excludes the RDF ingest parser); `-F ttl`
//! and `-F nq` are accepted as CLI surface but rejected with a config error
//! pointing the caller at `-F nt`.

use clap::Parser;
use sparql_core::config::{IndexConfig, InputFileFormat, InputFileSpec, VocabularyRepresentation};
use sparql_core::error::{ConfigError, EngineError, EngineResult};
use sparql_core::ingest;
use sparql_core::memory::MemoryAccountant;
use sparql_core::permutation::{PermutationWriter, PermutationWriterConfig};
use sparql_core::sorter::{ExternalSorter, KeyOrder, SorterConfig};
use sparql_core::value::{Id, Vocabulary};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sparql-core-build", about = "Build a permutation index from a triples file")]
struct Args {
    /// Index base name; output files are written as `<base>.*`.
    #[arg(short = 'i', long = "base")]
    base: PathBuf,

    /// Input file path. May be repeated.
    #[arg(short = 'f', long = "file", required = true)]
    files: Vec<PathBuf>,

    /// Input file format: `nt` (supported), `ttl`/`nq` (rejected, see module docs).
    #[arg(short = 'F', long = "format", default_value = "nt")]
    format: String,

    #[arg(long, default_value_t = 4_000_000_000)]
    memory_limit_bytes: u64,

    #[arg(long)]
    keep_temp_files: bool,

    #[arg(long)]
    only_pso_pos: bool,

    #[arg(long)]
    no_patterns: bool,

    #[arg(long = "prefix")]
    prefixes_for_id_encoded_iris: Vec<String>,
}

fn parse_format(s: &str) -> EngineResult<InputFileFormat> {
    match s {
        "nt" => Ok(InputFileFormat::NTriples),
        "ttl" => Ok(InputFileFormat::Turtle),
        "nq" => Ok(InputFileFormat::NQuads),
        other => Err(EngineError::Config(ConfigError::Conflict(format!(
            "unrecognized input format '{other}', expected one of nt|ttl|nq"
        )))),
    }
}

fn build_index_config(args: &Args, format: InputFileFormat) -> IndexConfig {
    IndexConfig {
        base_name: args.base.clone(),
        input_files: args
            .files
            .iter()
            .map(|path| InputFileSpec { path: path.clone(), format })
            .collect(),
        memory_limit_bytes: args.memory_limit_bytes,
        vocabulary_representation: VocabularyRepresentation::OnDiskCompressed,
        prefixes_for_id_encoded_iris: args.prefixes_for_id_encoded_iris.clone(),
        text_index: None,
        keep_temp_files: args.keep_temp_files,
        only_pso_pos: args.only_pso_pos,
        no_patterns: args.no_patterns,
    }
}

fn run(args: Args) -> EngineResult<()> {
    let format = parse_format(&args.format)?;
    if format != InputFileFormat::NTriples {
        return Err(EngineError::Config(ConfigError::Conflict(format!(
            "input format '{}' is not supported by this builder; convert to N-Triples and pass -F nt",
            args.format
        ))));
    }

    let index_config = build_index_config(&args, format);
    index_config.validate()?;

    let mut all_triples = Vec::new();
    for file in &args.files {
        all_triples.extend(ingest::read_terms(file)?);
    }
    tracing::info!(count = all_triples.len(), "parsed triples");

    let vocabulary = ingest::build_vocabulary(&all_triples);
    tracing::info!(size = vocabulary.len(), "built vocabulary");

    let rows = ingest::triples_to_rows(&all_triples, &vocabulary);

    let spill_dir = std::env::temp_dir();
    let accountant = MemoryAccountant::new(args.memory_limit_bytes);

    for name in sparql_core::permutation::PERMUTATION_NAMES {
        let key_order = KeyOrder::for_permutation(name).expect("name came from PERMUTATION_NAMES");
        let sorter_config = SorterConfig::new(4, spill_dir.clone());
        let mut sorter = ExternalSorter::new(sorter_config, key_order, accountant.query_allocator(), args.memory_limit_bytes);
        for row in &rows {
            sorter.push(row)?;
        }
        let mut blocks = sorter.get_sorted_blocks()?;

        let data_path = format!("{}.index.{}", args.base.display(), name);
        let meta_path = format!("{}.index.{}.meta", args.base.display(), name);
        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(4))?;
        while let Some(block) = blocks.next_block()? {
            writer.push_rows(&block)?;
        }
        writer.finish(&meta_path)?;
        tracing::info!(permutation = name, rows = rows.len(), "wrote permutation");
    }

    write_vocabulary_file(&format!("{}.vocabulary.internal", args.base.display()), &vocabulary)?;
    // `.external` is reserved for a future out-of-process string store
    // (spec §6 lists it alongside `.internal` without distinguishing the
    // two further); this builder always produces an empty one.
    write_vocabulary_file(&format!("{}.vocabulary.external", args.base.display()), &Vocabulary::from_sorted_strings(Vec::new()))?;

    let meta_data_json = serde_json::to_string_pretty(&index_config).map_err(|e| EngineError::Corruption(e.to_string()))?;
    fs::write(format!("{}.meta-data.json", args.base.display()), meta_data_json)?;

    let prefixes_json = serde_json::to_string_pretty(&index_config.prefixes_for_id_encoded_iris)
        .map_err(|e| EngineError::Corruption(e.to_string()))?;
    fs::write(format!("{}.prefixes", args.base.display()), prefixes_json)?;

    Ok(())
}

fn write_vocabulary_file(path: &str, vocabulary: &Vocabulary) -> EngineResult<()> {
    let strings = vocabulary.sorted_strings();
    let mut file = fs::File::create(path)?;
    let encoded = bincode::serialize(&strings).map_err(|e| EngineError::Corruption(e.to_string()))?;
    file.write_all(&encoded)?;
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
