//! Blob-builder CLI (spec §6): `-i -f -F -j <jsonCachedQueries> -o <blobFile>`.
//!
//! Parses the same input triples as the index builder to produce the
//! metadata/vocabulary pair, then wraps them with a named-result cache
//! into one `QLVBLOB` file via [`sparql_core::serialize_to_blob`].
//!
//! `-j <jsonCachedQueries>` names a JSON file of `{name, query}` pairs
//! whose results should be pre-computed and pinned into the blob. Running
//! those queries requires a SPARQL parser and planner, both explicitly
//! outside this crate's scope (spec §1), so this builder parses the file
//! to validate it and logs a warning per entry instead of executing it —
//! the blob it produces always has an empty named-result cache. A caller
//! with an actual query engine wired up would call
//! [`sparql_core::serialize_to_blob`] directly with a populated
//! `NamedResultCache`.

use clap::Parser;
use serde::Deserialize;
use sparql_core::cache::NamedResultCache;
use sparql_core::config::{IndexConfig, InputFileFormat, InputFileSpec, VocabularyRepresentation};
use sparql_core::error::{ConfigError, EngineError, EngineResult};
use sparql_core::ingest;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sparql-core-blob", about = "Build a distributable blob from a triples file")]
struct Args {
    #[arg(short = 'i', long = "base")]
    base: PathBuf,

    #[arg(short = 'f', long = "file", required = true)]
    files: Vec<PathBuf>,

    #[arg(short = 'F', long = "format", default_value = "nt")]
    format: String,

    /// JSON file of `[{"name": ..., "query": ...}, ...]` cached-query
    /// entries (see module docs: not executed by this builder).
    #[arg(short = 'j', long = "cached-queries")]
    cached_queries: Option<PathBuf>,

    #[arg(short = 'o', long = "out")]
    out: PathBuf,
}

#[derive(Deserialize)]
struct CachedQueryEntry {
    name: String,
    #[allow(dead_code)]
    query: String,
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

fn run(args: Args) -> EngineResult<()> {
    let format = parse_format(&args.format)?;
    if format != InputFileFormat::NTriples {
        return Err(EngineError::Config(ConfigError::Conflict(format!(
            "input format '{}' is not supported by this builder; convert to N-Triples and pass -F nt",
            args.format
        ))));
    }

    let index_config = IndexConfig {
        base_name: args.base.clone(),
        input_files: args
            .files
            .iter()
            .map(|path| InputFileSpec { path: path.clone(), format })
            .collect(),
        memory_limit_bytes: 4_000_000_000,
        vocabulary_representation: VocabularyRepresentation::OnDiskCompressed,
        prefixes_for_id_encoded_iris: Vec::new(),
        text_index: None,
        keep_temp_files: false,
        only_pso_pos: false,
        no_patterns: false,
    };
    index_config.validate()?;

    let mut all_triples = Vec::new();
    for file in &args.files {
        all_triples.extend(ingest::read_terms(file)?);
    }
    let vocabulary = ingest::build_vocabulary(&all_triples);
    tracing::info!(size = vocabulary.len(), "built vocabulary");

    let named_results = NamedResultCache::new();
    if let Some(path) = &args.cached_queries {
        let contents = fs::read_to_string(path)?;
        let entries: Vec<CachedQueryEntry> =
            serde_json::from_str(&contents).map_err(|e| EngineError::Parse(format!("{}: {e}", path.display())))?;
        for entry in &entries {
            tracing::warn!(
                name = %entry.name,
                "cached query not pre-computed: this builder has no SPARQL query engine wired in; \
                 the blob's named-result cache will not contain an entry for it"
            );
        }
    }

    let metadata_json = serde_json::to_string_pretty(&index_config).map_err(|e| EngineError::Corruption(e.to_string()))?;
    let blob = sparql_core::serialize_to_blob(&metadata_json, &vocabulary, &named_results)?;
    fs::write(&args.out, blob)?;
    tracing::info!(path = %args.out.display(), "wrote blob");

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
