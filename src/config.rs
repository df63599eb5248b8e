//! Configuration (spec §6): index-build configuration, the assembled engine
//! configuration, and the process-wide runtime parameter registry.
//!
//! Grounded on the teacher's figment-layering `Config::load` (`config.toml`
//! + environment overrides) and `examples/original_source/src/libqlever/Qlever.h`'s
//! `CommonConfig`/`IndexBuilderConfig`/`EngineConfig` split and its
//! `validate()` bound checks.

use crate::error::{ConfigError, EngineResult};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How the vocabulary (string ↔ id mapping) is represented on disk (spec
/// §6: "vocabulary representation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VocabularyRepresentation {
    InMemoryUncompressed,
    OnDiskCompressed,
}

impl Default for VocabularyRepresentation {
    fn default() -> VocabularyRepresentation {
        VocabularyRepresentation::OnDiskCompressed
    }
}

/// Optional full-text index parameters (spec §6: "optional text-index
/// parameters"); `wordsfile`/`docsfile` must both be set or both empty
/// (checked by [`IndexConfig::validate`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextIndexConfig {
    pub add_words_from_literals: bool,
    pub wordsfile: Option<PathBuf>,
    pub docsfile: Option<PathBuf>,
    pub text_index_name: String,
    /// BM25 `b` parameter, must lie in `[0, 1]`.
    pub bm25_b: f64,
    /// BM25 `k` parameter, must be `>= 0`.
    pub bm25_k: f64,
}

impl TextIndexConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bm25_k < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "bm25-k".to_string(),
                message: "must be >= 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.bm25_b) {
            return Err(ConfigError::InvalidParameter {
                name: "bm25-b".to_string(),
                message: "must be between 0 and 1, inclusive".to_string(),
            });
        }
        if self.wordsfile.is_some() != self.docsfile.is_some() {
            return Err(ConfigError::Conflict(
                "wordsfile and docsfile must either both be set or both be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input file description for `buildIndex` (spec §6: "input files +
/// file-types").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFileSpec {
    pub path: PathBuf,
    pub format: InputFileFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFileFormat {
    NTriples,
    Turtle,
    NQuads,
}

/// One-shot index-build configuration (spec §6: `buildIndex(config)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub base_name: PathBuf,
    pub input_files: Vec<InputFileSpec>,
    pub memory_limit_bytes: u64,
    #[serde(default)]
    pub vocabulary_representation: VocabularyRepresentation,
    /// IRI prefixes that can be id-encoded without a vocabulary entry (spec
    /// §6: "prefix list for id-encoded IRIs").
    #[serde(default)]
    pub prefixes_for_id_encoded_iris: Vec<String>,
    #[serde(default)]
    pub text_index: Option<TextIndexConfig>,
    #[serde(default)]
    pub keep_temp_files: bool,
    /// Build only the PSO and POS permutations. Accepted and validated for
    /// config compatibility, but rejected at build time — see the "Open
    /// Question decisions" note in `DESIGN.md`.
    #[serde(default)]
    pub only_pso_pos: bool,
    #[serde(default)]
    pub no_patterns: bool,
}

impl IndexConfig {
    /// Bounds checks spec §6 calls out explicitly: BM25 `k >= 0`, `0 <= b <=
    /// 1`, and wordsfile/docsfile both-set-or-both-empty.
    pub fn validate(&self) -> EngineResult<()> {
        if self.input_files.is_empty() {
            return Err(ConfigError::Conflict("buildIndex requires at least one input file".to_string()).into());
        }
        if let Some(text) = &self.text_index {
            text.validate()?;
        }
        if self.only_pso_pos {
            return Err(ConfigError::Conflict(
                "only-PSO-POS build mode is not supported (see DESIGN.md Open Question decisions)".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// The assembled configuration for running an engine over a previously
/// built index (spec §6: "`EngineConfig` = `IndexConfig` ∪
/// {loadTextIndex, persistUpdates}").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub index: IndexConfig,
    #[serde(default)]
    pub load_text_index: bool,
    #[serde(default = "default_true")]
    pub persist_updates: bool,
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.index.validate()
    }

    /// Load layered configuration: `engine.toml`, then `engine.local.toml`,
    /// then `ENGINE_*`-prefixed environment variables (teacher's
    /// `Config::load` layering, renamed from `FLOWLOG_` to `ENGINE_`).
    pub fn load() -> Result<EngineConfig, figment::Error> {
        Figment::new()
            .merge(Toml::file("engine.toml"))
            .merge(Toml::file("engine.local.toml"))
            .merge(Env::prefixed("ENGINE_").split("__"))
            .extract()
    }

    pub fn from_file(path: &str) -> Result<EngineConfig, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ENGINE_").split("__"))
            .extract()
    }
}

// ---------------------------------------------------------------------
// Runtime parameter registry
// ---------------------------------------------------------------------

/// A typed runtime-tunable value (spec §6: "A process-wide parameter
/// registry with typed entries").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(f) => Some(*f),
            ParameterValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

type UpdateCallback = Box<dyn Fn(&ParameterValue) + Send + Sync>;

struct ParameterEntry {
    value: ParameterValue,
    on_update: Vec<UpdateCallback>,
}

/// Process-wide runtime parameter registry (spec §6). Every required
/// parameter is pre-registered with its default by [`ParameterRegistry::new`];
/// `set` runs every registered on-update callback for that name after the
/// value changes.
pub struct ParameterRegistry {
    entries: RwLock<HashMap<String, ParameterEntry>>,
}

impl ParameterRegistry {
    pub fn new() -> ParameterRegistry {
        let registry = ParameterRegistry {
            entries: RwLock::new(HashMap::new()),
        };
        for (name, default) in Self::defaults() {
            registry.register(name, default);
        }
        registry
    }

    fn defaults() -> Vec<(&'static str, ParameterValue)> {
        vec![
            ("cache-max-num-entries", ParameterValue::Int(1000)),
            ("cache-max-size-gb", ParameterValue::Int(30)),
            ("cache-max-size-gb-single-entry", ParameterValue::Int(5)),
            ("lazy-index-scan-queue-size", ParameterValue::Int(20)),
            ("lazy-index-scan-num-threads", ParameterValue::Int(10)),
            ("lazy-index-scan-max-size-materialization", ParameterValue::Int(1_000_000)),
            ("sort-estimate-cancellation-factor", ParameterValue::Float(3.0)),
            ("websocket-updates-enabled", ParameterValue::Bool(true)),
            ("websocket-update-interval", ParameterValue::Int(1000)),
            ("throw-on-unbound-variables", ParameterValue::Bool(false)),
        ]
    }

    fn register(&self, name: &str, default: ParameterValue) {
        self.entries.write().insert(
            name.to_string(),
            ParameterEntry {
                value: default,
                on_update: Vec::new(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ParameterValue> {
        self.entries.read().get(name).map(|e| e.value.clone())
    }

    pub fn set(&self, name: &str, value: ParameterValue) -> Result<(), ConfigError> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(name).ok_or_else(|| ConfigError::InvalidParameter {
            name: name.to_string(),
            message: "unknown runtime parameter".to_string(),
        })?;
        entry.value = value.clone();
        for callback in &entry.on_update {
            callback(&value);
        }
        Ok(())
    }

    /// Register a callback invoked every time `name` changes via `set`
    /// (spec §6: "typed entries and optional on-update callbacks").
    pub fn on_update(&self, name: &str, callback: impl Fn(&ParameterValue) + Send + Sync + 'static) -> Result<(), ConfigError> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(name).ok_or_else(|| ConfigError::InvalidParameter {
            name: name.to_string(),
            message: "unknown runtime parameter".to_string(),
        })?;
        entry.on_update.push(Box::new(callback));
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ParameterRegistry {
    fn default() -> ParameterRegistry {
        ParameterRegistry::new()
    }
}
