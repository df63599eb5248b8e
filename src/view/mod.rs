//! Materialized view writer and reader (spec §4.5)
//!
//! A materialized view pins the result of a query to disk as its own
//! permutation, so later queries can scan it like any other relation. No
//! query planner lives in this crate, so the writer is handed a plain
//! pull-based block source instead of a query plan to execute; the
//! lazy/streaming requirement ("must not be a cache hit") falls out of
//! that shape rather than needing a separate runtime check.
//!
//! Grounded on `examples/inputlayer-inputlayer/src/view_catalog.rs` (name
//! validation, JSON sidecar, name-keyed catalog) and
//! `examples/original_source/src/engine/MaterializedView.h` /
//! `MaterializedViews.cpp` (the writer's sort-then-permutation-store
//! pipeline and the reader's `makeScanConfig` validation sequence).

use crate::cancellation::CancellationToken;
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::memory::QueryAllocator;
use crate::permutation::{
    Permutation, PermutationError, PermutationWriter, PermutationWriterConfig, ScanRange, Snapshot,
};
use crate::sorter::{ExternalSorter, KeyOrder, SorterConfig, SorterError};
use crate::value::{Datatype, Id};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

const VIEWINFO_VERSION: u32 = 1;

fn name_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9-]+$").expect("static view-name regex is valid"))
}

pub fn is_valid_view_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("invalid view name '{0}' (must match [A-Za-z0-9-]+)")]
    InvalidName(String),

    #[error("materialized views require at least 4 visible columns, got {0}")]
    TooFewColumns(usize),

    #[error("materialized view writer received a local-vocab entry in column {0}; views must not reference query-local strings")]
    LocalVocabEntry(usize),

    #[error("view '{name}' viewinfo.json has unsupported version {found} (expected {expected})")]
    UnsupportedVersion { name: String, found: u32, expected: u32 },

    #[error("view query targets '{requested}' but this view is '{actual}'")]
    ViewNameMismatch { requested: String, actual: String },

    #[error("nested graph patterns are not allowed when scanning a materialized view")]
    NestedGraphPatternNotAllowed,

    #[error("a scan-column binding is required to scan a materialized view")]
    MissingScanColumnBinding,

    #[error("column {0} does not exist in view '{1}'")]
    ColumnNotFound(usize, String),

    #[error("variable '{0}' may only be associated with one column")]
    DuplicateTargetVariable(String),

    #[error("scan-column variable '{0}' may not also be used for a payload column")]
    ScanColumnUsedAsPayload(String),

    #[error("the scan column (index 0) may not be requested as a payload column")]
    ScanColumnRequestedAsPayload,

    #[error(transparent)]
    Sorter(#[from] SorterError),

    #[error(transparent)]
    Permutation(#[from] PermutationError),

    #[error(transparent)]
    Source(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize viewinfo.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("view '{0}' does not exist")]
    NotFound(String),
}

pub type ViewResult<T> = Result<T, ViewError>;

impl From<ViewError> for EngineError {
    fn from(e: ViewError) -> EngineError {
        match e {
            ViewError::InvalidName(n) => EngineError::Config(ConfigError::InvalidViewName(n)),
            ViewError::Io(io) => EngineError::Io(io),
            ViewError::Source(engine_err) => engine_err,
            ViewError::NotFound(n) => EngineError::NotFound(format!("materialized view '{n}'")),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

/// `<onDiskBase>.view.<name>`, the common prefix every view file shares
/// (spec §6: `<B>.view.<name>.index.spo`, `.meta`, `.viewinfo.json`).
fn view_filename_base(base: &Path, name: &str) -> String {
    format!("{}.view.{}", base.display(), name)
}

fn view_data_path(base: &Path, name: &str) -> PathBuf {
    PathBuf::from(format!("{}.index.spo", view_filename_base(base, name)))
}

fn view_meta_path(base: &Path, name: &str) -> PathBuf {
    PathBuf::from(format!("{}.index.spo.meta", view_filename_base(base, name)))
}

fn view_info_path(base: &Path, name: &str) -> PathBuf {
    PathBuf::from(format!("{}.viewinfo.json", view_filename_base(base, name)))
}

/// A pull-based source of row blocks feeding [`MaterializedViewWriter`].
/// Standing in for "execute the query lazily" (spec §4.5 step 1) since no
/// query planner lives at this layer; a caller that only has a fully
/// materialized table must still wrap it behind one block at a time to
/// reach this trait, which is the only knob this crate has to enforce
/// "reject a cache hit, re-evaluate into a stream".
pub trait LazyBlockSource {
    fn next_block(&mut self) -> EngineResult<Option<Vec<Vec<Id>>>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ViewInfo {
    version: u32,
    columns: Vec<String>,
}

/// Write-side half of a materialized view (spec §4.5 writer contract).
pub struct MaterializedViewWriter {
    name: String,
    columns: Vec<String>,
}

impl MaterializedViewWriter {
    /// `columns` is the declared column order, index column first; must
    /// have width at least 4 (spec §4.5: "visible-variable list has width
    /// >= 4").
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> ViewResult<MaterializedViewWriter> {
        let name = name.into();
        if !is_valid_view_name(&name) {
            return Err(ViewError::InvalidName(name));
        }
        if columns.len() < 4 {
            return Err(ViewError::TooFewColumns(columns.len()));
        }
        Ok(MaterializedViewWriter { name, columns })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain `source` into `<base>.<name>.index.spo`/`.meta`/`.viewinfo.json`
    /// (spec §4.5 writer contract steps 1-5). `column_permutation[i]` is the
    /// source column feeding output column `i`, so the first visible
    /// variable (whichever source column that is) lands at output column 0.
    pub fn write_to_disk(
        &self,
        base_path: &Path,
        source: &mut dyn LazyBlockSource,
        column_permutation: &[usize],
        spill_dir: &Path,
        allocator: QueryAllocator,
        budget_bytes: u64,
    ) -> ViewResult<()> {
        let width = self.columns.len();
        debug_assert_eq!(column_permutation.len(), width);

        let sorter_config = SorterConfig::new(width, spill_dir);
        let comparator = KeyOrder::new((0..width).collect());
        let mut sorter = ExternalSorter::new(sorter_config, comparator, allocator, budget_bytes);

        while let Some(block) = source.next_block()? {
            for row in &block {
                for (col, id) in row.iter().enumerate() {
                    if id.datatype() == Datatype::LocalVocabIndex {
                        return Err(ViewError::LocalVocabEntry(col));
                    }
                }
                let permuted: Vec<Id> = column_permutation.iter().map(|&i| row[i]).collect();
                sorter.push(&permuted)?;
            }
        }

        let mut sorted = sorter.get_sorted_blocks()?;
        let data_path = view_data_path(base_path, &self.name);
        let meta_path = view_meta_path(base_path, &self.name);
        let mut writer = PermutationWriter::create(&data_path, PermutationWriterConfig::new(width))?;
        while let Some(block) = sorted.next_block()? {
            writer.push_rows(&block)?;
        }
        writer.finish(&meta_path)?;

        let info = ViewInfo {
            version: VIEWINFO_VERSION,
            columns: self.columns.clone(),
        };
        let file = File::create(view_info_path(base_path, &self.name))?;
        serde_json::to_writer_pretty(file, &info)?;
        Ok(())
    }
}

/// A SPARQL triple request targeting a view, as the layer above this crate
/// would describe it: which column binds the scan (index) variable, and
/// which columns the caller additionally wants bound to named variables.
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub view_name: String,
    pub nested_graph_pattern: bool,
    pub scan_column_variable: Option<String>,
    /// column index (>= 1) -> variable name requested at that column.
    pub payload_column_variables: HashMap<usize, String>,
}

/// The index-scan configuration `makeScanConfig` rewrites a [`ViewQuery`]
/// into (spec §4.5: "the first view column binds the subject slot ...
/// second and third columns bind predicate/object slots; any remaining
/// columns become additional payload columns").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub subject_variable: String,
    pub predicate_variable: String,
    pub object_variable: String,
    /// column index (> 2) paired with its bound variable, sorted by column
    /// index ("required by internals of IndexScan").
    pub additional_columns: Vec<(usize, String)>,
}

/// Read-side half of a materialized view (spec §4.5 reader contract).
pub struct MaterializedView {
    name: String,
    columns: Vec<String>,
    permutation: Permutation,
}

impl MaterializedView {
    pub fn load(base_path: &Path, name: &str, checksum: bool) -> ViewResult<MaterializedView> {
        if !is_valid_view_name(name) {
            return Err(ViewError::InvalidName(name.to_string()));
        }
        let info_path = view_info_path(base_path, name);
        let file = File::open(&info_path)?;
        let info: ViewInfo = serde_json::from_reader(file)?;
        if info.version != VIEWINFO_VERSION {
            return Err(ViewError::UnsupportedVersion {
                name: name.to_string(),
                found: info.version,
                expected: VIEWINFO_VERSION,
            });
        }
        if info.columns.len() < 4 {
            return Err(ViewError::TooFewColumns(info.columns.len()));
        }

        let data_path = view_data_path(base_path, name);
        let meta_path = view_meta_path(base_path, name);
        let permutation = Permutation::load(data_path, meta_path, checksum)?;

        Ok(MaterializedView {
            name: name.to_string(),
            columns: info.columns,
            permutation,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Eager scan over the view's one permutation, forwarding straight to
    /// [`Permutation::scan`].
    pub fn scan(&self, range: &ScanRange, cancellation: &CancellationToken) -> ViewResult<Vec<Vec<Id>>> {
        Ok(self.permutation.scan(range, cancellation, &Snapshot)?)
    }

    /// Validate `query` against this view's column layout and build the
    /// index-scan configuration a caller would pass on to a real
    /// `IndexScan` operator (spec §4.5: "Constraints checked at this step,
    /// each a distinct error kind").
    pub fn make_scan_config(
        &self,
        query: &ViewQuery,
        predicate_placeholder: &str,
        object_placeholder: &str,
    ) -> ViewResult<ScanConfig> {
        if query.view_name != self.name {
            return Err(ViewError::ViewNameMismatch {
                requested: query.view_name.clone(),
                actual: self.name.clone(),
            });
        }
        if query.nested_graph_pattern {
            return Err(ViewError::NestedGraphPatternNotAllowed);
        }
        let scan_variable = query
            .scan_column_variable
            .as_ref()
            .ok_or(ViewError::MissingScanColumnBinding)?;

        let mut seen_targets: HashSet<&str> = HashSet::new();
        seen_targets.insert(scan_variable.as_str());

        let mut sorted_payload: Vec<(usize, &str)> = Vec::with_capacity(query.payload_column_variables.len());
        for (&col, var) in &query.payload_column_variables {
            if col == 0 {
                return Err(ViewError::ScanColumnRequestedAsPayload);
            }
            if col >= self.columns.len() {
                return Err(ViewError::ColumnNotFound(col, var.clone()));
            }
            if var == scan_variable {
                return Err(ViewError::ScanColumnUsedAsPayload(var.clone()));
            }
            if !seen_targets.insert(var.as_str()) {
                return Err(ViewError::DuplicateTargetVariable(var.clone()));
            }
            sorted_payload.push((col, var.as_str()));
        }
        sorted_payload.sort_by_key(|&(col, _)| col);

        let predicate_variable = sorted_payload
            .iter()
            .find(|&&(col, _)| col == 1)
            .map(|&(_, var)| var.to_string())
            .unwrap_or_else(|| predicate_placeholder.to_string());
        let object_variable = sorted_payload
            .iter()
            .find(|&&(col, _)| col == 2)
            .map(|&(_, var)| var.to_string())
            .unwrap_or_else(|| object_placeholder.to_string());
        let additional_columns = sorted_payload
            .into_iter()
            .filter(|&(col, _)| col > 2)
            .map(|(col, var)| (col, var.to_string()))
            .collect();

        Ok(ScanConfig {
            subject_variable: scan_variable.clone(),
            predicate_variable,
            object_variable,
            additional_columns,
        })
    }
}

/// Thread-safe name-keyed cache of loaded views, lazily populated on first
/// use (spec §4.5 manager contract).
pub struct MaterializedViewManager {
    base_path: PathBuf,
    checksum: bool,
    loaded: RwLock<HashMap<String, Arc<MaterializedView>>>,
}

impl MaterializedViewManager {
    pub fn new(base_path: impl Into<PathBuf>, checksum: bool) -> MaterializedViewManager {
        MaterializedViewManager {
            base_path: base_path.into(),
            checksum,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_view(&self, name: &str) -> ViewResult<Arc<MaterializedView>> {
        if let Some(view) = self.loaded.read().get(name) {
            return Ok(Arc::clone(view));
        }
        let mut guard = self.loaded.write();
        if let Some(view) = guard.get(name) {
            return Ok(Arc::clone(view));
        }
        let view = Arc::new(MaterializedView::load(&self.base_path, name, self.checksum)?);
        guard.insert(name.to_string(), Arc::clone(&view));
        Ok(view)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().contains_key(name)
    }
}
