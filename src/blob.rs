//! Serialized blob format (spec §6): a self-contained snapshot of a
//! pre-built index for distribution — metadata JSON, vocabulary, and the
//! named-result cache, compressed behind one magic-tagged header.
//!
//! Grounded on `src/permutation/block.rs`'s DEFLATE-per-stream approach,
//! generalized from one column to the whole payload since a blob is read
//! and written wholesale, not scanned block-by-block.

use crate::cache::NamedResultCache;
use crate::error::{EngineError, EngineResult};
use crate::row::IdTable;
use crate::value::{Id, LocalVocab, Vocabulary};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;

const MAGIC: &[u8; 7] = b"QLVBLOB";
const VERSION: u32 = 1;

/// A serializable snapshot of one [`IdTable`]: row-major so the format
/// doesn't depend on the in-memory column-major layout.
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    width: usize,
    rows: Vec<Vec<Id>>,
    local_vocab: Vec<String>,
    sorted_columns: Vec<usize>,
}

impl TableSnapshot {
    fn from_table(table: &IdTable) -> TableSnapshot {
        let rows = (0..table.num_rows()).map(|r| table.row(r).as_slice().to_vec()).collect();
        let local_vocab = table.local_vocab();
        let strings = (0..local_vocab.len() as u64).map(|i| local_vocab.get(i)).collect();
        TableSnapshot {
            width: table.width(),
            rows,
            local_vocab: strings,
            sorted_columns: table.sorted_columns().to_vec(),
        }
    }

    fn into_table(self) -> IdTable {
        let local_vocab = LocalVocab::new();
        for s in self.local_vocab {
            local_vocab.push(s);
        }
        let mut table = IdTable::new(self.width, local_vocab);
        for row in &self.rows {
            table.push_row(row);
        }
        table.set_sorted_columns(self.sorted_columns);
        table
    }
}

#[derive(Serialize, Deserialize)]
struct BlobPayload {
    metadata_json: String,
    vocabulary: Vec<String>,
    named_results: Vec<(String, TableSnapshot)>,
}

/// Build a blob from an index's metadata, vocabulary, and named-result
/// cache (spec §6: "compressed stream containing in order: metadata JSON
/// string, vocabulary, named-result cache").
pub fn serialize_to_blob(metadata_json: &str, vocabulary: &Vocabulary, named_results: &NamedResultCache) -> EngineResult<Vec<u8>> {
    let named_snapshots: Vec<(String, TableSnapshot)> = named_results
        .names()
        .into_iter()
        .filter_map(|name| named_results.get(&name).map(|table| (name, TableSnapshot::from_table(&table))))
        .collect();

    let payload = BlobPayload {
        metadata_json: metadata_json.to_string(),
        vocabulary: vocabulary.sorted_strings(),
        named_results: named_snapshots,
    };
    let encoded = bincode::serialize(&payload).map_err(|e| EngineError::Corruption(e.to_string()))?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&encoded)?;
    let compressed = encoder.finish()?;

    let mut blob = Vec::with_capacity(MAGIC.len() + 4 + compressed.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&VERSION.to_le_bytes());
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// The result of [`deserialize_from_blob`]: the metadata JSON string, the
/// reconstructed vocabulary, and a fresh [`NamedResultCache`] populated
/// from the blob's pinned results.
pub struct DecodedBlob {
    pub metadata_json: String,
    pub vocabulary: Vocabulary,
    pub named_results: NamedResultCache,
}

/// Inverse of [`serialize_to_blob`]. Validates the magic and version
/// before decompressing (spec §6: "Readers validate magic and version
/// before decompressing"), so a corrupt or foreign file fails fast with a
/// [`EngineError::Corruption`] rather than feeding garbage to the
/// decompressor.
pub fn deserialize_from_blob(bytes: &[u8]) -> EngineResult<DecodedBlob> {
    if bytes.len() < MAGIC.len() + 4 {
        return Err(EngineError::Corruption("blob is shorter than the fixed header".to_string()));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(EngineError::Corruption("blob magic mismatch".to_string()));
    }
    let (version_bytes, compressed) = rest.split_at(4);
    let version = u32::from_le_bytes(version_bytes.try_into().expect("split_at(4) guarantees 4 bytes"));
    if version != VERSION {
        return Err(EngineError::Corruption(format!("unsupported blob version {version}, expected {VERSION}")));
    }

    let mut decoder = DeflateDecoder::new(compressed);
    let mut encoded = Vec::new();
    decoder.read_to_end(&mut encoded)?;

    let payload: BlobPayload = bincode::deserialize(&encoded).map_err(|e| EngineError::Corruption(e.to_string()))?;

    let named_results = NamedResultCache::new();
    for (name, snapshot) in payload.named_results {
        named_results.pin(name, Arc::new(snapshot.into_table()));
    }

    Ok(DecodedBlob {
        metadata_json: payload.metadata_json,
        vocabulary: Vocabulary::from_sorted_strings(payload.vocabulary),
        named_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Id;

    #[test]
    fn round_trips_metadata_and_vocabulary_with_no_named_results() {
        let vocabulary = Vocabulary::from_sorted_strings(vec!["<a>".to_string(), "<b>".to_string()]);
        let named_results = NamedResultCache::new();
        let blob = serialize_to_blob("{\"base\":\"x\"}", &vocabulary, &named_results).unwrap();

        assert_eq!(&blob[..7], MAGIC);

        let decoded = deserialize_from_blob(&blob).unwrap();
        assert_eq!(decoded.metadata_json, "{\"base\":\"x\"}");
        assert_eq!(decoded.vocabulary.len(), 2);
        assert!(decoded.named_results.names().is_empty());
    }

    #[test]
    fn round_trips_a_pinned_named_result() {
        let vocabulary = Vocabulary::from_sorted_strings(vec![]);
        let named_results = NamedResultCache::new();
        let mut table = IdTable::new(2, LocalVocab::new());
        table.push_row(&[Id::from_int(1), Id::from_int(2)]);
        table.push_row(&[Id::from_int(3), Id::from_int(4)]);
        table.set_sorted_columns(vec![0]);
        named_results.pin("mine".to_string(), Arc::new(table));

        let blob = serialize_to_blob("{}", &vocabulary, &named_results).unwrap();
        let decoded = deserialize_from_blob(&blob).unwrap();

        let restored = decoded.named_results.get("mine").unwrap();
        assert_eq!(restored.num_rows(), 2);
        assert_eq!(restored.get(0, 0), Id::from_int(1));
        assert_eq!(restored.get(1, 1), Id::from_int(4));
        assert_eq!(restored.sorted_columns(), &[0]);
    }

    #[test]
    fn rejects_a_bad_magic() {
        let mut blob = serialize_to_blob("{}", &Vocabulary::from_sorted_strings(vec![]), &NamedResultCache::new()).unwrap();
        blob[0] = b'X';
        assert!(deserialize_from_blob(&blob).is_err());
    }

    #[test]
    fn rejects_an_unsupported_version() {
        let mut blob = serialize_to_blob("{}", &Vocabulary::from_sorted_strings(vec![]), &NamedResultCache::new()).unwrap();
        blob[7..11].copy_from_slice(&99u32.to_le_bytes());
        assert!(deserialize_from_blob(&blob).is_err());
    }
}
