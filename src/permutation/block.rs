//! Per-block compression: independent DEFLATE streams per column (spec
//! §4.2: "compress each column independently; any order-preserving,
//! block-level codec ... is sufficient").

use crate::value::Id;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress one column's worth of row values (raw little-endian `u64` id
/// bits) into a DEFLATE stream.
pub(super) fn compress_column(values: &[Id]) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(values.len() * 8);
    for id in values {
        raw.extend_from_slice(&id.to_bits().to_le_bytes());
    }
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    encoder.finish()
}

/// Inverse of [`compress_column`]; `num_rows` must match what was encoded.
pub(super) fn decompress_column(bytes: &[u8], num_rows: usize) -> std::io::Result<Vec<Id>> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut raw = Vec::with_capacity(num_rows * 8);
    decoder.read_to_end(&mut raw)?;
    if raw.len() != num_rows * 8 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "decompressed column has {} bytes, expected {} for {num_rows} rows",
                raw.len(),
                num_rows * 8
            ),
        ));
    }
    let mut values = Vec::with_capacity(num_rows);
    for chunk in raw.chunks_exact(8) {
        let bits = u64::from_le_bytes(chunk.try_into().unwrap());
        values.push(Id::from_bits(bits));
    }
    Ok(values)
}

/// A block's worth of rows, held column-major so [`compress_column`] can
/// work on one column at a time.
pub(super) struct BlockColumns {
    pub width: usize,
    pub num_rows: usize,
    pub columns: Vec<Vec<Id>>,
}

impl BlockColumns {
    pub fn from_rows(width: usize, rows: &[Vec<Id>]) -> BlockColumns {
        let mut columns = vec![Vec::with_capacity(rows.len()); width];
        for row in rows {
            for (c, col) in columns.iter_mut().enumerate() {
                col.push(row[c]);
            }
        }
        BlockColumns {
            width,
            num_rows: rows.len(),
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_round_trips_through_compression() {
        let values: Vec<Id> = (0..500).map(Id::from_int).collect();
        let compressed = compress_column(&values).unwrap();
        assert!(compressed.len() < values.len() * 8);
        let decompressed = decompress_column(&compressed, values.len()).unwrap();
        assert_eq!(values, decompressed);
    }

    #[test]
    fn empty_column_round_trips() {
        let compressed = compress_column(&[]).unwrap();
        let decompressed = decompress_column(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }
}
