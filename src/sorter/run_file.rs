//! On-disk spill files for the external sorter.
//!
//! Grounded on the teacher's `storage::persist` module, which already has a
//! "buffer rows in memory, then flush to a batch file" shape; this adapts it
//! to bincode-encoded, already-sorted runs that are later read back
//! block-by-block during the k-way merge.

use super::Row;
use crate::value::Id;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// One sorted run, spilled to a temporary file. Rows are encoded as raw
/// little-endian `u64` id bits, `width` per row, with no per-row framing:
/// the width is fixed and known to both writer and reader.
pub(super) struct RunFile {
    path: PathBuf,
    width: usize,
    reader: Option<BufReader<File>>,
}

impl RunFile {
    pub(super) fn write(dir: &std::path::Path, width: usize, rows: &[Row]) -> std::io::Result<RunFile> {
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix("sorter-run-")
            .suffix(".bin")
            .tempfile_in(dir)?;
        let (file, path) = file.keep().map_err(|e| e.error)?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            for &id in &row.0 {
                writer.write_all(&id.to_bits().to_le_bytes())?;
            }
        }
        writer.flush()?;
        Ok(RunFile {
            path,
            width,
            reader: None,
        })
    }

    /// Read the next row, opening the file lazily on first access.
    pub(super) fn next_row(&mut self) -> super::SorterResult<Option<Vec<Id>>> {
        if self.reader.is_none() {
            self.reader = Some(BufReader::new(File::open(&self.path)?));
        }
        let reader = self.reader.as_mut().unwrap();
        let mut row = Vec::with_capacity(self.width);
        let mut buf = [0u8; 8];
        for _ in 0..self.width {
            match reader.read_exact(&mut buf) {
                Ok(()) => row.push(Id::from_bits(u64::from_le_bytes(buf))),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if row.is_empty() {
                        return Ok(None);
                    }
                    return Err(super::SorterError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "run file truncated mid-row",
                    )));
                }
                Err(e) => return Err(super::SorterError::Io(e)),
            }
        }
        Ok(Some(row))
    }
}

impl Drop for RunFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
