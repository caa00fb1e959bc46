use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::models::{ColumnRange, Record, Schema};

/// Lazily decodes a fixed-width source into records, one per line.
///
/// Columns are byte ranges over the raw line. Content past the last declared
/// column is ignored; a line that ends before it is malformed, and so is a
/// column whose bytes are not valid UTF-8.
pub struct FixedWidthRecords<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
    columns: Vec<ColumnRange>,
    required_len: usize,
    schema: Arc<Schema>,
    path: PathBuf,
    line: u64,
    failed: bool,
}

impl<R: BufRead> FixedWidthRecords<R> {
    pub fn new(reader: R, columns: Vec<ColumnRange>, schema: Arc<Schema>, path: &Path) -> Self {
        let required_len = columns.iter().map(ColumnRange::end).max().unwrap_or(0);
        Self {
            reader,
            buf: Vec::new(),
            columns,
            required_len,
            schema,
            path: path.to_path_buf(),
            line: 0,
            failed: false,
        }
    }

    fn malformed(&self, reason: String) -> PipelineError {
        PipelineError::MalformedRecord {
            input: self.path.display().to_string(),
            line: self.line,
            reason,
        }
    }

    fn decode(&self, raw: &[u8]) -> Result<Record> {
        let line = raw.strip_suffix(b"\n").unwrap_or(raw);
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.len() < self.required_len {
            return Err(self.malformed(format!(
                "line is {} bytes, columns need {}",
                line.len(),
                self.required_len
            )));
        }

        let values = self
            .columns
            .iter()
            .map(|c| {
                std::str::from_utf8(&line[c.start..c.end()])
                    .map(str::to_string)
                    .map_err(|e| {
                        self.malformed(format!(
                            "bytes {}..{} are not valid UTF-8: {}",
                            c.start,
                            c.end(),
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Record::new(Arc::clone(&self.schema), values, self.line)
    }
}

impl<R: BufRead> Iterator for FixedWidthRecords<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        self.buf.clear();
        let item = match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {
                self.line += 1;
                self.decode(&self.buf)
            }
            Err(e) => Err(PipelineError::io(&self.path, e)),
        };

        self.failed = item.is_err();
        Some(item)
    }
}
