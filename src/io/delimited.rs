use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecordsIntoIter};

use crate::error::{PipelineError, Result};
use crate::models::{Record, Schema};

/// Lazily decodes a headerless delimited source into records.
///
/// The reader is flexible so that a line with the wrong number of fields
/// reaches us and is reported against the schema rather than against the
/// first line's width. Iteration stops after the first error.
pub struct DelimitedRecords<R: Read> {
    rows: StringRecordsIntoIter<R>,
    schema: Arc<Schema>,
    path: PathBuf,
    failed: bool,
}

impl<R: Read> DelimitedRecords<R> {
    pub fn new(reader: R, delimiter: u8, schema: Arc<Schema>, path: &Path) -> Self {
        let rows = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader)
            .into_records();

        Self {
            rows,
            schema,
            path: path.to_path_buf(),
            failed: false,
        }
    }

    fn decode(&self, row: csv::StringRecord) -> Result<Record> {
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        if row.len() != self.schema.len() {
            return Err(PipelineError::MalformedRecord {
                input: self.path.display().to_string(),
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    self.schema.len(),
                    row.len()
                ),
            });
        }
        let values = row.iter().map(str::to_string).collect();
        Record::new(Arc::clone(&self.schema), values, line)
    }
}

impl<R: Read> Iterator for DelimitedRecords<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let item = match self.rows.next()? {
            Ok(row) => self.decode(row),
            Err(e) => Err(PipelineError::from_csv(&self.path, e)),
        };

        self.failed = item.is_err();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceFormat;

    fn schema(format: SourceFormat, fields: &[&str]) -> Arc<Schema> {
        Arc::new(Schema::delimited("test", format, fields))
    }

    #[test]
    fn test_comma_records_in_file_order() {
        let data = "1,car,2\n2,truck,5\n3,van,2\n";
        let records: Vec<Record> = DelimitedRecords::new(
            data.as_bytes(),
            b',',
            schema(SourceFormat::Comma, &["id", "type", "axles"]),
            Path::new("vehicle-data.csv"),
        )
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].get("type").unwrap(), "truck");
        assert_eq!(records[2].line(), 3);
    }

    #[test]
    fn test_tab_records_keep_commas_in_values() {
        let data = "1\tThu, Aug 19\t4\n";
        let records: Vec<Record> = DelimitedRecords::new(
            data.as_bytes(),
            b'\t',
            schema(SourceFormat::Tab, &["id", "when", "axles"]),
            Path::new("tollplaza-data.tsv"),
        )
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(records[0].get("when").unwrap(), "Thu, Aug 19");
    }

    #[test]
    fn test_wrong_field_count_stops_iteration() {
        let data = "1,car\n2,truck,extra\n3,van\n";
        let mut records = DelimitedRecords::new(
            data.as_bytes(),
            b',',
            schema(SourceFormat::Comma, &["id", "type"]),
            Path::new("vehicle-data.csv"),
        );

        assert!(records.next().unwrap().is_ok());
        match records.next().unwrap() {
            Err(PipelineError::MalformedRecord { line, reason, .. }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("found 3"));
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn test_short_line_is_malformed() {
        let data = "1\n";
        let result: Result<Vec<Record>> = DelimitedRecords::new(
            data.as_bytes(),
            b',',
            schema(SourceFormat::Comma, &["id", "type"]),
            Path::new("vehicle-data.csv"),
        )
        .collect();
        assert!(matches!(result, Err(PipelineError::MalformedRecord { .. })));
    }
}
