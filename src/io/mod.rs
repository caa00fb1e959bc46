pub mod artifact;
pub mod delimited;
pub mod fixed_width;

pub use artifact::*;
pub use delimited::*;
pub use fixed_width::*;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::models::{Record, Schema, SourceFormat};

/// A lazy, single-pass stream of records from one source file
pub type RecordStream = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// Open a raw source file and decode it with the parser its schema names
pub fn open_source(path: &Path, schema: Arc<Schema>) -> Result<RecordStream> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let reader = BufReader::new(file);

    let stream: RecordStream = match schema.format.clone() {
        SourceFormat::Comma | SourceFormat::Tab => {
            let delimiter = schema.format.delimiter().unwrap_or(b',');
            Box::new(DelimitedRecords::new(reader, delimiter, schema, path))
        }
        SourceFormat::FixedWidth { columns } => {
            Box::new(FixedWidthRecords::new(reader, columns, schema, path))
        }
    };

    Ok(stream)
}
