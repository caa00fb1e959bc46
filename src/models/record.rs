use std::sync::Arc;

use crate::error::{PipelineError, Result};

use super::Schema;

/// One decoded source line, values in schema order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<String>,
    /// 1-based line number in the source file
    line: u64,
}

impl Record {
    /// Build a record; the value count must match the schema
    pub fn new(schema: Arc<Schema>, values: Vec<String>, line: u64) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(PipelineError::MalformedRecord {
                input: schema.name.clone(),
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    schema.len(),
                    values.len()
                ),
            });
        }
        Ok(Self {
            schema,
            values,
            line,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    /// Look up a value by field name
    pub fn get(&self, field: &str) -> Result<&str> {
        let index = self.schema.index_of(field)?;
        Ok(&self.values[index])
    }
}

/// A named, ordered row. Used for projected records, consolidated rows,
/// and transformed rows; only the header differs between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    header: Arc<[String]>,
    values: Vec<String>,
}

/// A record narrowed to a declared subset of its fields
pub type ProjectedRecord = Row;

/// Projected records from all three sources concatenated at one line index
pub type ConsolidatedRow = Row;

/// A consolidated row after the field rule has been applied
pub type TransformedRow = Row;

impl Row {
    pub fn new(header: Arc<[String]>, values: Vec<String>) -> Self {
        debug_assert_eq!(header.len(), values.len());
        Self { header, values }
    }

    pub fn header(&self) -> &Arc<[String]> {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name
    pub fn get(&self, field: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|h| h == field)
            .map(|i| self.values[i].as_str())
    }

    /// (name, value) pairs in column order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Replace the value at `index`, keeping every other column untouched
    pub(crate) fn with_value(mut self, index: usize, value: String) -> Self {
        self.values[index] = value;
        self
    }
}
