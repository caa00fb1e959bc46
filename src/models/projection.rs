use std::sync::Arc;

use crate::error::{PipelineError, Result};

use super::{ProjectedRecord, Record, Row, Schema};

/// A field subset resolved against a schema.
///
/// Resolution happens once, when the projection is built, so an unknown field
/// name is reported before any row is read.
#[derive(Debug, Clone)]
pub struct Projection {
    schema_name: String,
    header: Arc<[String]>,
    indices: Vec<usize>,
}

impl Projection {
    /// Resolve `fields` against `schema`, keeping the requested order
    pub fn new<S: AsRef<str>>(schema: &Schema, fields: &[S]) -> Result<Self> {
        if fields.is_empty() {
            return Err(PipelineError::InvalidConfig {
                reason: format!("projection over '{}' selects no fields", schema.name),
            });
        }

        let indices = fields
            .iter()
            .map(|f| schema.index_of(f.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let header: Arc<[String]> = fields
            .iter()
            .map(|f| f.as_ref().to_string())
            .collect::<Vec<_>>()
            .into();

        Ok(Self {
            schema_name: schema.name.clone(),
            header,
            indices,
        })
    }

    /// Projected column names, in requested order
    pub fn header(&self) -> &Arc<[String]> {
        &self.header
    }

    /// Narrow a record to the projected fields
    pub fn apply(&self, record: &Record) -> Result<ProjectedRecord> {
        if record.schema().name != self.schema_name {
            return Err(PipelineError::InvalidConfig {
                reason: format!(
                    "projection built for '{}' applied to a '{}' record",
                    self.schema_name,
                    record.schema().name
                ),
            });
        }

        let values = self
            .indices
            .iter()
            .map(|&i| record.values()[i].clone())
            .collect();
        Ok(Row::new(Arc::clone(&self.header), values))
    }
}

/// Project a single record without keeping the resolved projection around
pub fn project<S: AsRef<str>>(record: &Record, fields: &[S]) -> Result<ProjectedRecord> {
    Projection::new(record.schema(), fields)?.apply(record)
}
