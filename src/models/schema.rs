use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Byte range of one fixed-width column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRange {
    /// Byte offset of the first character
    pub start: usize,
    /// Width in bytes
    pub length: usize,
}

impl ColumnRange {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    /// Exclusive end offset
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }
}

/// Physical layout of a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum SourceFormat {
    /// Comma-delimited, headerless
    Comma,
    /// Tab-delimited, headerless
    Tab,
    /// Fixed byte columns, one range per schema field
    FixedWidth { columns: Vec<ColumnRange> },
}

impl SourceFormat {
    /// Delimiter byte for the delimited variants
    pub fn delimiter(&self) -> Option<u8> {
        match self {
            Self::Comma => Some(b','),
            Self::Tab => Some(b'\t'),
            Self::FixedWidth { .. } => None,
        }
    }
}

/// Ordered field names plus the layout used to split a raw line into them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Name used in diagnostics (usually the source file stem)
    pub name: String,
    /// Field names in declared order
    pub fields: Vec<String>,
    #[serde(flatten)]
    pub format: SourceFormat,
}

impl Schema {
    pub fn delimited(name: &str, format: SourceFormat, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            format,
        }
    }

    pub fn fixed_width(name: &str, columns: &[(&str, usize, usize)]) -> Self {
        Self {
            name: name.to_string(),
            fields: columns.iter().map(|(f, _, _)| f.to_string()).collect(),
            format: SourceFormat::FixedWidth {
                columns: columns
                    .iter()
                    .map(|&(_, start, length)| ColumnRange::new(start, length))
                    .collect(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field, failing closed on unknown names
    pub fn index_of(&self, field: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f == field)
            .ok_or_else(|| PipelineError::UnknownField {
                field: field.to_string(),
                schema: self.name.clone(),
            })
    }

    /// Check the schema is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(PipelineError::InvalidConfig {
                reason: format!("schema '{}' declares no fields", self.name),
            });
        }

        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].contains(field) {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("schema '{}' declares '{}' twice", self.name, field),
                });
            }
        }

        if let SourceFormat::FixedWidth { columns } = &self.format {
            if columns.len() != self.fields.len() {
                return Err(PipelineError::InvalidConfig {
                    reason: format!(
                        "schema '{}' has {} fields but {} fixed-width columns",
                        self.name,
                        self.fields.len(),
                        columns.len()
                    ),
                });
            }
            if let Some(pos) = columns
                .iter()
                .position(|c| c.start.checked_add(c.length).is_none())
            {
                return Err(PipelineError::InvalidConfig {
                    reason: format!(
                        "schema '{}' column '{}' ends past the addressable range",
                        self.name, self.fields[pos]
                    ),
                });
            }
            if let Some(pos) = columns.iter().position(|c| c.length == 0) {
                return Err(PipelineError::InvalidConfig {
                    reason: format!(
                        "schema '{}' column '{}' has zero width",
                        self.name, self.fields[pos]
                    ),
                });
            }
        }

        Ok(())
    }
}
