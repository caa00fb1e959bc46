use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::io::{ArtifactReader, ArtifactWriter};
use crate::models::{ConsolidatedRow, TransformedRow};
use crate::pipeline::{StageContext, StageOutput};

/// Text folding applied to a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Uppercase,
    Lowercase,
}

impl Normalization {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::Uppercase => value.to_uppercase(),
            Self::Lowercase => value.to_lowercase(),
        }
    }
}

/// Which column to normalize, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    #[serde(default)]
    pub normalization: Normalization,
}

impl FieldRule {
    pub fn uppercase(field: &str) -> Self {
        Self {
            field: field.to_string(),
            normalization: Normalization::Uppercase,
        }
    }

    /// Position of the rule's column in a header
    pub fn resolve(&self, header: &[String]) -> Result<usize> {
        header
            .iter()
            .position(|h| *h == self.field)
            .ok_or_else(|| PipelineError::UnknownField {
                field: self.field.clone(),
                schema: "consolidated".to_string(),
            })
    }

    /// Fold the rule's column; every other column passes through unchanged
    pub fn apply(&self, row: ConsolidatedRow) -> Result<TransformedRow> {
        let index = self.resolve(row.header())?;
        Ok(self.apply_at(row, index))
    }

    fn apply_at(&self, row: ConsolidatedRow, index: usize) -> TransformedRow {
        let folded = self.normalization.apply(&row.values()[index]);
        row.with_value(index, folded)
    }
}

/// Execute the transform stage: fold one column of the consolidated artifact
/// into the staging artifact
pub fn execute_transform(
    input: &Path,
    output: &Path,
    rule: &FieldRule,
    ctx: &StageContext,
) -> Result<StageOutput> {
    let reader = ArtifactReader::open(input)?;
    let index = rule.resolve(reader.header())?;
    info!(
        "{}: applying {:?} to column {} ({})",
        ctx.stage(),
        rule.normalization,
        index,
        rule.field
    );

    let mut writer = ArtifactWriter::create(output, reader.header())?;
    for row in reader {
        ctx.checkpoint()?;
        writer.write_row(&rule.apply_at(row?, index))?;
    }

    let rows = writer.rows();
    let path = ctx.commit(writer)?;
    info!("{}: {} rows staged at {:?}", ctx.stage(), rows, path);

    Ok(StageOutput {
        rows,
        artifacts: vec![path],
        ..Default::default()
    })
}
