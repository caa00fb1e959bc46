use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::{Projection, Schema, SourceFormat};
use crate::pipeline::RetryPolicy;
use crate::stages::{FieldRule, Normalization};

/// One raw input file: where it is, how to decode it, what to keep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// File name inside the work directory
    pub file: String,
    /// Declared layout of each line
    pub schema: Schema,
    /// Fields to retain, in output order
    pub project: Vec<String>,
    /// File name of the projected intermediate artifact
    pub artifact: String,
}

impl SourceSpec {
    /// Resolve the projection against the schema
    pub fn projection(&self) -> Result<Projection> {
        self.schema.validate()?;
        Projection::new(&self.schema, &self.project[..])
    }
}

/// The three sources, in consolidation order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub csv: SourceSpec,
    pub tsv: SourceSpec,
    pub fixed_width: SourceSpec,
}

impl SourcesConfig {
    pub fn in_order(&self) -> [&SourceSpec; 3] {
        [&self.csv, &self.tsv, &self.fixed_width]
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            csv: SourceSpec {
                file: "vehicle-data.csv".to_string(),
                schema: Schema::delimited(
                    "vehicle-data",
                    SourceFormat::Comma,
                    &[
                        "Rowid",
                        "Timestamp",
                        "Anonymized Vehicle number",
                        "Vehicle type",
                        "Number of axles",
                        "Tollplaza code",
                    ],
                ),
                project: strings(&[
                    "Rowid",
                    "Timestamp",
                    "Anonymized Vehicle number",
                    "Vehicle type",
                ]),
                artifact: "csv_data.csv".to_string(),
            },
            tsv: SourceSpec {
                file: "tollplaza-data.tsv".to_string(),
                schema: Schema::delimited(
                    "tollplaza-data",
                    SourceFormat::Tab,
                    &[
                        "Rowid",
                        "Timestamp",
                        "Anonymized Vehicle number",
                        "Vehicle type",
                        "Number of axles",
                        "Tollplaza id",
                        "Tollplaza code",
                    ],
                ),
                project: strings(&["Number of axles", "Tollplaza id", "Tollplaza code"]),
                artifact: "tsv_data.csv".to_string(),
            },
            fixed_width: SourceSpec {
                file: "payment-data.txt".to_string(),
                schema: Schema::fixed_width(
                    "payment-data",
                    &[("Type of Payment code", 0, 3), ("Vehicle Code", 3, 4)],
                ),
                project: strings(&["Type of Payment code", "Vehicle Code"]),
                artifact: "fixed_width_data.csv".to_string(),
            },
        }
    }
}

/// Complete configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Operator responsible for the run
    pub owner: String,
    /// Notification recipients
    pub email: Vec<String>,
    pub notify_on_failure: bool,
    pub notify_on_retry: bool,
    /// Extra attempts per stage after the first failure
    pub max_retries: u32,
    /// Fixed delay before each retry, in seconds
    pub retry_delay_secs: u64,
    /// Wall-clock budget per stage attempt, in seconds
    pub stage_timeout_secs: Option<u64>,
    /// Compressed source bundle, unpacked into `work_dir` before the chain
    pub archive: Option<PathBuf>,
    /// Holds the raw sources and the intermediate artifacts
    pub work_dir: PathBuf,
    /// Landing location for the final artifact
    pub staging_dir: PathBuf,
    /// Consolidated artifact file name inside `work_dir`
    pub consolidated_artifact: String,
    /// Final artifact file name inside `staging_dir`
    pub transformed_artifact: String,
    pub sources: SourcesConfig,
    pub transform: FieldRule,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            owner: "toll-etl".to_string(),
            email: vec![],
            notify_on_failure: true,
            notify_on_retry: true,
            max_retries: 1,
            retry_delay_secs: 300,
            stage_timeout_secs: None,
            archive: None,
            work_dir: PathBuf::from("."),
            staging_dir: PathBuf::from("staging"),
            consolidated_artifact: "extracted_data.csv".to_string(),
            transformed_artifact: "transformed_data.csv".to_string(),
            sources: SourcesConfig::default(),
            transform: FieldRule {
                field: "Vehicle type".to_string(),
                normalization: Normalization::Uppercase,
            },
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| PipelineError::InvalidConfig {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: self.stage_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn source_path(&self, source: &SourceSpec) -> PathBuf {
        self.work_dir.join(&source.file)
    }

    pub fn artifact_path(&self, source: &SourceSpec) -> PathBuf {
        self.work_dir.join(&source.artifact)
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.work_dir.join(&self.consolidated_artifact)
    }

    pub fn transformed_path(&self) -> PathBuf {
        self.staging_dir.join(&self.transformed_artifact)
    }

    /// Consolidated column names: each source's projection, in source order
    pub fn consolidated_header(&self) -> Result<Vec<String>> {
        let mut header: Vec<String> = Vec::new();
        for source in self.sources.in_order() {
            for field in source.projection()?.header().iter() {
                if header.contains(field) {
                    return Err(PipelineError::DuplicateField {
                        field: field.clone(),
                    });
                }
                header.push(field.clone());
            }
        }
        Ok(header)
    }

    /// Resolve every schema, projection, and the transform field before any
    /// row is read
    pub fn validate(&self) -> Result<()> {
        let header = self.consolidated_header()?;
        if !header.contains(&self.transform.field) {
            return Err(PipelineError::UnknownField {
                field: self.transform.field.clone(),
                schema: self.consolidated_artifact.clone(),
            });
        }

        let sources = self.sources.in_order().map(|s| self.source_path(s));
        let mut outputs: Vec<PathBuf> = self
            .sources
            .in_order()
            .iter()
            .map(|s| self.artifact_path(s))
            .collect();
        outputs.push(self.consolidated_path());
        outputs.push(self.transformed_path());

        for (i, path) in outputs.iter().enumerate() {
            if outputs[..i].contains(path) {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("artifact {:?} is written by two stages", path),
                });
            }
            if sources.contains(path) {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("artifact {:?} would overwrite a source file", path),
                });
            }
        }

        Ok(())
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay_secs, 300);
        assert!(config.notify_on_failure);
        assert!(config.notify_on_retry);
    }

    #[test]
    fn test_default_consolidated_header() {
        let header = PipelineConfig::default().consolidated_header().unwrap();
        assert_eq!(
            header,
            [
                "Rowid",
                "Timestamp",
                "Anonymized Vehicle number",
                "Vehicle type",
                "Number of axles",
                "Tollplaza id",
                "Tollplaza code",
                "Type of Payment code",
                "Vehicle Code",
            ]
        );
    }

    #[test]
    fn test_unknown_projection_field_rejected() {
        let mut config = PipelineConfig::default();
        config.sources.tsv.project.push("Lane".to_string());
        assert!(matches!(
            config.validate(),
            Err(PipelineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_unknown_transform_field_rejected() {
        let mut config = PipelineConfig::default();
        config.transform.field = "Tollplaza name".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_duplicate_consolidated_column_rejected() {
        let mut config = PipelineConfig::default();
        config.sources.tsv.project.push("Rowid".to_string());
        assert!(matches!(
            config.validate(),
            Err(PipelineError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_staging_artifact_clash_rejected() {
        let mut config = PipelineConfig {
            work_dir: "/data/toll".into(),
            staging_dir: "/data/toll".into(),
            ..Default::default()
        };
        config.validate().unwrap();

        config.transformed_artifact = "csv_data.csv".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_artifact_over_source_rejected() {
        let mut config = PipelineConfig::default();
        config.consolidated_artifact = "vehicle-data.csv".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"owner": "ops", "max_retries": 3, "transform": {"field": "Vehicle type", "normalization": "lowercase"}}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.owner, "ops");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_secs, 300);
        assert_eq!(config.transform.normalization, Normalization::Lowercase);
        assert_eq!(config.sources.csv.file, "vehicle-data.csv");
    }
}
