use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SourceSpec;
use crate::error::Result;
use crate::io::{ArtifactWriter, open_source};
use crate::models::{ProjectedRecord, Projection};
use crate::pipeline::{StageContext, StageOutput};

/// Extract one raw source into its projected intermediate artifact.
///
/// Lines are decoded, narrowed, and written one at a time in file order. The
/// first malformed line fails the stage and nothing is committed.
pub fn execute_extract(
    source: &SourceSpec,
    input: &Path,
    output: &Path,
    ctx: &StageContext,
) -> Result<StageOutput> {
    let projection = source.projection()?;
    let schema = Arc::new(source.schema.clone());

    info!(
        "{}: extracting {} of {} fields from {:?}",
        ctx.stage(),
        projection.header().len(),
        schema.len(),
        input
    );

    let records = open_source(input, schema)?;
    let mut writer = ArtifactWriter::create(output, projection.header())?;

    for record in records {
        ctx.checkpoint()?;
        let projected = projection.apply(&record?)?;
        writer.write_row(&projected)?;
    }

    let rows = writer.rows();
    let path = ctx.commit(writer)?;
    debug!("{}: wrote {} rows to {:?}", ctx.stage(), rows, path);

    Ok(StageOutput {
        rows,
        artifacts: vec![path],
        ..Default::default()
    })
}

/// Project every line of a source without writing anything
pub fn preview_source(
    source: &SourceSpec,
    input: &Path,
) -> Result<(Projection, Vec<ProjectedRecord>)> {
    let projection = source.projection()?;
    let rows = open_source(input, Arc::new(source.schema.clone()))?
        .map(|record| projection.apply(&record?))
        .collect::<Result<Vec<_>>>()?;
    Ok((projection, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::PipelineError;

    fn ctx() -> StageContext {
        StageContext::new("extract", None)
    }

    #[test]
    fn test_extract_csv_projects_and_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("vehicle-data.csv");
        let output = dir.path().join("csv_data.csv");
        std::fs::write(
            &input,
            "1,Thu Aug 19 21:54:38 2021,125094,car,2,VC965\n\
             2,Sat Jul 31 04:09:44 2021,174434,truck,4,VC965\n",
        )
        .unwrap();

        let source = PipelineConfig::default().sources.csv;
        let out = execute_extract(&source, &input, &output, &ctx()).unwrap();

        assert_eq!(out.rows, 2);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "Rowid,Timestamp,Anonymized Vehicle number,Vehicle type\n\
             1,Thu Aug 19 21:54:38 2021,125094,car\n\
             2,Sat Jul 31 04:09:44 2021,174434,truck\n"
        );
    }

    #[test]
    fn test_extract_fixed_width() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("payment-data.txt");
        let output = dir.path().join("fixed_width_data.csv");
        std::fs::write(&input, "PTEVC21 rest\nCSHVC52 rest\n").unwrap();

        let source = PipelineConfig::default().sources.fixed_width;
        execute_extract(&source, &input, &output, &ctx()).unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "Type of Payment code,Vehicle Code\nPTE,VC21\nCSH,VC52\n"
        );
    }

    #[test]
    fn test_malformed_line_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tollplaza-data.tsv");
        let output = dir.path().join("tsv_data.csv");
        std::fs::write(&input, "1\t2\t3\t4\t5\t6\t7\n1\t2\t3\n").unwrap();

        let source = PipelineConfig::default().sources.tsv;
        let err = execute_extract(&source, &input, &output, &ctx()).unwrap_err();

        assert!(matches!(err, PipelineError::MalformedRecord { line: 2, .. }));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_source_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = PipelineConfig::default().sources.csv;
        let err = execute_extract(
            &source,
            &dir.path().join("vehicle-data.csv"),
            &dir.path().join("csv_data.csv"),
            &ctx(),
        )
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancelled_attempt_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("vehicle-data.csv");
        let output = dir.path().join("csv_data.csv");
        std::fs::write(&input, "1,t,n,car,2,VC965\n").unwrap();

        let ctx = ctx();
        ctx.cancel();
        let source = PipelineConfig::default().sources.csv;
        let err = execute_extract(&source, &input, &output, &ctx).unwrap_err();

        assert!(matches!(err, PipelineError::StageTimeout { .. }));
        assert!(!output.exists());
    }
}
