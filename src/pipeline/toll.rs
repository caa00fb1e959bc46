use std::sync::Arc;

use tracing::info;

use crate::archive::{ArchiveExtractor, TarExtractor, ensure_sources_present};
use crate::config::{PipelineConfig, SourceSpec};
use crate::error::Result;
use crate::stages::{execute_consolidate, execute_extract, execute_transform};

use super::{
    LogNotifier, Notifier, NotifySettings, Pipeline, RetryPolicy, RunResult, StageDescriptor,
};

pub const UNZIP_DATA: &str = "unzip_data";
pub const EXTRACT_CSV: &str = "extract_csv";
pub const EXTRACT_TSV: &str = "extract_tsv";
pub const EXTRACT_FIXED_WIDTH: &str = "extract_fixed_width";
pub const CONSOLIDATE: &str = "consolidate";
pub const TRANSFORM: &str = "transform";

/// Stage names in execution order
pub const STAGES: [&str; 5] = [
    EXTRACT_CSV,
    EXTRACT_TSV,
    EXTRACT_FIXED_WIDTH,
    CONSOLIDATE,
    TRANSFORM,
];

impl From<&PipelineConfig> for NotifySettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            email: config.email.clone(),
            on_failure: config.notify_on_failure,
            on_retry: config.notify_on_retry,
        }
    }
}

/// Build the toll-data chain:
/// `extract_csv -> extract_tsv -> extract_fixed_width -> consolidate -> transform`,
/// preceded by unpacking the bundle when one is configured.
///
/// The configuration is validated here, so unknown or duplicate fields fail
/// before any file is touched.
pub fn build_pipeline(
    config: &PipelineConfig,
    notifier: Arc<dyn Notifier>,
    extractor: Arc<dyn ArchiveExtractor>,
) -> Result<Pipeline> {
    config.validate()?;

    let retry = config.retry_policy();
    let mut pipeline = Pipeline::new("toll_data", notifier, NotifySettings::from(config));

    if let Some(archive) = config.archive.clone() {
        let work_dir = config.work_dir.clone();
        let files: Vec<String> = config
            .sources
            .in_order()
            .iter()
            .map(|s| s.file.clone())
            .collect();
        pipeline = pipeline.with_prerequisite(UNZIP_DATA, move || {
            extractor.extract(&archive, &work_dir)?;
            ensure_sources_present(&archive, &work_dir, files.iter().map(String::as_str))
        });
    }

    for (name, source) in [EXTRACT_CSV, EXTRACT_TSV, EXTRACT_FIXED_WIDTH]
        .into_iter()
        .zip(config.sources.in_order())
    {
        pipeline = pipeline.stage(extract_stage(config, name, source, retry));
    }

    let inputs = config.sources.in_order().map(|s| config.artifact_path(s));
    let consolidated = config.consolidated_path();
    let output = consolidated.clone();
    pipeline = pipeline.stage(StageDescriptor::new(
        CONSOLIDATE,
        vec![consolidated.clone()],
        retry,
        move |ctx| {
            execute_consolidate(
                [inputs[0].as_path(), inputs[1].as_path(), inputs[2].as_path()],
                &output,
                ctx,
            )
        },
    ));

    let transformed = config.transformed_path();
    let output = transformed.clone();
    let rule = config.transform.clone();
    pipeline = pipeline.stage(StageDescriptor::new(
        TRANSFORM,
        vec![transformed],
        retry,
        move |ctx| execute_transform(&consolidated, &output, &rule, ctx),
    ));

    Ok(pipeline)
}

fn extract_stage(
    config: &PipelineConfig,
    name: &str,
    source: &SourceSpec,
    retry: RetryPolicy,
) -> StageDescriptor {
    let input = config.source_path(source);
    let output = config.artifact_path(source);
    let outputs = vec![output.clone()];
    let source = source.clone();
    StageDescriptor::new(name, outputs, retry, move |ctx| {
        execute_extract(&source, &input, &output, ctx)
    })
}

/// Build and run the toll pipeline with the default collaborators
pub async fn run_toll_pipeline(config: &PipelineConfig) -> Result<RunResult> {
    let pipeline = default_pipeline(config)?;
    info!(
        "Running toll pipeline in {:?}, staging to {:?}",
        config.work_dir, config.staging_dir
    );
    Ok(pipeline.run().await)
}

/// Rerun the toll pipeline from `stage`, reusing the artifacts committed by
/// the stages before it
pub async fn resume_toll_pipeline(config: &PipelineConfig, stage: &str) -> Result<RunResult> {
    let pipeline = default_pipeline(config)?;
    info!("Resuming toll pipeline in {:?} from {}", config.work_dir, stage);
    pipeline.run_from(stage).await
}

fn default_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let notifier = Arc::new(LogNotifier::new(&NotifySettings::from(config)));
    build_pipeline(config, notifier, Arc::new(TarExtractor))
}
