pub mod archive;
pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod stages;

pub use archive::{ArchiveExtractor, TarExtractor};
pub use config::{PipelineConfig, SourceSpec, SourcesConfig};
pub use error::{ErrorKind, PipelineError, Result};
pub use io::{ArtifactReader, ArtifactWriter, open_source};
pub use models::{
    ColumnRange, ConsolidatedRow, ProjectedRecord, Projection, Record, Row, Schema, SourceFormat,
    TransformedRow, project,
};
pub use pipeline::{
    LogNotifier, Notifier, NotifySettings, Pipeline, RetryPolicy, RunResult, RunState,
    StageDescriptor, StageState, build_pipeline, resume_toll_pipeline, run_toll_pipeline,
};
pub use stages::{
    FieldRule, Normalization, RowAligner, execute_consolidate, execute_extract, execute_transform,
};
