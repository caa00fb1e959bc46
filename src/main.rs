use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use toll_etl::stages::preview_source;
use toll_etl::{PipelineConfig, resume_toll_pipeline, run_toll_pipeline};

#[derive(Parser)]
#[command(name = "toll-etl")]
#[command(author, version, about = "Nightly toll traffic reconciliation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run extract -> consolidate -> transform once
    Run {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Source bundle (.tgz) to unpack into the work directory first
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Directory holding the raw sources and intermediate artifacts
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Landing directory for the transformed artifact
        #[arg(long)]
        staging_dir: Option<PathBuf>,

        /// Extra attempts per stage after a transient failure
        #[arg(long)]
        max_retries: Option<u32>,

        /// Delay before each retry, in seconds
        #[arg(long)]
        retry_delay_secs: Option<u64>,

        /// Wall-clock budget per stage attempt, in seconds
        #[arg(long)]
        stage_timeout_secs: Option<u64>,

        /// Restart from this stage, reusing artifacts from an earlier run
        #[arg(long)]
        from_stage: Option<String>,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decode one source and show its projected rows without writing anything
    Inspect {
        /// Which source to decode
        #[arg(short, long, value_enum)]
        source: SourceArg,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory holding the raw sources
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Number of rows to print
        #[arg(long, default_value = "5")]
        limit: usize,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the effective configuration as JSON
    ShowConfig {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Csv,
    Tsv,
    FixedWidth,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            archive,
            work_dir,
            staging_dir,
            max_retries,
            retry_delay_secs,
            stage_timeout_secs,
            from_stage,
            report,
            verbose,
        } => {
            setup_logging(verbose);
            let mut config = load_config(config)?;
            if archive.is_some() {
                config.archive = archive;
            }
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            if let Some(dir) = staging_dir {
                config.staging_dir = dir;
            }
            if let Some(n) = max_retries {
                config.max_retries = n;
            }
            if let Some(secs) = retry_delay_secs {
                config.retry_delay_secs = secs;
            }
            if stage_timeout_secs.is_some() {
                config.stage_timeout_secs = stage_timeout_secs;
            }
            run(config, from_stage, report).await
        }
        Commands::Inspect {
            source,
            config,
            work_dir,
            limit,
            verbose,
        } => {
            setup_logging(verbose);
            let mut config = load_config(config)?;
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            inspect(&config, source, limit)
        }
        Commands::ShowConfig { config } => {
            let config = load_config(config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            PipelineConfig::from_file(&path).context("Failed to load configuration")
        }
        None => Ok(PipelineConfig::default()),
    }
}

async fn run(
    config: PipelineConfig,
    from_stage: Option<String>,
    report: Option<PathBuf>,
) -> Result<()> {
    let result = match from_stage {
        Some(stage) => resume_toll_pipeline(&config, &stage).await,
        None => run_toll_pipeline(&config).await,
    }
    .context("Pipeline configuration rejected")?;

    if let Some(path) = report {
        result.write_json(&path)?;
        info!("Run report written to {:?}", path);
    }

    println!("Run {} ({})", result.run_id, result.pipeline);
    println!("==================");
    for stage in result.prerequisite.iter().chain(result.stages.iter()) {
        let rows = stage
            .output
            .as_ref()
            .map(|o| o.rows.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:<16} attempts={} rows={}",
            stage.name,
            format!("{:?}", stage.state),
            stage.attempts,
            rows
        );
    }

    match result.failure() {
        None => {
            println!("Run succeeded: {:?}", config.transformed_path());
            Ok(())
        }
        Some(failure) => bail!(
            "Run failed at stage {} after {} attempt(s) [{:?}]: {}",
            failure.stage,
            failure.attempts,
            failure.kind,
            failure.message
        ),
    }
}

fn inspect(config: &PipelineConfig, source: SourceArg, limit: usize) -> Result<()> {
    config.validate()?;
    let spec = match source {
        SourceArg::Csv => &config.sources.csv,
        SourceArg::Tsv => &config.sources.tsv,
        SourceArg::FixedWidth => &config.sources.fixed_width,
    };
    let path = config.source_path(spec);
    info!("Inspecting {:?}", path);

    let (projection, rows) =
        preview_source(spec, &path).with_context(|| format!("Failed to decode {:?}", path))?;

    println!("Source Analysis");
    println!("===============");
    println!("File: {}", path.display());
    println!("Schema: {} ({} fields)", spec.schema.name, spec.schema.len());
    println!("Format: {:?}", spec.schema.format);
    println!("Records: {}", rows.len());
    println!();
    println!("{}", projection.header().join(" | "));
    for row in rows.iter().take(limit) {
        println!("{}", row.values().join(" | "));
    }

    Ok(())
}
