use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use glm_aggregator::codec::{RecordFormat, codec_for};
use glm_aggregator::config::ConfigLoader;
use glm_aggregator::density::GridCounts;
use glm_aggregator::domain::DateRange;
use glm_aggregator::error::GlmError;
use glm_aggregator::output::JsonOutput;
use glm_aggregator::pipeline::{Pipeline, PlanReport, RunReport, TracingProgress};
use glm_aggregator::source::S3HttpSource;

#[derive(Parser)]
#[command(name = "glm-agg")]
#[command(about = "Aggregate GOES-16 GLM lightning files over a region of interest")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch, filter and merge every hour of a date range")]
    Run(RunArgs),
    #[command(about = "Count merged occurrences on a grid over the region")]
    Grid(GridArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(short = 'b', long = "start-date")]
    start_date: String,

    #[arg(short = 'e', long = "end-date")]
    end_date: String,

    #[arg(long)]
    config: Option<String>,

    /// Overrides the configured record format
    #[arg(long, value_enum)]
    format: Option<RecordFormat>,

    /// Only these hours of each day, e.g. `--hours 14,15`
    #[arg(long, value_delimiter = ',', value_parser = clap::value_parser!(u8).range(0..=23))]
    hours: Option<Vec<u8>>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct GridArgs {
    /// Artifact files, or directories holding them
    #[arg(required = true)]
    artifacts: Vec<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    divisions: u16,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(glm) = report.downcast_ref::<GlmError>() {
            return ExitCode::from(map_exit_code(glm));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GlmError) -> u8 {
    match error {
        GlmError::StoreUnreachable(_) => 3,
        err if err.is_configuration() => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Grid(args) => run_grid(args),
    }
}

fn run_pipeline(args: RunArgs) -> miette::Result<()> {
    let range = DateRange::parse(&args.start_date, &args.end_date)?;
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(format) = args.format {
        config.format = format;
    }
    let codec = codec_for(config.format)?;
    let source = S3HttpSource::new(&config.source)?;
    let pipeline = Pipeline::new(config, source, codec);
    let hours = args.hours.as_deref();

    if args.dry_run {
        let plan = if args.json {
            pipeline.plan(&range, hours, &JsonOutput)?
        } else {
            pipeline.plan(&range, hours, &TracingProgress)?
        };
        if args.json {
            JsonOutput::print_plan(&plan).into_diagnostic()?;
        } else {
            print_plan_summary(&plan);
        }
        return Ok(());
    }

    let report = if args.json {
        pipeline.run(&range, hours, &JsonOutput)?
    } else {
        pipeline.run(&range, hours, &TracingProgress)?
    };
    if args.json {
        JsonOutput::print_report(&report).into_diagnostic()?;
    } else {
        print_run_summary(&report);
    }
    Ok(())
}

fn run_grid(args: GridArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let grid = GridCounts::from_artifacts(
        &args.artifacts,
        &config.layout,
        config.bbox,
        usize::from(args.divisions),
    )?;
    JsonOutput::print_grid(&grid).into_diagnostic()?;
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    println!("glm-agg {} .. {}", report.start, report.end);
    println!(
        "hours: {}  artifacts: {}  failures: {}",
        report.buckets.len(),
        report.artifact_count(),
        report.failure_count()
    );
    for bucket in &report.buckets {
        if bucket.artifacts.is_empty() && bucket.failures.is_empty() {
            continue;
        }
        println!(
            "{}  listed {}  kept {}  dropped {}",
            bucket.bucket, bucket.listed, bucket.kept, bucket.dropped
        );
        for artifact in &bucket.artifacts {
            println!(
                "  window {}: {} records, {} occurrences from {} slots -> {}",
                artifact.window,
                artifact.records,
                artifact.occurrences,
                artifact.source_slots,
                artifact.path
            );
        }
        for failure in &bucket.failures {
            let target = match (&failure.object, failure.window) {
                (Some(object), _) => object.clone(),
                (None, Some(window)) => format!("window {window}"),
                (None, None) => "hour".to_string(),
            };
            println!("  failed {:?} {}: {}", failure.stage, target, failure.message);
        }
    }
}

fn print_plan_summary(plan: &PlanReport) {
    println!("glm-agg dry run {} .. {}", plan.start, plan.end);
    for bucket in &plan.buckets {
        match &bucket.error {
            Some(error) => println!("{}  listing failed: {error}", bucket.bucket),
            None => println!(
                "{}  {} objects in {} windows",
                bucket.bucket, bucket.objects, bucket.windows
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_a_format_override() {
        let cli = Cli::try_parse_from([
            "glm-agg", "run", "-b", "2023-11-18", "-e", "2023-11-18", "--format", "json",
            "--hours", "14,15",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.format, Some(RecordFormat::Json));
        assert_eq!(args.hours, Some(vec![14, 15]));
    }

    #[test]
    fn grid_takes_several_paths_and_ten_divisions() {
        let cli = Cli::try_parse_from(["glm-agg", "grid", "out/a.json", "out/day"]).unwrap();
        let Commands::Grid(args) = cli.command else {
            panic!("expected grid");
        };
        assert_eq!(args.artifacts.len(), 2);
        assert_eq!(args.divisions, 10);
        assert!(Cli::try_parse_from(["glm-agg", "grid"]).is_err());
    }

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(map_exit_code(&GlmError::StoreUnreachable("dns".to_string())), 3);
        assert_eq!(map_exit_code(&GlmError::InvalidDate("x".to_string())), 2);
        assert_eq!(map_exit_code(&GlmError::Filesystem("disk".to_string())), 1);
    }
}
