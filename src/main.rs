mod pipelines;
mod utils;
mod config;
mod cli;

use std::time::{Instant, SystemTime};
use std::{env, fs};
use chrono::DateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::io::Write;

use anyhow::Result;
use log::{self, LevelFilter, info, Level};
use env_logger::Builder;
use crate::cli::parse;
use crate::config::defs::{
    PipelineError, RunConfig, TRACKING_LOG_FILENAME, TRACKING_PROJECT, TRACKING_TASK,
};
use crate::utils::command::SystemRunner;
use crate::utils::file::{to_absolute, ArtifactStore, LocalArtifactStore};
use crate::utils::tracking::{FileTracker, RunTracker};
use pipelines::genome_alignment;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n GenoVar\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    let out_dir = match setup_output_dir(&args, &dir) {
        Ok(out_dir) => out_dir,
        Err(e) => {
            eprintln!("Critical error: {}", e);
            std::process::exit(1);
        }
    };
    info!("The output directory is {:?}\n", out_dir);

    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd: dir,
        out_dir: out_dir.clone(),
        args,
    });

    let tracker = match FileTracker::create(
        &out_dir.join(TRACKING_LOG_FILENAME),
        TRACKING_PROJECT,
        TRACKING_TASK,
    ) {
        Ok(tracker) => tracker,
        Err(e) => {
            eprintln!("Critical error: {}", e);
            std::process::exit(1);
        }
    };
    let runner = SystemRunner;
    let store = LocalArtifactStore {
        cwd: run_config.cwd.clone(),
    };

    if let Err(e) = match module.as_str() {
        "genome_alignment" => genome_alignment_run(run_config, &runner, &tracker, &store).await,
        _ => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    } {
        tracker.report_text(
            &format!(
                "Pipeline failed: {} at {} milliseconds.",
                e,
                run_start.elapsed().as_millis()
            ),
            Level::Error,
        );
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn genome_alignment_run(
    run_config: Arc<RunConfig>,
    runner: &SystemRunner,
    tracker: &dyn RunTracker,
    store: &dyn ArtifactStore,
) -> Result<(), PipelineError> {
    genome_alignment::run(run_config, runner, tracker, store).await
}

/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `<reads_stem>_YYYYMMDD`.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &cli::args::Arguments, cwd: &PathBuf) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => {
            let reads_path = to_absolute(Path::new(&args.reads), cwd);
            let dir_base = reads_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default_sample".to_string());

            let timestamp = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .map(|secs| {
                    let dt = DateTime::from_timestamp(secs as i64, 0)
                        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap());
                    dt.format("%Y%m%d").to_string()
                })
                .unwrap_or_else(|_| "19700101".to_string());
            cwd.join(format!("{}_{}", dir_base, timestamp))
        }
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
