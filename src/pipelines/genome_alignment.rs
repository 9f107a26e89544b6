use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{warn, Level};
use crate::config::defs::{
    PipelineError, QcStatus, RunConfig, SamtoolsSubcommand, BAM_FILENAME, CACHE_INDEX_FILENAME,
    DEMO_IMAGE_PARAM, DEMO_IMAGE_URL, FASTQC_REPORT_FILENAME, FASTQC_TAG, FREEBAYES_TAG,
    MAPPING_STATS_FILENAME, MIN_MAPPED_PERCENT, MINIMAP2_TAG, RUN_TAGS, SAMTOOLS_TAG,
    SAM_FILENAME, VCF_FILENAME,
};
use crate::utils::cache::StepCache;
use crate::utils::command::{check_dependencies, fastqc, freebayes, minimap2, samtools, CommandRunner, ToolCommand};
use crate::utils::command::samtools::SamtoolsConfig;
use crate::utils::file::{file_size, sorted_bam_path, to_absolute, validate_file_inputs, ArtifactStore};
use crate::utils::stats::mapped_percent_from_flagstat;
use crate::utils::tracking::RunTracker;

/// Gate evaluated against earlier step results before a step runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepCondition {
    Always,
    MappedPercentAtLeast(f64),
}

/// Work a step performs once its commands have run or been resolved
/// from cache.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    FastqcCheck { report: PathBuf },
    Alignment { sam: PathBuf },
    SamToBam { bam: PathBuf },
    Flagstat { bam: PathBuf, stats: PathBuf },
    SortAndVariantCalling,
}

/// Value a completed step hands back to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Qc(QcStatus),
    MappedPercent(f64),
}

/// One pipeline stage: identity, gate, artifacts, and command lines.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub condition: StepCondition,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub commands: Vec<ToolCommand>,
    pub action: StepAction,
}

/// Builds the ordered step list for a genome alignment run.
///
/// # Arguments
///
/// * `out_dir` - Directory receiving every pipeline artifact.
/// * `reference` - Absolute path to the reference FASTA.
/// * `reads` - Absolute path to the input FASTQ.
///
/// # Returns
/// Vec<StepDescriptor> in execution order.
pub fn build_plan(out_dir: &Path, reference: &Path, reads: &Path) -> Vec<StepDescriptor> {
    let report = out_dir.join(FASTQC_REPORT_FILENAME);
    let sam = out_dir.join(SAM_FILENAME);
    let bam = out_dir.join(BAM_FILENAME);
    let stats = out_dir.join(MAPPING_STATS_FILENAME);
    let sorted_bam = sorted_bam_path(&bam);
    let vcf = out_dir.join(VCF_FILENAME);

    vec![
        StepDescriptor {
            name: "fastqc_check",
            label: "FastQC",
            condition: StepCondition::Always,
            inputs: vec![reads.to_path_buf()],
            outputs: vec![report.clone()],
            commands: vec![ToolCommand {
                tool: FASTQC_TAG.to_string(),
                args: fastqc::arg_generator(reads, out_dir),
                stdout_to: None,
            }],
            action: StepAction::FastqcCheck { report },
        },
        StepDescriptor {
            name: "alignment",
            label: "Alignment",
            condition: StepCondition::Always,
            inputs: vec![reference.to_path_buf(), reads.to_path_buf()],
            outputs: vec![sam.clone()],
            commands: vec![ToolCommand {
                tool: MINIMAP2_TAG.to_string(),
                args: minimap2::arg_generator(reference, reads),
                stdout_to: Some(sam.clone()),
            }],
            action: StepAction::Alignment { sam: sam.clone() },
        },
        StepDescriptor {
            name: "sam_to_bam",
            label: "SAM to BAM",
            condition: StepCondition::Always,
            inputs: vec![sam.clone()],
            outputs: vec![bam.clone()],
            commands: vec![ToolCommand {
                tool: SAMTOOLS_TAG.to_string(),
                args: samtools::arg_generator(&SamtoolsConfig {
                    subcommand: SamtoolsSubcommand::View,
                    input: sam,
                    output: Some(bam.clone()),
                }),
                stdout_to: None,
            }],
            action: StepAction::SamToBam { bam: bam.clone() },
        },
        StepDescriptor {
            name: "flagstat",
            label: "Flagstat",
            condition: StepCondition::Always,
            inputs: vec![bam.clone()],
            outputs: vec![stats.clone()],
            commands: vec![ToolCommand {
                tool: SAMTOOLS_TAG.to_string(),
                args: samtools::arg_generator(&SamtoolsConfig {
                    subcommand: SamtoolsSubcommand::Flagstat,
                    input: bam.clone(),
                    output: None,
                }),
                stdout_to: None,
            }],
            action: StepAction::Flagstat {
                bam: bam.clone(),
                stats,
            },
        },
        StepDescriptor {
            name: "sort_and_variant_calling",
            label: "Variant calling",
            condition: StepCondition::MappedPercentAtLeast(MIN_MAPPED_PERCENT),
            inputs: vec![bam.clone(), reference.to_path_buf()],
            outputs: vec![sorted_bam.clone(), vcf.clone()],
            commands: vec![
                ToolCommand {
                    tool: SAMTOOLS_TAG.to_string(),
                    args: samtools::arg_generator(&SamtoolsConfig {
                        subcommand: SamtoolsSubcommand::Sort,
                        input: bam,
                        output: Some(sorted_bam.clone()),
                    }),
                    stdout_to: None,
                },
                ToolCommand {
                    tool: FREEBAYES_TAG.to_string(),
                    args: freebayes::arg_generator(reference, &sorted_bam),
                    stdout_to: Some(vcf),
                },
            ],
            action: StepAction::SortAndVariantCalling,
        },
    ]
}

/// Runs FastQC on the input FASTQ and derives the QC status from the
/// extracted text report.
///
/// # Arguments
///
/// * `runner` - Command runner for external tools.
/// * `command` - Prepared fastqc command line.
/// * `report_path` - Expected location of the extracted report.
///
/// # Returns
/// StepOutcome::Qc, Pass unless the report contains a FAIL entry.
async fn fastqc_check<R: CommandRunner>(
    runner: &R,
    command: &ToolCommand,
    report_path: &Path,
) -> Result<StepOutcome, PipelineError> {
    let output = runner.run(command).await.map_err(PipelineError::Other)?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            step: "fastqc_check".to_string(),
            tool: FASTQC_TAG.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    if !report_path.exists() {
        return Err(PipelineError::OutputValidation {
            step: "fastqc_check".to_string(),
            path: report_path.to_path_buf(),
            message: format!("FastQC output not generated: {}", report_path.display()),
            stderr: String::new(),
        });
    }
    let report = std::fs::read_to_string(report_path)
        .map_err(|e| PipelineError::IOError(e.to_string()))?;
    let status = if report.contains("FAIL") {
        QcStatus::Fail
    } else {
        QcStatus::Pass
    };
    Ok(StepOutcome::Qc(status))
}

/// Aligns reads against the reference with minimap2, writing SAM to disk.
///
/// # Arguments
///
/// * `runner` - Command runner for external tools.
/// * `tracker` - Run tracking collaborator.
/// * `command` - Prepared minimap2 command line with stdout redirection.
/// * `sam_path` - Destination SAM file.
///
/// # Returns
/// StepOutcome::Completed once a non-empty SAM exists.
async fn alignment<R: CommandRunner>(
    runner: &R,
    tracker: &dyn RunTracker,
    command: &ToolCommand,
    sam_path: &Path,
) -> Result<StepOutcome, PipelineError> {
    tracker.report_text("Starting alignment with minimap2", Level::Info);
    let output = runner.run(command).await.map_err(PipelineError::Other)?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            step: "alignment".to_string(),
            tool: MINIMAP2_TAG.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    let size = file_size(sam_path).map_err(|e| PipelineError::IOError(e.to_string()))?;
    if size == 0 {
        return Err(PipelineError::OutputValidation {
            step: "alignment".to_string(),
            path: sam_path.to_path_buf(),
            message: "Empty SAM file generated".to_string(),
            stderr: output.stderr,
        });
    }
    tracker.report_text(
        &format!("Alignment completed, SAM size: {} bytes", size),
        Level::Info,
    );
    Ok(StepOutcome::Completed)
}

/// Converts the SAM alignment to BAM with samtools view.
async fn sam_to_bam<R: CommandRunner>(
    runner: &R,
    tracker: &dyn RunTracker,
    command: &ToolCommand,
    bam_path: &Path,
) -> Result<StepOutcome, PipelineError> {
    tracker.report_text("Converting SAM to BAM", Level::Info);
    let output = runner.run(command).await.map_err(PipelineError::Other)?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            step: "sam_to_bam".to_string(),
            tool: SAMTOOLS_TAG.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    let size = file_size(bam_path).map_err(|e| PipelineError::IOError(e.to_string()))?;
    if size == 0 {
        return Err(PipelineError::OutputValidation {
            step: "sam_to_bam".to_string(),
            path: bam_path.to_path_buf(),
            message: "Empty BAM file generated".to_string(),
            stderr: output.stderr,
        });
    }
    tracker.report_text(
        &format!("Conversion successful, BAM size: {} bytes", size),
        Level::Info,
    );
    Ok(StepOutcome::Completed)
}

/// Runs samtools flagstat on the BAM, persists the report verbatim, and
/// parses the mapped-read percentage from it.
///
/// # Arguments
///
/// * `runner` - Command runner for external tools.
/// * `tracker` - Run tracking collaborator.
/// * `command` - Prepared flagstat command line.
/// * `bam_path` - BAM file to inspect; must exist and be non-empty.
/// * `stats_path` - Destination for the flagstat text output.
///
/// # Returns
/// StepOutcome::MappedPercent with the parsed percentage.
async fn flagstat<R: CommandRunner>(
    runner: &R,
    tracker: &dyn RunTracker,
    command: &ToolCommand,
    bam_path: &Path,
    stats_path: &Path,
) -> Result<StepOutcome, PipelineError> {
    if !bam_path.exists() {
        return Err(PipelineError::InvalidInput {
            step: "flagstat".to_string(),
            message: format!("BAM file missing: {}", bam_path.display()),
        });
    }
    let size = file_size(bam_path).map_err(|e| PipelineError::IOError(e.to_string()))?;
    if size == 0 {
        return Err(PipelineError::InvalidInput {
            step: "flagstat".to_string(),
            message: "Empty BAM file provided".to_string(),
        });
    }
    tracker.report_text("Running samtools flagstat", Level::Info);
    let output = runner.run(command).await.map_err(PipelineError::Other)?;
    if !output.success() {
        return Err(PipelineError::ToolExecution {
            step: "flagstat".to_string(),
            tool: SAMTOOLS_TAG.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    std::fs::write(stats_path, &output.stdout)
        .map_err(|e| PipelineError::IOError(e.to_string()))?;
    let percent =
        mapped_percent_from_flagstat(&output.stdout).map_err(|e| PipelineError::MetricParse {
            step: "flagstat".to_string(),
            message: e.to_string(),
        })?;
    Ok(StepOutcome::MappedPercent(percent))
}

/// Sorts the BAM and calls variants with FreeBayes, writing VCF to disk.
async fn sort_and_variant_calling<R: CommandRunner>(
    runner: &R,
    tracker: &dyn RunTracker,
    sort_command: &ToolCommand,
    call_command: &ToolCommand,
) -> Result<StepOutcome, PipelineError> {
    tracker.report_text("Sorting BAM file", Level::Info);
    let sort_output = runner.run(sort_command).await.map_err(PipelineError::Other)?;
    if !sort_output.success() {
        return Err(PipelineError::ToolExecution {
            step: "sort_and_variant_calling".to_string(),
            tool: SAMTOOLS_TAG.to_string(),
            exit_code: sort_output.exit_code,
            stderr: sort_output.stderr,
        });
    }
    tracker.report_text("Running FreeBayes variant calling", Level::Info);
    let call_output = runner.run(call_command).await.map_err(PipelineError::Other)?;
    if !call_output.success() {
        return Err(PipelineError::ToolExecution {
            step: "sort_and_variant_calling".to_string(),
            tool: FREEBAYES_TAG.to_string(),
            exit_code: call_output.exit_code,
            stderr: call_output.stderr,
        });
    }
    Ok(StepOutcome::Completed)
}

/// Evaluates a step's gate against results recorded so far. A gate that
/// does not hold skips the step without failing the run.
fn condition_met(
    step: &StepDescriptor,
    mapped_percent: Option<f64>,
    tracker: &dyn RunTracker,
) -> Result<bool, PipelineError> {
    match step.condition {
        StepCondition::Always => Ok(true),
        StepCondition::MappedPercentAtLeast(threshold) => {
            let percent = mapped_percent.ok_or_else(|| PipelineError::MetricParse {
                step: step.name.to_string(),
                message: "No mapped percentage recorded before threshold check".to_string(),
            })?;
            if percent >= threshold {
                Ok(true)
            } else {
                // Debug formatting keeps the trailing .0 on integral
                // percentages, so 85.00% flagstat output reads back as 85.0.
                tracker.report_text(
                    &format!("Rejecting alignment with {:?}% mapped reads", percent),
                    Level::Error,
                );
                Ok(false)
            }
        }
    }
}

/// Rebuilds a step's outcome from on-disk artifacts after a cache hit,
/// without re-running any tool.
fn cached_outcome(action: &StepAction) -> Result<StepOutcome, PipelineError> {
    match action {
        StepAction::FastqcCheck { report } => {
            let text = std::fs::read_to_string(report)
                .map_err(|e| PipelineError::IOError(e.to_string()))?;
            let status = if text.contains("FAIL") {
                QcStatus::Fail
            } else {
                QcStatus::Pass
            };
            Ok(StepOutcome::Qc(status))
        }
        StepAction::Flagstat { stats, .. } => {
            let text = std::fs::read_to_string(stats)
                .map_err(|e| PipelineError::IOError(e.to_string()))?;
            let percent =
                mapped_percent_from_flagstat(&text).map_err(|e| PipelineError::MetricParse {
                    step: "flagstat".to_string(),
                    message: e.to_string(),
                })?;
            Ok(StepOutcome::MappedPercent(percent))
        }
        _ => Ok(StepOutcome::Completed),
    }
}

/// Dispatches one step to its handler.
async fn execute_step<R: CommandRunner>(
    runner: &R,
    tracker: &dyn RunTracker,
    step: &StepDescriptor,
) -> Result<StepOutcome, PipelineError> {
    match (&step.action, step.commands.as_slice()) {
        (StepAction::FastqcCheck { report }, [command]) => {
            fastqc_check(runner, command, report).await
        }
        (StepAction::Alignment { sam }, [command]) => {
            alignment(runner, tracker, command, sam).await
        }
        (StepAction::SamToBam { bam }, [command]) => {
            sam_to_bam(runner, tracker, command, bam).await
        }
        (StepAction::Flagstat { bam, stats }, [command]) => {
            flagstat(runner, tracker, command, bam, stats).await
        }
        (StepAction::SortAndVariantCalling, [sort_command, call_command]) => {
            sort_and_variant_calling(runner, tracker, sort_command, call_command).await
        }
        _ => Err(PipelineError::InvalidConfig(format!(
            "Malformed step plan for {}",
            step.name
        ))),
    }
}

/// Run function for the genome alignment pipeline
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Command runner for external tools.
/// * `tracker` - Run tracking collaborator.
/// * `store` - Artifact store resolving input references to local paths.
///
/// # Returns
/// Result<(), PipelineError>
pub async fn run<R: CommandRunner>(
    config: Arc<RunConfig>,
    runner: &R,
    tracker: &dyn RunTracker,
    store: &dyn ArtifactStore,
) -> anyhow::Result<(), PipelineError> {
    println!("\n-------------\n Genome Alignment\n-------------\n");

    // Input retrieval and validation
    let reference = store
        .local_copy(&config.args.reference)
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    let reads = store
        .local_copy(&config.args.reads)
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    let reference = to_absolute(&reference, &config.cwd);
    let reads = to_absolute(&reads, &config.cwd);
    validate_file_inputs(&reference, &reads).map_err(|e| PipelineError::InvalidInput {
        step: "input_validation".to_string(),
        message: e.to_string(),
    })?;

    // External tools check
    check_dependencies(runner).await?;

    let steps = build_plan(&config.out_dir, &reference, &reads);
    let mut cache = StepCache::load(&config.out_dir.join(CACHE_INDEX_FILENAME))
        .map_err(|e| PipelineError::IOError(e.to_string()))?;
    let mut mapped_percent: Option<f64> = None;

    for (index, step) in steps.iter().enumerate() {
        if !condition_met(step, mapped_percent, tracker)? {
            continue;
        }

        let fingerprint = StepCache::fingerprint(&step.commands, &step.inputs)
            .map_err(|e| PipelineError::IOError(e.to_string()))?;
        let cached = !config.args.no_cache && cache.is_fresh(step.name, fingerprint, &step.outputs);

        let result = if cached {
            tracker.report_text(
                &format!("Using cached result for {}", step.label),
                Level::Info,
            );
            cached_outcome(&step.action)
        } else {
            // Invalidate this step plus everything downstream and persist
            // the index before any tool runs, so a mid-run failure leaves
            // no stale entries behind on disk.
            let invalidated: Vec<&str> = steps[index..].iter().map(|s| s.name).collect();
            cache.invalidate(&invalidated);
            if let Err(e) = cache.save() {
                warn!("Failed to save cache index: {}", e);
            }
            execute_step(runner, tracker, step).await
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracker.report_text(&format!("{} failed: {}", step.label, e), Level::Error);
                return Err(e);
            }
        };

        match outcome {
            StepOutcome::Qc(status) => {
                tracker.report_text(&format!("FastQC status: {}", status), Level::Info);
            }
            StepOutcome::MappedPercent(percent) => {
                if !cached {
                    tracker.report_scalar("Alignment Quality", "Mapped Reads", 0, percent);
                }
                mapped_percent = Some(percent);
            }
            StepOutcome::Completed => {}
        }

        if !cached {
            cache.record(step.name, fingerprint);
            if let Err(e) = cache.save() {
                warn!("Failed to save cache index: {}", e);
            }
        }
    }

    tracker.set_parameter(DEMO_IMAGE_PARAM, DEMO_IMAGE_URL);
    tracker.add_tags(&RUN_TAGS);

    println!("Finished genome alignment.");
    Ok(())
}
