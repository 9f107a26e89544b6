use std::fmt;
use std::path::PathBuf;
use crate::cli::Arguments;

// External software
pub const WHICH_TAG: &str = "which";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const MINIMAP2_TAG: &str = "minimap2";
pub const FASTQC_TAG: &str = "fastqc";
pub const FREEBAYES_TAG: &str = "freebayes";

// Checked in this order; missing tools are reported in this order too.
pub const REQUIRED_TOOLS: [&str; 4] = [SAMTOOLS_TAG, MINIMAP2_TAG, FASTQC_TAG, FREEBAYES_TAG];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
    Flagstat,
    Sort,
}

// Static Filenames
pub const FASTQC_REPORT_FILENAME: &str = "fastqc_report.txt";
pub const SAM_FILENAME: &str = "alignment.sam";
pub const BAM_FILENAME: &str = "alignment.bam";
pub const MAPPING_STATS_FILENAME: &str = "mapping_stats.txt";
pub const VCF_FILENAME: &str = "variants.vcf";
pub const CACHE_INDEX_FILENAME: &str = ".step_cache.tsv";
pub const TRACKING_LOG_FILENAME: &str = "run_tracking.log";

// Static Parameters
pub const MIN_MAPPED_PERCENT: f64 = 90.0;
pub const TRACKING_PROJECT: &str = "Genomics Workflows";
pub const TRACKING_TASK: &str = "Genome Alignment Pipeline";
pub const DEMO_IMAGE_PARAM: &str = "General/demo_image";
pub const DEMO_IMAGE_URL: &str = "https://example.com/genomics-pipeline-flow.png";
pub const RUN_TAGS: [&str; 3] = ["genomics", "alignment", "variant-calling"];

pub const DEFAULT_REFERENCE: &str = "./NC_000913.3.fasta";
pub const DEFAULT_READS: &str = "./SRR33637628.fastq";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QcStatus {
    Pass,
    Fail,
}

impl fmt::Display for QcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcStatus::Pass => write!(f, "PASS"),
            QcStatus::Fail => write!(f, "FAIL"),
        }
    }
}

pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
}

#[derive(Debug)]
pub enum PipelineError {
    InvalidConfig(String),
    MissingTools(Vec<String>),
    InvalidInput {
        step: String,
        message: String,
    },
    ToolExecution {
        step: String,
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    OutputValidation {
        step: String,
        path: PathBuf,
        message: String,
        stderr: String,
    },
    MetricParse {
        step: String,
        message: String,
    },
    IOError(String),
    Other(anyhow::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidConfig(message) => write!(f, "{}", message),
            PipelineError::MissingTools(tools) => {
                write!(f, "Missing required tools: {}", tools.join(", "))
            }
            PipelineError::InvalidInput { message, .. } => write!(f, "{}", message),
            PipelineError::ToolExecution {
                tool,
                exit_code,
                stderr,
                ..
            } => {
                match exit_code {
                    Some(code) => write!(f, "{} returned non-zero exit status {}", tool, code)?,
                    None => write!(f, "{} terminated by signal", tool)?,
                }
                if !stderr.is_empty() {
                    write!(f, "\nSTDERR: {}", stderr)?;
                }
                Ok(())
            }
            PipelineError::OutputValidation {
                message, stderr, ..
            } => {
                write!(f, "{}", message)?;
                if !stderr.is_empty() {
                    write!(f, "\nSTDERR: {}", stderr)?;
                }
                Ok(())
            }
            PipelineError::MetricParse { message, .. } => write!(f, "{}", message),
            PipelineError::IOError(message) => write!(f, "IO error: {}", message),
            PipelineError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tools_display() {
        let err = PipelineError::MissingTools(vec!["fastqc".to_string(), "freebayes".to_string()]);
        assert_eq!(
            err.to_string(),
            "Missing required tools: fastqc, freebayes",
            "Missing-tool message should name every missing tool in check order"
        );
    }

    #[test]
    fn test_tool_execution_display_includes_stderr() {
        let err = PipelineError::ToolExecution {
            step: "alignment".to_string(),
            tool: MINIMAP2_TAG.to_string(),
            exit_code: Some(1),
            stderr: "failed to open file".to_string(),
        };
        let rendered = err.to_string();
        assert!(
            rendered.contains("minimap2 returned non-zero exit status 1"),
            "Should name the tool and exit code: {}",
            rendered
        );
        assert!(
            rendered.contains("STDERR: failed to open file"),
            "Should carry captured stderr: {}",
            rendered
        );
    }

    #[test]
    fn test_output_validation_display_without_stderr() {
        let err = PipelineError::OutputValidation {
            step: "sam_to_bam".to_string(),
            path: PathBuf::from("/tmp/alignment.bam"),
            message: "Empty BAM file generated".to_string(),
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "Empty BAM file generated",
            "Empty stderr should not add an STDERR suffix"
        );
    }

    #[test]
    fn test_qc_status_display() {
        assert_eq!(QcStatus::Pass.to_string(), "PASS");
        assert_eq!(QcStatus::Fail.to_string(), "FAIL");
    }
}
