//! Functions and structs for building and running external tool command lines

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use anyhow::{anyhow, Result};
use tokio::process::Command;
use crate::config::defs::{PipelineError, REQUIRED_TOOLS, WHICH_TAG};

/// A fully-resolved external tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub tool: String,
    pub args: Vec<String>,
    /// When set, the child's stdout is written to this file instead of being
    /// captured in memory; `ToolOutput::stdout` is then empty.
    pub stdout_to: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes tool invocations. The pipeline only ever talks to external
/// binaries through this trait, so tests can substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion, blocking the pipeline until it exits.
    /// stderr is always captured; stdout goes to `cmd.stdout_to` if set and
    /// is captured otherwise.
    fn run(&self, cmd: &ToolCommand) -> impl Future<Output = Result<ToolOutput>> + Send;
}

/// Spawns real child processes.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        let mut command = Command::new(&cmd.tool);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());

        match &cmd.stdout_to {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?;
                command.stdout(Stdio::from(file));
            }
            None => {
                command.stdout(Stdio::piped());
            }
        }

        let output = command
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is {} installed?", cmd.tool, e, cmd.tool))?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub mod fastqc {
    use std::path::Path;

    /// `--extract` unpacks the report archive so the text summary can be
    /// read back afterwards; `-o` points at the report file's directory.
    pub fn arg_generator(fastq_path: &Path, report_dir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(fastq_path.to_string_lossy().to_string());
        args_vec.push("--extract".to_string());
        args_vec.push("-o".to_string());
        args_vec.push(report_dir.to_string_lossy().to_string());
        args_vec
    }
}

pub mod minimap2 {
    use std::path::Path;

    /// Short-read preset; the SAM stream comes out on stdout.
    pub fn arg_generator(fasta_path: &Path, fastq_path: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-ax".to_string());
        args_vec.push("sr".to_string());
        args_vec.push(fasta_path.to_string_lossy().to_string());
        args_vec.push(fastq_path.to_string_lossy().to_string());
        args_vec
    }
}

pub mod samtools {
    use std::path::PathBuf;
    use crate::config::defs::SamtoolsSubcommand;

    pub struct SamtoolsConfig {
        pub subcommand: SamtoolsSubcommand,
        pub input: PathBuf,
        pub output: Option<PathBuf>,
    }

    pub fn arg_generator(config: &SamtoolsConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match config.subcommand {
            SamtoolsSubcommand::View => {
                args_vec.push("view".to_string());
                args_vec.push("-b".to_string());
            }
            SamtoolsSubcommand::Sort => {
                args_vec.push("sort".to_string());
            }
            SamtoolsSubcommand::Flagstat => {
                args_vec.push("flagstat".to_string());
            }
        }
        args_vec.push(config.input.to_string_lossy().to_string());
        if let Some(output) = &config.output {
            args_vec.push("-o".to_string());
            args_vec.push(output.to_string_lossy().to_string());
        }
        args_vec
    }
}

pub mod freebayes {
    use std::path::Path;

    /// Reference-guided calling; the VCF comes out on stdout.
    pub fn arg_generator(fasta_path: &Path, sorted_bam_path: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-f".to_string());
        args_vec.push(fasta_path.to_string_lossy().to_string());
        args_vec.push(sorted_bam_path.to_string_lossy().to_string());
        args_vec
    }
}

/// Verifies every required external tool resolves on the search path.
///
/// # Arguments
/// * `runner` - Runner used to execute `which` for each tool.
///
/// # Returns
/// `Ok(())` when all tools resolve; `PipelineError::MissingTools` naming
/// every unresolvable tool otherwise. Never memoized; runs on every start.
pub async fn check_dependencies<R: CommandRunner>(runner: &R) -> Result<(), PipelineError> {
    let mut missing: Vec<String> = Vec::new();
    for tool in REQUIRED_TOOLS {
        let cmd = ToolCommand {
            tool: WHICH_TAG.to_string(),
            args: vec![tool.to_string()],
            stdout_to: None,
        };
        let output = runner
            .run(&cmd)
            .await
            .map_err(|e| PipelineError::IOError(e.to_string()))?;
        if !output.success() {
            missing.push(tool.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::MissingTools(missing));
    }
    Ok(())
}
