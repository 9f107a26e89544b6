use clap::Parser;
use crate::config::defs::{DEFAULT_READS, DEFAULT_REFERENCE};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "genovar-pipelines", version = "1.5")]
pub struct Arguments {

    #[arg(short, long, default_value = "genome_alignment")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'r', long = "reference", default_value = DEFAULT_REFERENCE, help = "Genome reference FASTA, as a local path or file:// reference")]
    pub reference: String,

    #[arg(short = 'i', long = "reads", default_value = DEFAULT_READS, help = "Sequencing reads FASTQ, as a local path or file:// reference")]
    pub reads: String,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named '<reads_base>_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(long, action, help = "Ignore cached step results and re-run every step")]
    pub no_cache: bool,
}
