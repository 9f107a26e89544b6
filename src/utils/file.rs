use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};

/// Resolves a path against `cwd` unless it is already absolute. Working
/// directory ambiguity is not allowed past this point.
pub fn to_absolute(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

pub fn file_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow!("Failed to stat {}: {}", path.display(), e))?;
    Ok(metadata.len())
}

/// Replaces every `.bam` marker with `.sorted.bam`, mirroring the sort
/// step's derived output naming.
pub fn sorted_bam_path(bam_path: &Path) -> PathBuf {
    PathBuf::from(bam_path.to_string_lossy().replace(".bam", ".sorted.bam"))
}

/// Validates the two pipeline inputs before any step runs.
///
/// # Arguments
/// * `reference` - Absolute path to the reference FASTA.
/// * `reads` - Absolute path to the reads FASTQ.
///
/// # Returns
/// `Ok(())` when both exist non-empty; otherwise an error with the
/// validation message.
pub fn validate_file_inputs(reference: &Path, reads: &Path) -> Result<()> {
    if !reference.exists() || !reads.exists() {
        return Err(anyhow!("Missing input files"));
    }
    if file_size(reference)? == 0 || file_size(reads)? == 0 {
        return Err(anyhow!("Empty input files detected"));
    }
    Ok(())
}

/// Materializes input references as local files. Local paths pass through;
/// remote schemes are rejected until a fetching backend exists.
pub trait ArtifactStore {
    fn local_copy(&self, reference: &str) -> Result<PathBuf>;
}

pub struct LocalArtifactStore {
    pub cwd: PathBuf,
}

impl ArtifactStore for LocalArtifactStore {
    fn local_copy(&self, reference: &str) -> Result<PathBuf> {
        if let Some(rest) = reference.strip_prefix("file://") {
            return Ok(to_absolute(Path::new(rest), &self.cwd));
        }
        if reference.contains("://") {
            return Err(anyhow!("Unsupported remote reference: {}", reference));
        }
        Ok(to_absolute(Path::new(reference), &self.cwd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_absolute_passes_absolute_paths_through() {
        let resolved = to_absolute(Path::new("/data/ref.fasta"), Path::new("/work"));
        assert_eq!(resolved, PathBuf::from("/data/ref.fasta"));
    }

    #[test]
    fn test_to_absolute_joins_relative_paths() {
        let resolved = to_absolute(Path::new("reads.fastq"), Path::new("/work"));
        assert_eq!(resolved, PathBuf::from("/work/reads.fastq"));
    }

    #[test]
    fn test_sorted_bam_path_derivation() {
        let sorted = sorted_bam_path(Path::new("/run/alignment.bam"));
        assert_eq!(
            sorted,
            PathBuf::from("/run/alignment.sorted.bam"),
            "Sort output should swap .bam for .sorted.bam"
        );
    }

    #[test]
    fn test_validate_file_inputs_accepts_nonempty_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let reference = dir.path().join("ref.fasta");
        let reads = dir.path().join("reads.fastq");
        std::fs::write(&reference, ">chr1\nACGT\n")?;
        std::fs::write(&reads, "@r1\nACGT\n+\nIIII\n")?;
        validate_file_inputs(&reference, &reads)
    }

    #[test]
    fn test_validate_file_inputs_rejects_missing_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let reference = dir.path().join("ref.fasta");
        let reads = dir.path().join("reads.fastq");
        std::fs::write(&reference, ">chr1\nACGT\n")?;

        let err = validate_file_inputs(&reference, &reads)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Missing input files");
        Ok(())
    }

    #[test]
    fn test_validate_file_inputs_rejects_empty_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let reference = dir.path().join("ref.fasta");
        let reads = dir.path().join("reads.fastq");
        std::fs::write(&reference, "")?;
        std::fs::write(&reads, "@r1\nACGT\n+\nIIII\n")?;

        let err = validate_file_inputs(&reference, &reads)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Empty input files detected");
        Ok(())
    }

    #[test]
    fn test_local_store_resolves_relative_reference() -> Result<()> {
        let store = LocalArtifactStore {
            cwd: PathBuf::from("/work"),
        };
        assert_eq!(
            store.local_copy("./NC_000913.3.fasta")?,
            PathBuf::from("/work/./NC_000913.3.fasta")
        );
        Ok(())
    }

    #[test]
    fn test_local_store_strips_file_scheme() -> Result<()> {
        let store = LocalArtifactStore {
            cwd: PathBuf::from("/work"),
        };
        assert_eq!(
            store.local_copy("file:///data/ref.fasta")?,
            PathBuf::from("/data/ref.fasta")
        );
        Ok(())
    }

    #[test]
    fn test_local_store_rejects_remote_schemes() {
        let store = LocalArtifactStore {
            cwd: PathBuf::from("/work"),
        };
        let err = store
            .local_copy("https://example.com/ref.fasta")
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(
            err.contains("Unsupported remote reference"),
            "Remote schemes should be rejected: {}",
            err
        );
    }
}
