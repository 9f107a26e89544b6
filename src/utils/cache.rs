//! Content-fingerprint step cache
//!
//! A step's fingerprint covers its full command lines plus the contents of
//! every input artifact. The index persists between runs as a TSV file in
//! the run directory, so an unchanged re-run skips tool invocations.

use std::collections::HashMap;
use std::hash::Hasher;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use fxhash::FxHasher;
use log::warn;
use crate::utils::command::ToolCommand;

pub struct StepCache {
    index_path: PathBuf,
    entries: HashMap<String, u64>,
}

impl StepCache {
    /// Loads the index if present; a missing file is an empty cache.
    pub fn load(index_path: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        if index_path.exists() {
            let text = std::fs::read_to_string(index_path).map_err(|e| {
                anyhow!("Failed to read cache index {}: {}", index_path.display(), e)
            })?;
            for line in text.lines() {
                let mut fields = line.splitn(2, '\t');
                match (fields.next(), fields.next()) {
                    (Some(step), Some(hex)) => match u64::from_str_radix(hex, 16) {
                        Ok(fingerprint) => {
                            entries.insert(step.to_string(), fingerprint);
                        }
                        Err(_) => warn!("Skipping malformed cache line: {}", line),
                    },
                    _ => warn!("Skipping malformed cache line: {}", line),
                }
            }
        }
        Ok(StepCache {
            index_path: index_path.to_path_buf(),
            entries,
        })
    }

    /// Hashes every command line and the contents of every input file.
    /// NUL separators keep token and file boundaries distinct in the hash.
    pub fn fingerprint(commands: &[ToolCommand], inputs: &[PathBuf]) -> Result<u64> {
        let mut hasher = FxHasher::default();
        for command in commands {
            hasher.write(command.tool.as_bytes());
            hasher.write_u8(0);
            for arg in &command.args {
                hasher.write(arg.as_bytes());
                hasher.write_u8(0);
            }
        }
        let mut buffer = [0u8; 65536];
        for input in inputs {
            let mut file = std::fs::File::open(input).map_err(|e| {
                anyhow!("Failed to open {} for fingerprinting: {}", input.display(), e)
            })?;
            loop {
                let n = file.read(&mut buffer).map_err(|e| {
                    anyhow!("Failed to read {} for fingerprinting: {}", input.display(), e)
                })?;
                if n == 0 {
                    break;
                }
                hasher.write(&buffer[..n]);
            }
            hasher.write_u8(0);
        }
        Ok(hasher.finish())
    }

    /// A hit needs both a matching fingerprint and every declared output
    /// still on disk non-empty; a deleted artifact forces a re-run.
    pub fn is_fresh(&self, step: &str, fingerprint: u64, outputs: &[PathBuf]) -> bool {
        match self.entries.get(step) {
            Some(stored) if *stored == fingerprint => outputs
                .iter()
                .all(|path| std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)),
            _ => false,
        }
    }

    pub fn record(&mut self, step: &str, fingerprint: u64) {
        self.entries.insert(step.to_string(), fingerprint);
    }

    /// Drops entries for the given steps. The caller passes the step about
    /// to execute plus everything downstream of it.
    pub fn invalidate(&mut self, steps: &[&str]) {
        for step in steps {
            self.entries.remove(*step);
        }
    }

    /// Atomically rewrites the index (temp file in the same directory, then
    /// rename over the old one).
    pub fn save(&self) -> Result<()> {
        let parent = self.index_path.parent().ok_or_else(|| {
            anyhow!(
                "Cache index {} has no parent directory",
                self.index_path.display()
            )
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| anyhow!("Failed to create temp cache file: {}", e))?;
        let mut lines: Vec<(&String, &u64)> = self.entries.iter().collect();
        lines.sort();
        for (step, fingerprint) in lines {
            writeln!(tmp, "{}\t{:016x}", step, fingerprint)
                .map_err(|e| anyhow!("Failed to write cache index: {}", e))?;
        }
        tmp.persist(&self.index_path)
            .map_err(|e| anyhow!("Failed to persist cache index: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(tool: &str, args: &[&str]) -> ToolCommand {
        ToolCommand {
            tool: tool.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdout_to: None,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("reads.fastq");
        std::fs::write(&input, "@r1\nACGT\n+\nIIII\n")?;

        let commands = vec![command("minimap2", &["-ax", "sr"])];
        let inputs = vec![input];
        let first = StepCache::fingerprint(&commands, &inputs)?;
        let second = StepCache::fingerprint(&commands, &inputs)?;
        assert_eq!(first, second, "Same commands and bytes must hash identically");
        Ok(())
    }

    #[test]
    fn test_fingerprint_tracks_file_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("reads.fastq");
        std::fs::write(&input, "@r1\nACGT\n+\nIIII\n")?;

        let commands = vec![command("minimap2", &["-ax", "sr"])];
        let inputs = vec![input.clone()];
        let before = StepCache::fingerprint(&commands, &inputs)?;
        std::fs::write(&input, "@r1\nTTTT\n+\nIIII\n")?;
        let after = StepCache::fingerprint(&commands, &inputs)?;
        assert_ne!(before, after, "Changed input bytes must change the fingerprint");
        Ok(())
    }

    #[test]
    fn test_fingerprint_tracks_arguments() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("reads.fastq");
        std::fs::write(&input, "@r1\nACGT\n+\nIIII\n")?;

        let inputs = vec![input];
        let sr = StepCache::fingerprint(&[command("minimap2", &["-ax", "sr"])], &inputs)?;
        let ont = StepCache::fingerprint(&[command("minimap2", &["-ax", "map-ont"])], &inputs)?;
        assert_ne!(sr, ont, "Changed argument list must change the fingerprint");
        Ok(())
    }

    #[test]
    fn test_freshness_requires_outputs_on_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = dir.path().join(".step_cache.tsv");
        let output = dir.path().join("alignment.sam");

        let mut cache = StepCache::load(&index)?;
        cache.record("alignment", 42);

        assert!(
            !cache.is_fresh("alignment", 42, &[output.clone()]),
            "Missing output must not count as fresh"
        );
        std::fs::write(&output, "")?;
        assert!(
            !cache.is_fresh("alignment", 42, &[output.clone()]),
            "Empty output must not count as fresh"
        );
        std::fs::write(&output, "@HD\tVN:1.6\n")?;
        assert!(
            cache.is_fresh("alignment", 42, &[output.clone()]),
            "Matching fingerprint with non-empty output is fresh"
        );
        assert!(
            !cache.is_fresh("alignment", 43, &[output]),
            "Different fingerprint must miss"
        );
        Ok(())
    }

    #[test]
    fn test_save_and_reload_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = dir.path().join(".step_cache.tsv");

        let mut cache = StepCache::load(&index)?;
        cache.record("fastqc_check", 7);
        cache.record("alignment", 1234567890);
        cache.save()?;

        let reloaded = StepCache::load(&index)?;
        let output = dir.path().join("marker.txt");
        std::fs::write(&output, "x")?;
        assert!(
            reloaded.is_fresh("fastqc_check", 7, &[output.clone()]),
            "Reloaded index should preserve entries"
        );
        assert!(
            reloaded.is_fresh("alignment", 1234567890, &[output]),
            "Reloaded index should preserve all entries"
        );
        Ok(())
    }

    #[test]
    fn test_invalidate_drops_named_steps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = dir.path().join(".step_cache.tsv");
        let output = dir.path().join("marker.txt");
        std::fs::write(&output, "x")?;

        let mut cache = StepCache::load(&index)?;
        cache.record("alignment", 1);
        cache.record("sam_to_bam", 2);
        cache.record("flagstat", 3);
        cache.invalidate(&["sam_to_bam", "flagstat"]);

        assert!(
            cache.is_fresh("alignment", 1, &[output.clone()]),
            "Upstream entry should survive invalidation"
        );
        assert!(
            !cache.is_fresh("sam_to_bam", 2, &[output.clone()]),
            "Invalidated entry must miss"
        );
        assert!(
            !cache.is_fresh("flagstat", 3, &[output]),
            "Downstream entry must miss after invalidation"
        );
        Ok(())
    }

    #[test]
    fn test_load_skips_malformed_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = dir.path().join(".step_cache.tsv");
        std::fs::write(&index, "alignment\t000000000000002a\nnot a valid line\nflagstat\tzzzz\n")?;

        let cache = StepCache::load(&index)?;
        let output = dir.path().join("marker.txt");
        std::fs::write(&output, "x")?;
        assert!(
            cache.is_fresh("alignment", 42, &[output]),
            "Well-formed entries should load despite malformed neighbors"
        );
        Ok(())
    }
}
