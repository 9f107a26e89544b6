//! Mapping statistics text parsing

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MAPPED_PERCENT_RE: Regex = Regex::new(r"(\d+\.\d+)%").unwrap();
}

/// Extracts the mapped-read percentage from `samtools flagstat` output.
///
/// Takes the first line containing the substring "mapped (" and pulls the
/// first decimal percentage out of it. Flagstat output also carries a
/// "primary mapped (" line that the substring matches; the overall mapped
/// line comes first and wins. A format change upstream that reorders these
/// lines would silently change which percentage is read.
///
/// # Arguments
/// * `output` - Full flagstat stdout text.
///
/// # Returns
/// The mapped percentage as a float in 0.0 to 100.0.
pub fn mapped_percent_from_flagstat(output: &str) -> Result<f64> {
    let mapped_line = output
        .lines()
        .find(|line| line.contains("mapped ("))
        .ok_or_else(|| anyhow!("No line containing 'mapped (' in flagstat output"))?;

    let matched = MAPPED_PERCENT_RE
        .captures(mapped_line)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| anyhow!("No percentage found in mapped line: {}", mapped_line))?;

    matched
        .as_str()
        .parse()
        .map_err(|e| anyhow!("Failed to parse mapped percentage '{}': {}", matched.as_str(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_percentage_from_mapped_line() -> Result<()> {
        let percent = mapped_percent_from_flagstat("5000 + 0 mapped (92.34% : N/A)")?;
        assert_eq!(percent, 92.34, "Should extract 92.34 from the mapped line");
        Ok(())
    }

    #[test]
    fn test_first_mapped_line_wins() -> Result<()> {
        let output = "\
16000 + 0 in total (QC-passed reads + QC-failed reads)
15800 + 0 primary
200 + 0 secondary
0 + 0 supplementary
0 + 0 duplicates
15220 + 0 mapped (95.12% : N/A)
14978 + 0 primary mapped (94.80% : N/A)
0 + 0 paired in sequencing
";
        let percent = mapped_percent_from_flagstat(output)?;
        assert_eq!(
            percent, 95.12,
            "The overall mapped line precedes primary mapped and must win"
        );
        Ok(())
    }

    #[test]
    fn test_full_percentage() -> Result<()> {
        let percent = mapped_percent_from_flagstat("16 + 0 mapped (100.00% : N/A)")?;
        assert_eq!(percent, 100.0);
        Ok(())
    }

    #[test]
    fn test_errors_without_mapped_line() {
        let err = mapped_percent_from_flagstat("100 + 0 in total\n100 + 0 primary\n")
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(
            err.contains("No line containing 'mapped ('"),
            "Should report the missing mapped line: {}",
            err
        );
    }

    #[test]
    fn test_errors_when_percentage_absent() {
        let err = mapped_percent_from_flagstat("0 + 0 mapped (N/A : N/A)")
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(
            err.contains("No percentage found in mapped line"),
            "N/A percentages should not parse: {}",
            err
        );
    }
}
