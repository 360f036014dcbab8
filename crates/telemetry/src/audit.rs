//! Audit reports for pipeline runs.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Append a JSON report line to the audit file.
///
/// # Arguments
/// * `path` - Path to the audit file, created if missing
/// * `payload` - Serializable payload to write
pub fn append_report<P: AsRef<Path>, T: Serialize>(path: P, payload: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(payload)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{}", json)?;
    info!("Wrote run report to {:?}", path.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        processed: usize,
    }

    #[test]
    fn test_appends_one_line_per_report() {
        let path = std::env::temp_dir().join(format!("dropout-audit-{}.jsonl", std::process::id()));
        std::fs::remove_file(&path).ok();

        append_report(&path, &Sample { processed: 1 }).unwrap();
        append_report(&path, &Sample { processed: 2 }).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![r#"{"processed":1}"#, r#"{"processed":2}"#]);
    }
}
