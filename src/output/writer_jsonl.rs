use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::findings::Finding;

/// Append one JSON object per finding.
pub fn write_jsonl(path: &Path, findings: &[Finding]) -> anyhow::Result<()> {
    let mut f = OpenOptions::new().append(true).create(true).open(path)?;
    for finding in findings {
        let line = serde_json::to_string(finding)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
    }
    Ok(())
}
