use csv::Writer;
use std::fs::File;
use std::path::Path;

use crate::findings::{Finding, FindingDetails};

pub fn write_csv(path: &Path, findings: &[Finding]) -> anyhow::Result<()> {
    let f = File::create(path)?;
    let mut w = Writer::from_writer(f);
    w.write_record(["severity", "category", "title", "url", "description", "recommendation", "details"])?;
    for finding in findings {
        let details = match &finding.details {
            FindingDetails::None => String::new(),
            other => serde_json::to_string(other)?,
        };
        w.write_record([
            finding.severity.label(),
            finding.category.as_str(),
            finding.title.as_str(),
            finding.url.as_deref().unwrap_or_default(),
            finding.description.as_str(),
            finding.recommendation.as_deref().unwrap_or_default(),
            details.as_str(),
        ])?;
    }
    w.flush()?;
    Ok(())
}
