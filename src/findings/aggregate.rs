use std::collections::HashSet;

use super::{Category, Finding, FindingDetails};

/// Concatenate probe outputs in order and collapse repeated secret leaks.
pub fn aggregate<I>(batches: I) -> Vec<Finding>
where
    I: IntoIterator<Item = Vec<Finding>>,
{
    dedup_secrets(batches.into_iter().flatten().collect())
}

/// Dedup key for a secrets finding: the title plus the masked value, or the
/// affected URL when no masked value is attached.
pub fn secret_key(finding: &Finding) -> (String, String) {
    let discriminator = match &finding.details {
        FindingDetails::Secret { masked_value, .. } => masked_value.clone(),
        _ => finding.url.clone().unwrap_or_default(),
    };
    (finding.title.clone(), discriminator)
}

/// Keeps the first occurrence of every secrets finding key. Other categories
/// pass through untouched and in order.
pub fn dedup_secrets(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    findings
        .into_iter()
        .filter(|f| f.category != Category::Secrets || seen.insert(secret_key(f)))
        .collect()
}
