use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::http_client::fetch;

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    common_name: Option<String>,
    name_value: Option<String>,
}

/// Certificate-transparency names for `domain`, restricted to direct
/// subdomains (`<label>.<domain>`).
pub async fn crtsh_subdomains(client: &Client, domain: &str, max_bytes: usize) -> Result<Vec<String>> {
    let q = format!("%.{}", domain);
    let url = format!("https://crt.sh/?q={}&output=json", urlencoding::encode(&q));
    tracing::debug!(domain, "querying crt.sh");

    let page = fetch(client, &url, max_bytes).await?;
    if page.status != 200 {
        return Ok(Vec::new());
    }
    // crt.sh sometimes answers with an HTML error page
    let subdomains = parse_crtsh(&page.body, domain)?;
    tracing::info!(domain, count = subdomains.len(), "crt.sh subdomains");
    Ok(subdomains)
}

pub fn parse_crtsh(body: &str, domain: &str) -> Result<Vec<String>> {
    let entries: Vec<CrtShEntry> = serde_json::from_str(body)?;
    let mut out = BTreeSet::new();
    for entry in entries {
        let names = entry
            .common_name
            .into_iter()
            .chain(entry.name_value.into_iter().flat_map(|nv| {
                nv.split('\n').map(|s| s.to_string()).collect::<Vec<_>>()
            }));
        for name in names {
            let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
            if is_direct_subdomain(&name, domain) {
                out.insert(name);
            }
        }
    }
    Ok(out.into_iter().collect())
}

/// `api.example.com` is direct; `a.b.example.com`, wildcards and the apex are not.
pub fn is_direct_subdomain(name: &str, domain: &str) -> bool {
    match name.strip_suffix(&format!(".{}", domain)) {
        Some(label) => !label.is_empty() && !label.contains('.') && !label.contains('*') && crate::utils::is_valid_hostname(label),
        None => false,
    }
}
