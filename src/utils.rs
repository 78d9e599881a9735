use std::fs;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Accepts `example.com`, `https://example.com/path` or `Example.COM.` and
/// returns the bare lowercase host. `None` when nothing host-like remains.
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let host = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        url::Url::parse(trimmed).ok()?.host_str()?.to_string()
    } else {
        trimmed.split(['/', '?', '#']).next()?.split(':').next()?.to_string()
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if is_valid_hostname(&host) { Some(host) } else { None }
}

pub fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// True when `host` is `domain` itself or one of its subdomains.
pub fn host_in_scope(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// True when `url` parses and its host is in scope for `domain`.
pub fn url_in_scope(url: &str, domain: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| host_in_scope(h, domain)))
        .unwrap_or(false)
}

/// Strip a leading `www.` for DNS records that live at the registrable name.
pub fn apex_domain(domain: &str) -> &str {
    domain.strip_prefix("www.").unwrap_or(domain)
}
