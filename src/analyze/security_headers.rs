use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;

use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};

/// Minimum accepted HSTS max-age (six months).
pub const HSTS_MIN_MAX_AGE: u64 = 15_768_000;

struct HeaderRule {
    name: &'static str,
    /// Alternative header names that satisfy the rule.
    aliases: &'static [&'static str],
    severity: Severity,
    title: &'static str,
    description: &'static str,
    recommendation: &'static str,
}

const HEADER_RULES: &[HeaderRule] = &[
    HeaderRule {
        name: "strict-transport-security",
        aliases: &[],
        severity: Severity::High,
        title: "Missing Strict-Transport-Security header",
        description: "Without HSTS, browsers may connect over plain HTTP and expose users to downgrade attacks.",
        recommendation: "Add 'Strict-Transport-Security: max-age=31536000; includeSubDomains'.",
    },
    HeaderRule {
        name: "content-security-policy",
        aliases: &[],
        severity: Severity::High,
        title: "Missing Content-Security-Policy header",
        description: "No Content-Security-Policy restricts where scripts may load from, increasing XSS impact.",
        recommendation: "Define a Content-Security-Policy that allow-lists script and frame sources.",
    },
    HeaderRule {
        name: "x-content-type-options",
        aliases: &[],
        severity: Severity::Medium,
        title: "Missing X-Content-Type-Options header",
        description: "Browsers may MIME-sniff responses into executable content types.",
        recommendation: "Add 'X-Content-Type-Options: nosniff'.",
    },
    HeaderRule {
        name: "x-frame-options",
        aliases: &[],
        severity: Severity::Medium,
        title: "Missing X-Frame-Options header",
        description: "Pages can be framed by other origins, enabling clickjacking.",
        recommendation: "Add 'X-Frame-Options: DENY' or a CSP frame-ancestors directive.",
    },
    HeaderRule {
        name: "x-xss-protection",
        aliases: &[],
        severity: Severity::Low,
        title: "Missing X-XSS-Protection header",
        description: "Legacy browsers fall back to their default reflected-XSS behaviour.",
        recommendation: "Add 'X-XSS-Protection: 0' or '1; mode=block' alongside a strong CSP.",
    },
    HeaderRule {
        name: "referrer-policy",
        aliases: &[],
        severity: Severity::Low,
        title: "Missing Referrer-Policy header",
        description: "Full URLs, including query strings, may leak to third parties through the Referer header.",
        recommendation: "Add 'Referrer-Policy: strict-origin-when-cross-origin'.",
    },
    HeaderRule {
        name: "permissions-policy",
        aliases: &["feature-policy"],
        severity: Severity::Low,
        title: "Missing Permissions-Policy header",
        description: "Powerful browser features (camera, geolocation, microphone) are not restricted.",
        recommendation: "Add a Permissions-Policy that disables features the site does not use.",
    },
];

static MAX_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)max-age\s*=\s*(\d+)").unwrap());
static VERSION_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(\.\d+)+").unwrap());

pub struct HeaderProbe;

#[async_trait]
impl Probe for HeaderProbe {
    fn name(&self) -> &'static str {
        "headers"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let url = ctx.target.base_url.to_string();
        let page = ctx
            .fetch(&url)
            .await
            .with_context(|| format!("fetching {}", url))?;
        Ok(analyze_headers(&page.url, &page.headers))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_finding(url: &str, severity: Severity, title: String, description: String, header: &str, value: Option<&str>) -> Finding {
    Finding::new(Category::Headers, severity, title, description)
        .with_url(url)
        .with_details(FindingDetails::Header {
            header: header.to_string(),
            value: value.map(|v| v.to_string()),
        })
}

/// Evaluate a response's headers: presence of the security header table,
/// value quality, version disclosure and cookie flags.
pub fn analyze_headers(url: &str, headers: &HeaderMap) -> Vec<Finding> {
    let mut findings = Vec::new();
    let csp = header_str(headers, "content-security-policy");
    let frame_ancestors = csp
        .map(|v| v.to_ascii_lowercase().contains("frame-ancestors"))
        .unwrap_or(false);

    for rule in HEADER_RULES {
        let value = std::iter::once(rule.name)
            .chain(rule.aliases.iter().copied())
            .find_map(|name| header_str(headers, name));

        match value {
            None => {
                if rule.name == "x-frame-options" && frame_ancestors {
                    continue;
                }
                findings.push(
                    header_finding(url, rule.severity, rule.title.to_string(), rule.description.to_string(), rule.name, None)
                        .with_recommendation(rule.recommendation),
                );
            }
            Some(value) => {
                if let Some(f) = check_value(url, rule.name, value, frame_ancestors) {
                    findings.push(f.with_recommendation(rule.recommendation));
                }
            }
        }
    }

    findings.extend(disclosure_findings(url, headers));
    findings.extend(cookie_findings(url, headers));
    findings
}

fn check_value(url: &str, header: &str, value: &str, frame_ancestors: bool) -> Option<Finding> {
    let lower = value.to_ascii_lowercase();
    match header {
        "strict-transport-security" => {
            let max_age = MAX_AGE
                .captures(value)
                .and_then(|c| c[1].parse::<u64>().ok())
                .unwrap_or(0);
            (max_age < HSTS_MIN_MAX_AGE).then(|| {
                header_finding(
                    url,
                    Severity::Medium,
                    "Weak HSTS max-age".to_string(),
                    format!("HSTS max-age is {} seconds, below the recommended minimum of {} (six months).", max_age, HSTS_MIN_MAX_AGE),
                    header,
                    Some(value),
                )
            })
        }
        "content-security-policy" => {
            let both_unsafe = lower.contains("'unsafe-inline'") && lower.contains("'unsafe-eval'");
            let wildcard_script = lower
                .split(';')
                .map(str::trim)
                .filter(|d| d.starts_with("script-src") || d.starts_with("default-src"))
                .any(|d| d.split_whitespace().skip(1).any(|src| src == "*"));
            if both_unsafe || wildcard_script {
                let why = if both_unsafe {
                    "combines 'unsafe-inline' with 'unsafe-eval'"
                } else {
                    "allows scripts from any origin"
                };
                Some(header_finding(
                    url,
                    Severity::Medium,
                    "Weak Content-Security-Policy".to_string(),
                    format!("The Content-Security-Policy {}, which largely defeats XSS protection.", why),
                    header,
                    Some(value),
                ))
            } else {
                None
            }
        }
        "x-content-type-options" => (lower.trim() != "nosniff").then(|| {
            header_finding(
                url,
                Severity::Low,
                "Invalid X-Content-Type-Options value".to_string(),
                format!("X-Content-Type-Options is '{}'; only 'nosniff' is meaningful.", value),
                header,
                Some(value),
            )
        }),
        "x-frame-options" => {
            let valid = matches!(lower.trim(), "deny" | "sameorigin");
            (!valid && !frame_ancestors).then(|| {
                header_finding(
                    url,
                    Severity::Low,
                    "Invalid X-Frame-Options value".to_string(),
                    format!("X-Frame-Options is '{}'; browsers only honour DENY or SAMEORIGIN.", value),
                    header,
                    Some(value),
                )
            })
        }
        "referrer-policy" => lower.contains("unsafe-url").then(|| {
            header_finding(
                url,
                Severity::Low,
                "Permissive Referrer-Policy".to_string(),
                "Referrer-Policy 'unsafe-url' sends the full URL to every destination, including over HTTP.".to_string(),
                header,
                Some(value),
            )
        }),
        _ => None,
    }
}

fn disclosure_findings(url: &str, headers: &HeaderMap) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(server) = header_str(headers, "server") {
        if VERSION_LIKE.is_match(server) {
            findings.push(
                header_finding(
                    url,
                    Severity::Low,
                    "Server version disclosed".to_string(),
                    format!("The Server header reveals software and version: {}", server),
                    "server",
                    Some(server),
                )
                .with_recommendation("Strip version numbers from the Server header."),
            );
        }
    }

    for name in ["x-powered-by", "x-aspnet-version", "x-aspnetmvc-version"] {
        if let Some(value) = header_str(headers, name) {
            findings.push(
                header_finding(
                    url,
                    Severity::Low,
                    format!("Technology disclosed via {}", name),
                    format!("The {} header reveals the backend stack: {}", name, value),
                    name,
                    Some(value),
                )
                .with_recommendation(format!("Remove the {} header.", name)),
            );
        }
    }
    findings
}

fn cookie_findings(url: &str, headers: &HeaderMap) -> Vec<Finding> {
    let mut missing_secure = Vec::new();
    let mut missing_httponly = Vec::new();

    for raw in headers.get_all("set-cookie").iter().filter_map(|v| v.to_str().ok()) {
        let name = raw.split('=').next().unwrap_or("").trim().to_string();
        let attrs: Vec<String> = raw
            .split(';')
            .skip(1)
            .map(|a| a.trim().to_ascii_lowercase())
            .collect();
        if !attrs.iter().any(|a| a == "secure") {
            missing_secure.push(name.clone());
        }
        if !attrs.iter().any(|a| a == "httponly") {
            missing_httponly.push(name);
        }
    }

    let mut findings = Vec::new();
    if !missing_secure.is_empty() {
        findings.push(
            header_finding(
                url,
                Severity::Medium,
                "Cookies without Secure flag".to_string(),
                format!("Cookies may be sent over plain HTTP: {}", missing_secure.join(", ")),
                "set-cookie",
                None,
            )
            .with_recommendation("Set the Secure attribute on every cookie."),
        );
    }
    if !missing_httponly.is_empty() {
        findings.push(
            header_finding(
                url,
                Severity::Low,
                "Cookies without HttpOnly flag".to_string(),
                format!("Cookies are readable from JavaScript: {}", missing_httponly.join(", ")),
                "set-cookie",
                None,
            )
            .with_recommendation("Set HttpOnly on session and authentication cookies."),
        );
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn no_headers_yields_exactly_seven_findings() {
        let findings = analyze_headers("https://example.com/", &HeaderMap::new());
        assert_eq!(findings.len(), 7);
        let sev = |needle: &str| findings.iter().find(|f| f.title.contains(needle)).unwrap().severity;
        assert_eq!(sev("Strict-Transport-Security"), Severity::High);
        assert_eq!(sev("Content-Security-Policy"), Severity::High);
        assert_eq!(sev("X-Content-Type-Options"), Severity::Medium);
        assert_eq!(sev("X-Frame-Options"), Severity::Medium);
        assert_eq!(sev("X-XSS-Protection"), Severity::Low);
        assert_eq!(sev("Referrer-Policy"), Severity::Low);
        assert_eq!(sev("Permissions-Policy"), Severity::Low);
    }

    #[test]
    fn well_configured_site_is_clean() {
        let h = headers(&[
            ("strict-transport-security", "max-age=31536000; includeSubDomains"),
            ("content-security-policy", "default-src 'self'; frame-ancestors 'none'"),
            ("x-content-type-options", "nosniff"),
            ("x-xss-protection", "0"),
            ("referrer-policy", "strict-origin-when-cross-origin"),
            ("feature-policy", "camera 'none'"),
            ("set-cookie", "sid=abc; Secure; HttpOnly; SameSite=Lax"),
        ]);
        assert!(analyze_headers("https://example.com/", &h).is_empty());
    }

    #[test]
    fn weak_values_are_flagged() {
        let h = headers(&[
            ("strict-transport-security", "max-age=300"),
            ("content-security-policy", "script-src 'self' 'unsafe-inline' 'unsafe-eval'"),
            ("x-content-type-options", "sniff"),
            ("x-frame-options", "ALLOW-FROM https://a.example"),
            ("x-xss-protection", "1"),
            ("referrer-policy", "unsafe-url"),
            ("permissions-policy", "geolocation=()"),
            ("server", "nginx/1.18.0"),
            ("x-powered-by", "PHP/7.4.3"),
        ]);
        let findings = analyze_headers("https://example.com/", &h);
        let titles: Vec<&str> = findings.iter().map(|f| f.title.as_str()).collect();
        assert!(titles.contains(&"Weak HSTS max-age"));
        assert!(titles.contains(&"Weak Content-Security-Policy"));
        assert!(titles.contains(&"Invalid X-Content-Type-Options value"));
        assert!(titles.contains(&"Invalid X-Frame-Options value"));
        assert!(titles.contains(&"Permissive Referrer-Policy"));
        assert!(titles.contains(&"Server version disclosed"));
        assert!(titles.contains(&"Technology disclosed via x-powered-by"));
    }

    #[test]
    fn bare_server_name_is_not_a_disclosure() {
        let h = headers(&[("server", "cloudflare")]);
        let findings = analyze_headers("https://example.com/", &h);
        assert!(!findings.iter().any(|f| f.title == "Server version disclosed"));
    }

    #[test]
    fn insecure_cookies_are_reported_once_per_flag() {
        let h = headers(&[("set-cookie", "a=1; Path=/"), ("set-cookie", "b=2; HttpOnly")]);
        let findings = analyze_headers("https://example.com/", &h);
        let secure = findings.iter().find(|f| f.title == "Cookies without Secure flag").unwrap();
        assert!(secure.description.contains("a, b"));
        let httponly = findings.iter().find(|f| f.title == "Cookies without HttpOnly flag").unwrap();
        assert!(httponly.description.ends_with(": a"));
    }
}
