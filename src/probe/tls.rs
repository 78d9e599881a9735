use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use super::{Probe, ProbeContext};
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::http_client::build_strict_client;

/// HTTPS reachability with certificate validation, plus the plain-HTTP
/// redirect check.
pub struct TlsProbe;

#[async_trait]
impl Probe for TlsProbe {
    fn name(&self) -> &'static str {
        "tls"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let https_url = ctx.target.base_url.to_string();

        let strict = build_strict_client(&ctx.config)?;
        match strict.get(&https_url).send().await {
            Ok(resp) => {
                tracing::debug!(url = %https_url, status = resp.status().as_u16(), "https reachable");
            }
            Err(e) => {
                let chain = error_chain(&e);
                tracing::debug!(url = %https_url, error = %chain, "https request failed");
                findings.push(classify_transport_error(&https_url, &chain, e.is_timeout()));
            }
        }

        let http_url = ctx.target.http_url();
        ctx.pacer().wait_url(&http_url).await;
        match ctx.no_redirect_client.get(&http_url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let location = resp
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());
                if let Some(f) = classify_http_redirect(&http_url, status, location.as_deref()) {
                    findings.push(f);
                }
            }
            Err(e) => {
                tracing::debug!(url = %http_url, error = %e, "plain http not reachable");
            }
        }

        Ok(findings)
    }
}

/// Flatten an error and its sources into one lowercase string.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ").to_ascii_lowercase()
}

/// `error` lowercased, with the request URL and its host blanked out so a
/// hostname like `ssl-shop.example` cannot look like a TLS failure.
fn scrub_target(url: &str, error: &str) -> String {
    let mut text = error.to_ascii_lowercase();
    let url = url.to_ascii_lowercase();
    text = text.replace(&url, " ");
    text = text.replace(url.trim_end_matches('/'), " ");
    if let Some(host) = Url::parse(&url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        text = text.replace(&host, " ");
    }
    text
}

/// Map a failed HTTPS request to a finding. Timeouts are informational since
/// they say nothing about the TLS setup.
pub fn classify_transport_error(url: &str, error: &str, timed_out: bool) -> Finding {
    let details = FindingDetails::Transport {
        error: Some(error.to_string()),
        status: None,
        location: None,
    };
    let lower = scrub_target(url, error);

    if timed_out || lower.contains("timed out") || lower.contains("timeout") {
        return Finding::new(
            Category::Tls,
            Severity::Info,
            "HTTPS check could not be performed",
            "The HTTPS request timed out, so certificate validity could not be verified.",
        )
        .with_url(url)
        .with_details(details);
    }

    let cert_markers = ["certificate", "unknownissuer", "notvalidforname", "expired", "self signed", "self-signed"];
    if cert_markers.iter().any(|m| lower.contains(m)) {
        return Finding::new(
            Category::Tls,
            Severity::Critical,
            "Invalid TLS certificate",
            "The server presented a certificate that failed validation (expired, self-signed, untrusted issuer or wrong hostname).",
        )
        .with_url(url)
        .with_recommendation("Install a valid certificate from a trusted CA covering this hostname and automate renewal.")
        .with_details(details);
    }

    if ["handshake", "tls", "ssl", "alert"].iter().any(|m| lower.contains(m)) {
        return Finding::new(
            Category::Tls,
            Severity::Critical,
            "TLS handshake failed",
            "A TLS session could not be negotiated with the server.",
        )
        .with_url(url)
        .with_recommendation("Enable TLS 1.2 or 1.3 with modern cipher suites.")
        .with_details(details);
    }

    Finding::new(
        Category::Tls,
        Severity::Critical,
        "Site not reachable over HTTPS",
        "The site did not accept HTTPS connections.",
    )
    .with_url(url)
    .with_recommendation("Serve the site over HTTPS on port 443.")
    .with_details(details)
}

/// Judge the plain-HTTP response. Only a redirect to an `https://` location
/// is acceptable; relative locations stay on HTTP.
pub fn classify_http_redirect(url: &str, status: u16, location: Option<&str>) -> Option<Finding> {
    let details = FindingDetails::Transport {
        error: None,
        status: Some(status),
        location: location.map(|s| s.to_string()),
    };
    match status {
        300..=399 => {
            let target = location.unwrap_or("");
            if target.to_ascii_lowercase().starts_with("https://") {
                None
            } else {
                Some(
                    Finding::new(
                        Category::Tls,
                        Severity::High,
                        "HTTP does not redirect to HTTPS",
                        format!("Plain HTTP redirects to '{}', which is not an HTTPS location.", target),
                    )
                    .with_url(url)
                    .with_recommendation("Redirect every plain HTTP request to its HTTPS equivalent with a 301.")
                    .with_details(details),
                )
            }
        }
        200..=299 => Some(
            Finding::new(
                Category::Tls,
                Severity::High,
                "No HTTP to HTTPS redirect",
                "The site serves content over unencrypted HTTP instead of redirecting to HTTPS.",
            )
            .with_url(url)
            .with_recommendation("Redirect every plain HTTP request to its HTTPS equivalent with a 301 and enable HSTS.")
            .with_details(details),
        ),
        _ => None,
    }
}
