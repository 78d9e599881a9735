use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use url::Url;

use crate::discover::crawler::extract_script_sources;
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};
use crate::utils::{host_in_scope, url_in_scope};

/// Framework debug pages: the whole request context is on display.
const DEBUG_SIGNATURES: &[(&str, &str)] = &[
    ("You're seeing this error because you have <code>DEBUG = True</code>", "Django debug mode"),
    ("Werkzeug Debugger", "Werkzeug debugger"),
    ("Whoops! There was an error", "Laravel/Whoops debug page"),
    ("Action Controller: Exception caught", "Rails debug page"),
    ("<b>Parse error</b>:", "PHP error display"),
    ("Server Error in '/' Application", "ASP.NET detailed errors"),
];

const STACK_TRACE_SIGNATURES: &[(&str, &str)] = &[
    ("Traceback (most recent call last)", "Python traceback"),
    ("Exception in thread \"", "Java stack trace"),
    ("\tat java.", "Java stack trace"),
    ("at org.springframework.", "Java stack trace"),
    ("System.NullReferenceException", ".NET stack trace"),
    ("   at System.", ".NET stack trace"),
    ("Fatal error: Uncaught", "PHP stack trace"),
    ("Stack trace:\n#0", "PHP stack trace"),
    ("    at Object.<anonymous>", "Node.js stack trace"),
    ("node_modules/express/lib/", "Node.js stack trace"),
];

static INTERNAL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:/var/www/[\w./-]+|/home/[\w-]+/[\w./-]+|/usr/share/nginx/[\w./-]*|/srv/[\w-]+/[\w./-]+|[A-Z]:\\(?:inetpub|Users|Windows)\\[\w\\.-]+)"#).unwrap()
});

static PRIVATE_IP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:10\.\d{1,3}\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3}|172\.(?:1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3})\b").unwrap()
});

static SOURCE_MAP_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//[#@]\s*sourceMappingURL=(\S+)").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct Leak {
    pub severity: Severity,
    pub leak_type: &'static str,
    pub evidence: String,
}

/// Classify an error page. Debug mode outranks a bare stack trace; internal
/// paths and addresses are reported alongside either.
pub fn classify_error_page(body: &str) -> Vec<Leak> {
    let mut leaks = Vec::new();
    if let Some((sig, name)) = DEBUG_SIGNATURES.iter().find(|(sig, _)| body.contains(sig)) {
        leaks.push(Leak { severity: Severity::High, leak_type: "debug_mode", evidence: format!("{} ({})", name, sig) });
    } else if let Some((sig, name)) = STACK_TRACE_SIGNATURES.iter().find(|(sig, _)| body.contains(sig)) {
        leaks.push(Leak { severity: Severity::Medium, leak_type: "stack_trace", evidence: format!("{} ({})", name, sig.trim()) });
    }
    if let Some(m) = INTERNAL_PATH.find(body) {
        leaks.push(Leak { severity: Severity::Low, leak_type: "internal_path", evidence: m.as_str().to_string() });
    }
    if let Some(m) = PRIVATE_IP.find(body) {
        leaks.push(Leak { severity: Severity::Low, leak_type: "private_ip", evidence: m.as_str().to_string() });
    }
    leaks
}

/// Where a script's source map should live: the `SourceMap` header, then the
/// trailing comment, then `<script>.map`.
pub fn source_map_url(script_url: &Url, header: Option<&str>, body: &str) -> Option<String> {
    let reference = header
        .map(|h| h.to_string())
        .or_else(|| SOURCE_MAP_COMMENT.captures_iter(body).last().map(|c| c[1].to_string()));
    match reference {
        Some(r) if r.starts_with("data:") => None,
        Some(r) => script_url.join(&r).ok().map(|u| u.to_string()),
        None => Some(format!("{}.map", script_url.as_str().split(['?', '#']).next().unwrap_or(script_url.as_str()))),
    }
}

/// `None` when `body` is not a source map. Embedded sources are worse than
/// bare mappings since they hand out the original code. A map cut off by the
/// body cap is still recognised by its `{"version"` prefix; whether it embeds
/// sources is then judged from the part that was read.
pub fn source_map_severity(body: &str, truncated: bool) -> Option<Severity> {
    let embedded = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(map) => {
            map.get("mappings")?;
            map.get("sourcesContent")
                .and_then(|c| c.as_array())
                .is_some_and(|c| c.iter().any(|s| s.as_str().is_some_and(|s| !s.is_empty())))
        }
        Err(_) if truncated && looks_like_source_map(body) => body.contains("\"sourcesContent\""),
        Err(_) => return None,
    };
    Some(if embedded { Severity::Medium } else { Severity::Low })
}

fn looks_like_source_map(body: &str) -> bool {
    let head: String = body.chars().filter(|c| !c.is_whitespace()).take(10).collect();
    head == "{\"version\""
}

fn leak_finding(url: &str, leak: Leak) -> Finding {
    let (title, description, recommendation) = match leak.leak_type {
        "debug_mode" => (
            "Debug mode enabled",
            "Error pages render the framework's debug view, exposing code, configuration and request data.",
            "Disable debug mode in production and serve generic error pages.",
        ),
        "stack_trace" => (
            "Stack trace disclosed in error page",
            "Unhandled errors return a stack trace that reveals code structure and library versions.",
            "Catch errors at the top level and return a generic error page.",
        ),
        "internal_path" => (
            "Internal file path disclosed",
            "An error response contains a server file-system path.",
            "Avoid echoing file-system paths in responses.",
        ),
        _ => (
            "Private IP address disclosed",
            "An error response contains an internal network address.",
            "Strip internal addresses from responses and headers.",
        ),
    };
    Finding::new(Category::Informational, leak.severity, title, format!("{} Evidence: {}", description, leak.evidence))
        .with_url(url)
        .with_recommendation(recommendation)
        .with_details(FindingDetails::InfoLeak { leak_type: leak.leak_type.to_string(), evidence: leak.evidence })
}

pub struct InfoLeakProbe;

impl InfoLeakProbe {
    async fn error_pages(&self, ctx: &ProbeContext) -> Vec<Finding> {
        let tag: String = rand::thread_rng()
            .sample_iter(rand::distributions::Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        // one plain miss, one with a malformed parameter
        let urls = [
            ctx.target.url(&format!("/wr-missing-{}", tag)),
            ctx.target.url(&format!("/wr-missing-{}.php?id[]=%27", tag)),
        ];

        let pacer = ctx.pacer();
        let mut seen: Vec<&'static str> = Vec::new();
        let mut findings = Vec::new();
        for url in &urls {
            pacer.wait_url(url).await;
            let Ok(page) = ctx.fetch(url).await else { continue };
            for leak in classify_error_page(&page.body) {
                if !seen.contains(&leak.leak_type) {
                    seen.push(leak.leak_type);
                    findings.push(leak_finding(url, leak));
                }
            }
        }
        findings
    }

    async fn source_maps(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let pacer = ctx.pacer();
        let page = ctx.fetch(&ctx.target.base_url.to_string()).await?;
        let base = Url::parse(&page.url).unwrap_or_else(|_| ctx.target.base_url.clone());

        let scripts: Vec<Url> = extract_script_sources(&page.body, &base)
            .iter()
            .filter_map(|s| Url::parse(s).ok())
            .filter(|u| u.host_str().is_some_and(|h| host_in_scope(h, &ctx.target.domain)))
            .take(ctx.config.max_scripts)
            .collect();

        let mut findings = Vec::new();
        for script in scripts {
            pacer.wait_url(script.as_str()).await;
            let Ok(js) = ctx.fetch(script.as_str()).await else { continue };
            if js.status >= 400 {
                continue;
            }
            let header = js.header("sourcemap").or_else(|| js.header("x-sourcemap"));
            let Some(map_url) = source_map_url(&script, header, &js.body) else { continue };
            if !url_in_scope(&map_url, &ctx.target.domain) {
                tracing::debug!(script = %script, map = %map_url, "source map outside scope, skipped");
                continue;
            }

            pacer.wait_url(&map_url).await;
            let Ok(map) = ctx.fetch(&map_url).await else { continue };
            if map.status >= 400 || (map.truncated && map.status != 200) {
                continue;
            }
            let Some(severity) = source_map_severity(&map.body, map.truncated) else { continue };
            let embedded = severity == Severity::Medium;
            findings.push(
                Finding::new(
                    Category::Informational,
                    severity,
                    "JavaScript source map exposed",
                    if embedded {
                        format!("{} is public and embeds the original source code.", map_url)
                    } else {
                        format!("{} is public and reveals the original file layout.", map_url)
                    },
                )
                .with_url(map_url.clone())
                .with_recommendation("Do not deploy source maps to production, or restrict them to internal networks.")
                .with_details(FindingDetails::InfoLeak {
                    leak_type: "source_map".to_string(),
                    evidence: format!("{} (sourcesContent: {})", map_url, embedded),
                }),
            );
        }
        Ok(findings)
    }
}

#[async_trait]
impl Probe for InfoLeakProbe {
    fn name(&self) -> &'static str {
        "info_leak"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let mut findings = self.error_pages(ctx).await;
        match self.source_maps(ctx).await {
            Ok(maps) => findings.extend(maps),
            Err(e) => tracing::debug!(error = %e, "source map check skipped"),
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::probe::Target;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn debug_page_outranks_trace() {
        let body = "<h1>Werkzeug Debugger</h1>Traceback (most recent call last): File \"/var/www/app/views.py\"";
        let leaks = classify_error_page(body);
        assert_eq!(leaks[0].severity, Severity::High);
        assert_eq!(leaks[0].leak_type, "debug_mode");
        assert_eq!(leaks[1].leak_type, "internal_path");
        assert_eq!(leaks[1].evidence, "/var/www/app/views.py");
    }

    #[test]
    fn stack_trace_is_medium() {
        let leaks = classify_error_page("java.lang.NullPointerException\n\tat java.base/java.util.Objects");
        assert_eq!(leaks, vec![Leak { severity: Severity::Medium, leak_type: "stack_trace", evidence: "Java stack trace (at java.)".to_string() }]);
        assert!(classify_error_page("<h1>404 Not Found</h1>").is_empty());
    }

    #[test]
    fn source_map_locations() {
        let script = Url::parse("https://example.com/static/app.js?v=3").unwrap();
        assert_eq!(source_map_url(&script, None, "x();").unwrap(), "https://example.com/static/app.js.map");
        assert_eq!(
            source_map_url(&script, None, "x();\n//# sourceMappingURL=app.1f3.js.map").unwrap(),
            "https://example.com/static/app.1f3.js.map"
        );
        assert_eq!(source_map_url(&script, Some("/maps/app.map"), "").unwrap(), "https://example.com/maps/app.map");
        assert!(source_map_url(&script, None, "//# sourceMappingURL=data:application/json;base64,e30=").is_none());
    }

    #[test]
    fn source_map_content() {
        assert_eq!(source_map_severity(r#"{"version":3,"mappings":"AAAA","sourcesContent":["const a = 1;"]}"#, false), Some(Severity::Medium));
        assert_eq!(source_map_severity(r#"{"version":3,"mappings":"AAAA","sources":["a.ts"]}"#, false), Some(Severity::Low));
        assert_eq!(source_map_severity("<html>nope</html>", false), None);
    }

    #[test]
    fn truncated_source_map_is_still_reported() {
        let cut = r#"{ "version": 3, "sources": ["a.ts"], "mappings": "AAAA;AACA,SAAS"#;
        assert_eq!(source_map_severity(cut, false), None);
        assert_eq!(source_map_severity(cut, true), Some(Severity::Low));
        let cut_embedded = r#"{"version":3,"sourcesContent":["function secret() {"#;
        assert_eq!(source_map_severity(cut_embedded, true), Some(Severity::Medium));
        assert_eq!(source_map_severity("<html><body>truncated", true), None);
    }

    #[tokio::test]
    async fn exposed_source_map() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<html><script src="/app.js"></script></html>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("run();\n//# sourceMappingURL=app.js.map"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app.js.map"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":3,"mappings":"AAAA","sourcesContent":["secret()"]}"#))
            .mount(&server)
            .await;

        let config = ScanConfig { request_delay_ms: 0, ..ScanConfig::default() };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        let ctx = ProbeContext::new(target, Arc::new(config)).unwrap();

        let findings = InfoLeakProbe.run(&ctx).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "JavaScript source map exposed");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn source_maps_on_other_hosts_are_not_fetched() {
        let server = MockServer::start().await;
        let outside = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":3,"mappings":"AAAA"}"#))
            .expect(0)
            .mount(&outside)
            .await;
        let map_ref = format!("{}/app.js.map", outside.uri().replace("127.0.0.1", "localhost"));
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<html><script src="/app.js"></script></html>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("run();\n//# sourceMappingURL={}", map_ref)))
            .mount(&server)
            .await;

        let config = ScanConfig { request_delay_ms: 0, ..ScanConfig::default() };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        let ctx = ProbeContext::new(target, Arc::new(config)).unwrap();

        assert!(InfoLeakProbe.run(&ctx).await.unwrap().is_empty());
        outside.verify().await;
    }

    #[tokio::test]
    async fn oversized_source_map_is_reported() {
        let server = MockServer::start().await;
        let sources: Vec<String> = (0..200).map(|i| format!("\"src/module_{}.ts\"", i)).collect();
        let big_map = format!(r#"{{"version":3,"sources":[{}],"mappings":"AAAA"}}"#, sources.join(","));
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<html><script src="/app.js"></script></html>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("run();"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app.js.map"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big_map))
            .mount(&server)
            .await;

        let config = ScanConfig { request_delay_ms: 0, max_body_bytes: 1024, ..ScanConfig::default() };
        let target = Target::with_base_url("127.0.0.1", &format!("{}/", server.uri())).unwrap();
        let ctx = ProbeContext::new(target, Arc::new(config)).unwrap();

        let findings = InfoLeakProbe.run(&ctx).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
    }
}
