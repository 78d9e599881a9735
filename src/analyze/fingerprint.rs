use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use url::Url;

use crate::discover::crawler::extract_script_sources;
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};
use crate::utils::url_in_scope;

/// Name/version signatures, tried against page HTML, script URLs and script
/// bodies. Group 1 is always the version.
const LIBRARY_PATTERNS: &[(&str, &[&str])] = &[
    ("jquery", &[
        r"(?i)jquery[.-](\d+\.\d+\.\d+)(?:\.slim)?(?:\.min)?\.js",
        r"(?i)/jquery/(\d+\.\d+\.\d+)/",
        r"jQuery (?:JavaScript Library )?v(\d+\.\d+\.\d+)",
    ]),
    ("angularjs", &[
        r"(?i)angular[.-](\d+\.\d+\.\d+)(?:\.min)?\.js",
        r"(?i)/angular\.js/(\d+\.\d+\.\d+)/",
        r"AngularJS v(\d+\.\d+\.\d+)",
    ]),
    ("bootstrap", &[
        r"(?i)bootstrap[.-](\d+\.\d+\.\d+)(?:\.bundle)?(?:\.min)?\.(?:js|css)",
        r"(?i)/bootstrap/(\d+\.\d+\.\d+)/",
        r"Bootstrap v(\d+\.\d+\.\d+)",
    ]),
    ("lodash", &[
        r"(?i)lodash[.-](\d+\.\d+\.\d+)(?:\.min)?\.js",
        r"(?i)/lodash(?:\.js)?/(\d+\.\d+\.\d+)/",
        r"(?i)@license lodash (\d+\.\d+\.\d+)",
    ]),
    ("moment", &[
        r"(?i)moment[.-](\d+\.\d+\.\d+)(?:\.min)?\.js",
        r"(?i)/moment\.js/(\d+\.\d+\.\d+)/",
        r"//! moment\.js\s*\n//! version : (\d+\.\d+\.\d+)",
    ]),
    ("handlebars", &[
        r"(?i)handlebars[.-](\d+\.\d+\.\d+)(?:\.runtime)?(?:\.min)?\.js",
        r"(?i)/handlebars\.js/(\d+\.\d+\.\d+)/",
        r"Handlebars v(\d+\.\d+\.\d+)",
    ]),
    ("dompurify", &[
        r"(?i)/dompurify/(\d+\.\d+\.\d+)/",
        r"(?i)purify[.-](\d+\.\d+\.\d+)(?:\.min)?\.js",
        r"DOMPurify (\d+\.\d+\.\d+)",
    ]),
    ("underscore", &[
        r"(?i)underscore[.-](\d+\.\d+\.\d+)(?:\.min)?\.js",
        r"(?i)/underscore\.js/(\d+\.\d+\.\d+)/",
        r"Underscore\.js (\d+\.\d+\.\d+)",
    ]),
];

static COMPILED: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    LIBRARY_PATTERNS
        .iter()
        .map(|(name, patterns)| (*name, patterns.iter().map(|p| Regex::new(p).unwrap()).collect()))
        .collect()
});

/// Dotted numeric version; missing components compare as zero.
#[derive(Debug, Clone, Eq)]
pub struct Version(Vec<u32>);

impl Version {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Option<Vec<u32>> = raw
            .trim_start_matches('v')
            .split('.')
            .map(|p| {
                let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().ok()
            })
            .collect();
        parts.filter(|p| !p.is_empty()).map(Version)
    }

    fn component(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Versions in `[introduced, fixed)` are affected.
#[derive(Debug)]
pub struct KnownVulnerability {
    pub library: &'static str,
    pub introduced: Option<&'static str>,
    pub fixed: &'static str,
    pub cve: &'static str,
    pub severity: Severity,
    pub summary: &'static str,
}

pub const KNOWN_VULNERABILITIES: &[KnownVulnerability] = &[
    KnownVulnerability { library: "jquery", introduced: None, fixed: "3.5.0", cve: "CVE-2020-11022", severity: Severity::Medium, summary: "XSS when passing untrusted HTML to DOM manipulation methods" },
    KnownVulnerability { library: "jquery", introduced: None, fixed: "3.4.0", cve: "CVE-2019-11358", severity: Severity::Medium, summary: "Prototype pollution through jQuery.extend" },
    KnownVulnerability { library: "jquery", introduced: None, fixed: "1.9.0", cve: "CVE-2012-6708", severity: Severity::Medium, summary: "Selector strings interpreted as HTML" },
    KnownVulnerability { library: "angularjs", introduced: None, fixed: "1.8.0", cve: "CVE-2020-7676", severity: Severity::Medium, summary: "XSS through sanitizer bypass; AngularJS is end-of-life" },
    KnownVulnerability { library: "bootstrap", introduced: None, fixed: "3.4.1", cve: "CVE-2018-14042", severity: Severity::Medium, summary: "XSS in tooltip data-container" },
    KnownVulnerability { library: "bootstrap", introduced: Some("4.0.0"), fixed: "4.3.1", cve: "CVE-2019-8331", severity: Severity::Medium, summary: "XSS in tooltip and popover data-template" },
    KnownVulnerability { library: "lodash", introduced: None, fixed: "4.17.21", cve: "CVE-2021-23337", severity: Severity::High, summary: "Command injection through template" },
    KnownVulnerability { library: "lodash", introduced: None, fixed: "4.17.12", cve: "CVE-2019-10744", severity: Severity::High, summary: "Prototype pollution through defaultsDeep" },
    KnownVulnerability { library: "moment", introduced: None, fixed: "2.29.4", cve: "CVE-2022-31129", severity: Severity::High, summary: "Inefficient RFC 2822 parsing (ReDoS)" },
    KnownVulnerability { library: "handlebars", introduced: None, fixed: "4.7.7", cve: "CVE-2021-23369", severity: Severity::High, summary: "Remote code execution when compiling untrusted templates" },
    KnownVulnerability { library: "dompurify", introduced: None, fixed: "2.0.17", cve: "CVE-2020-26870", severity: Severity::Medium, summary: "Mutation XSS bypass of the sanitizer" },
    KnownVulnerability { library: "underscore", introduced: Some("1.3.2"), fixed: "1.12.1", cve: "CVE-2021-23358", severity: Severity::High, summary: "Arbitrary code execution through template" },
];

impl KnownVulnerability {
    pub fn affects(&self, version: &Version) -> bool {
        let below_fix = Version::parse(self.fixed).map(|f| *version < f).unwrap_or(false);
        let above_intro = self
            .introduced
            .and_then(Version::parse)
            .map(|i| *version >= i)
            .unwrap_or(true);
        below_fix && above_intro
    }
}

pub fn vulnerabilities_for(library: &str, version: &Version) -> Vec<&'static KnownVulnerability> {
    KNOWN_VULNERABILITIES
        .iter()
        .filter(|v| v.library == library && v.affects(version))
        .collect()
}

/// (library, version) pairs found in `content`, deduplicated.
pub fn detect_libraries(content: &str) -> Vec<(&'static str, String)> {
    let mut found: Vec<(&'static str, String)> = Vec::new();
    for (name, patterns) in COMPILED.iter() {
        for re in patterns {
            for caps in re.captures_iter(content) {
                let version = caps[1].to_string();
                if !found.iter().any(|(n, v)| n == name && *v == version) {
                    found.push((name, version));
                }
            }
        }
    }
    found
}

/// One finding per known vulnerability of each detected library version,
/// plus an informational inventory. `detections` maps `(library, version)`
/// to the URL it was seen on.
pub fn dependency_findings(detections: &BTreeMap<(String, String), String>) -> Vec<Finding> {
    let mut findings = Vec::new();
    if detections.is_empty() {
        return findings;
    }

    for ((library, raw_version), source_url) in detections {
        let Some(version) = Version::parse(raw_version) else { continue };
        for vuln in vulnerabilities_for(library, &version) {
            findings.push(
                Finding::new(
                    Category::Vulnerability,
                    vuln.severity,
                    format!("Vulnerable {} {} ({})", library, raw_version, vuln.cve),
                    format!("{} {} is affected by {}: {}.", library, raw_version, vuln.cve, vuln.summary),
                )
                .with_url(source_url.clone())
                .with_recommendation(format!("Upgrade {} to {} or later.", library, vuln.fixed))
                .with_details(FindingDetails::Dependency {
                    library: library.clone(),
                    version: raw_version.clone(),
                    cve: Some(vuln.cve.to_string()),
                    source_url: source_url.clone(),
                }),
            );
        }
    }

    let inventory: Vec<String> = detections.keys().map(|(l, v)| format!("{} {}", l, v)).collect();
    findings.push(Finding::new(
        Category::Informational,
        Severity::Info,
        format!("{} client-side libraries identified", inventory.len()),
        format!("Detected: {}.", inventory.join(", ")),
    ));
    findings
}

pub struct DependencyProbe;

#[async_trait]
impl Probe for DependencyProbe {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let pacer = ctx.pacer();
        let root = ctx.target.base_url.to_string();
        let page = ctx.fetch(&root).await?;

        let mut detections: BTreeMap<(String, String), String> = BTreeMap::new();
        let mut record = |content: &str, url: &str| {
            for (lib, version) in detect_libraries(content) {
                detections.entry((lib.to_string(), version)).or_insert_with(|| url.to_string());
            }
        };
        record(&page.body, &page.url);

        let base = Url::parse(&page.url).unwrap_or_else(|_| ctx.target.base_url.clone());
        let scripts: Vec<String> = extract_script_sources(&page.body, &base)
            .into_iter()
            .filter(|src| url_in_scope(src, &ctx.target.domain))
            .take(ctx.config.max_scripts)
            .collect();

        for src in scripts {
            // file names often carry the version already
            record(&src, &src);
            pacer.wait_url(&src).await;
            match ctx.fetch(&src).await {
                Ok(script) if script.status < 400 => record(&script.body, &src),
                Ok(_) => {}
                Err(e) => tracing::debug!(url = %src, error = %e, "script fetch failed"),
            }
        }

        tracing::info!(libraries = detections.len(), "client-side libraries fingerprinted");
        Ok(dependency_findings(&detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn version_ordering() {
        assert!(v("3.4.1") < v("3.5.0"));
        assert!(v("1.12") < v("1.12.1"));
        assert_eq!(v("2.0"), v("2.0.0"));
        assert!(v("10.0.0") > v("9.9.9"));
        assert!(Version::parse("latest").is_none());
    }

    #[test]
    fn detects_cdn_and_banner_versions() {
        let html = r#"<script src="https://code.jquery.com/jquery-3.4.1.min.js"></script>
            <script src="https://cdnjs.cloudflare.com/ajax/libs/lodash.js/4.17.11/lodash.min.js"></script>"#;
        let libs = detect_libraries(html);
        assert!(libs.contains(&("jquery", "3.4.1".to_string())));
        assert!(libs.contains(&("lodash", "4.17.11".to_string())));

        let banner = "/*! jQuery v1.8.3 jquery.com | jquery.org/license */";
        assert_eq!(detect_libraries(banner), vec![("jquery", "1.8.3".to_string())]);
    }

    #[test]
    fn version_ranges() {
        let jquery: Vec<&str> = vulnerabilities_for("jquery", &v("3.4.1")).iter().map(|k| k.cve).collect();
        assert_eq!(jquery, vec!["CVE-2020-11022"]);
        assert_eq!(vulnerabilities_for("jquery", &v("1.8.3")).len(), 3);
        assert!(vulnerabilities_for("jquery", &v("3.7.1")).is_empty());

        assert_eq!(vulnerabilities_for("bootstrap", &v("4.1.0"))[0].cve, "CVE-2019-8331");
        assert!(vulnerabilities_for("bootstrap", &v("3.4.1")).is_empty());
        assert!(vulnerabilities_for("underscore", &v("1.3.1")).is_empty());
        assert_eq!(vulnerabilities_for("underscore", &v("1.9.1")).len(), 1);
    }

    #[test]
    fn findings_per_cve_plus_inventory() {
        let mut detections = BTreeMap::new();
        detections.insert(("lodash".to_string(), "4.17.11".to_string()), "https://example.com/app.js".to_string());
        detections.insert(("moment".to_string(), "2.30.1".to_string()), "https://example.com/".to_string());
        let findings = dependency_findings(&detections);
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().take(2).all(|f| f.severity == Severity::High));
        assert_eq!(findings[2].title, "2 client-side libraries identified");
    }
}
