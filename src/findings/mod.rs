//! Finding model shared by every probe, the aggregator, the compliance mapper
//! and the scoring engine.

pub mod aggregate;
pub mod compliance;

pub use aggregate::{aggregate, dedup_secrets};
pub use compliance::map_compliance;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Points deducted from the 100-point score.
    pub fn penalty(&self) -> u32 {
        match self {
            Severity::Critical => 25,
            Severity::High => 15,
            Severity::Medium => 8,
            Severity::Low => 3,
            Severity::Info => 0,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    pub fn marker(&self) -> &str {
        match self {
            Severity::Critical => "[!]",
            Severity::High => "[!!]",
            Severity::Medium => "[i]",
            Severity::Low => "[·]",
            Severity::Info => "[*]",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tls,
    Headers,
    Cors,
    Email,
    /// DNS hygiene and subdomain findings.
    Dns,
    Vulnerability,
    Secrets,
    SensitiveFiles,
    Informational,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tls => "tls",
            Category::Headers => "headers",
            Category::Cors => "cors",
            Category::Email => "email",
            Category::Dns => "dns",
            Category::Vulnerability => "vulnerability",
            Category::Secrets => "secrets",
            Category::SensitiveFiles => "sensitive_files",
            Category::Informational => "informational",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe-specific payload attached to a finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingDetails {
    #[default]
    None,
    Transport {
        error: Option<String>,
        status: Option<u16>,
        location: Option<String>,
    },
    Header {
        header: String,
        value: Option<String>,
    },
    Cors {
        origin_sent: String,
        allow_origin: Option<String>,
        allow_credentials: bool,
    },
    EmailRecord {
        record_type: String,
        name: String,
        records: Vec<String>,
    },
    Subdomain {
        subdomains: Vec<String>,
        source: Option<String>,
    },
    Takeover {
        hostname: String,
        cname: String,
        provider: String,
        signature: Option<String>,
    },
    Secret {
        secret_type: String,
        masked_value: String,
        source_url: String,
        line: Option<usize>,
    },
    Injection {
        parameter: String,
        payload: String,
        technique: String,
        evidence: String,
    },
    HostHeader {
        header: String,
        injected_value: String,
        reflected_in: String,
    },
    RateLimit {
        endpoint: String,
        requests_sent: usize,
        limited_at: Option<usize>,
        headers: Vec<String>,
    },
    Waf {
        provider: Option<String>,
        confidence: f32,
        evidence: Vec<String>,
        blocked_probes: Vec<String>,
    },
    Dependency {
        library: String,
        version: String,
        cve: Option<String>,
        source_url: String,
    },
    SensitiveFile {
        path: String,
        status: u16,
        size: usize,
    },
    InfoLeak {
        leak_type: String,
        evidence: String,
    },
    Crawl {
        pages: usize,
        paths: Vec<String>,
    },
    Compliance {
        standard: String,
        failing: Vec<String>,
        warning: Vec<String>,
        passing: Vec<String>,
        items: Vec<ComplianceItem>,
    },
}

/// One row of a compliance breakdown (an OWASP category, a PCI requirement...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceItem {
    pub id: String,
    pub name: String,
    pub issues: usize,
    pub critical: usize,
    pub status: ComplianceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub recommendation: Option<String>,
    #[serde(default)]
    pub details: FindingDetails,
}

impl Finding {
    pub fn new(
        category: Category,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            title: title.into(),
            description: description.into(),
            url: None,
            recommendation: None,
            details: FindingDetails::None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn with_details(mut self, details: FindingDetails) -> Self {
        self.details = details;
        self
    }

    /// Compliance summaries are derived from other findings and never feed
    /// back into scoring or mapping.
    pub fn is_compliance_summary(&self) -> bool {
        matches!(self.details, FindingDetails::Compliance { .. })
    }
}

/// Per-severity tally, most severe first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn tally<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            counts.add(finding.severity);
        }
        counts
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}
