//! Maps aggregated findings onto OWASP Top 10 (2021), PCI-DSS v4.0,
//! ISO/IEC 27001:2022 Annex A and GDPR, producing one summary finding per
//! standard.

use super::{Category, ComplianceItem, ComplianceStatus, Finding, FindingDetails, Severity};

/// A compliance framework expressed as data: its items, title-keyword rules
/// (checked first, in order) and per-category fallbacks.
pub struct Framework {
    pub standard: &'static str,
    pub item_label: &'static str,
    pub items: &'static [(&'static str, &'static str)],
    keyword_rules: &'static [(&'static [&'static str], &'static str)],
    category_rules: &'static [(Category, &'static str)],
    recommendation: &'static str,
}

pub const OWASP_TOP_10: Framework = Framework {
    standard: "OWASP Top 10 (2021)",
    item_label: "categories",
    items: &[
        ("A01:2021", "Broken Access Control"),
        ("A02:2021", "Cryptographic Failures"),
        ("A03:2021", "Injection"),
        ("A04:2021", "Insecure Design"),
        ("A05:2021", "Security Misconfiguration"),
        ("A06:2021", "Vulnerable and Outdated Components"),
        ("A07:2021", "Identification and Authentication Failures"),
        ("A08:2021", "Software and Data Integrity Failures"),
        ("A09:2021", "Security Logging and Monitoring Failures"),
        ("A10:2021", "Server-Side Request Forgery"),
    ],
    keyword_rules: &[
        (&["sql injection", "injection", "host header"], "A03:2021"),
        (&["vulnerable", "outdated", "end-of-life", "cve-"], "A06:2021"),
        (&["rate limit", "brute"], "A07:2021"),
        (&["ssrf", "server-side request"], "A10:2021"),
        (&["integrity", "deserializ"], "A08:2021"),
        (&["logging", "monitoring"], "A09:2021"),
        (&["cors", "access control", "directory listing"], "A01:2021"),
        (&["certificate", "https", "hsts", "tls"], "A02:2021"),
        (&["stack trace", "source map", "debug", "disclos", "takeover", "waf"], "A05:2021"),
    ],
    category_rules: &[
        (Category::Tls, "A02:2021"),
        (Category::Headers, "A05:2021"),
        (Category::Cors, "A01:2021"),
        (Category::Email, "A05:2021"),
        (Category::Dns, "A05:2021"),
        (Category::Vulnerability, "A05:2021"),
        (Category::Secrets, "A07:2021"),
        (Category::SensitiveFiles, "A01:2021"),
    ],
    recommendation: "Prioritise the failing OWASP categories, starting with those carrying critical issues.",
};

pub const PCI_DSS: Framework = Framework {
    standard: "PCI-DSS v4.0",
    item_label: "requirements",
    items: &[
        ("Req 1", "Install and maintain network security controls"),
        ("Req 2", "Apply secure configurations to all system components"),
        ("Req 4", "Protect cardholder data with strong cryptography during transmission"),
        ("Req 5", "Protect all systems and networks from malicious software"),
        ("Req 6", "Develop and maintain secure systems and software"),
        ("Req 7", "Restrict access to system components and data by business need to know"),
        ("Req 8", "Identify users and authenticate access to system components"),
    ],
    keyword_rules: &[
        (&["injection", "vulnerable", "outdated", "cve-", "waf", "content security policy"], "Req 6"),
        (&["rate limit", "password", "credential"], "Req 8"),
        (&["certificate", "https", "hsts", "cookie"], "Req 4"),
        (&["disclos", "stack trace", "debug"], "Req 2"),
    ],
    category_rules: &[
        (Category::Tls, "Req 4"),
        (Category::Headers, "Req 2"),
        (Category::Cors, "Req 6"),
        (Category::Email, "Req 5"),
        (Category::Dns, "Req 1"),
        (Category::Vulnerability, "Req 6"),
        (Category::Secrets, "Req 8"),
        (Category::SensitiveFiles, "Req 7"),
    ],
    recommendation: "Resolve failing requirements before the next PCI-DSS assessment of the cardholder data environment.",
};

pub const ISO_27001: Framework = Framework {
    standard: "ISO/IEC 27001:2022",
    item_label: "controls",
    items: &[
        ("A.5.14", "Information transfer"),
        ("A.8.5", "Secure authentication"),
        ("A.8.8", "Management of technical vulnerabilities"),
        ("A.8.9", "Configuration management"),
        ("A.8.12", "Data leakage prevention"),
        ("A.8.20", "Networks security"),
        ("A.8.24", "Use of cryptography"),
        ("A.8.28", "Secure coding"),
    ],
    keyword_rules: &[
        (&["injection", "host header"], "A.8.28"),
        (&["vulnerable", "outdated", "cve-", "takeover", "dangling"], "A.8.8"),
        (&["rate limit"], "A.8.5"),
        (&["waf"], "A.8.20"),
        (&["source map", "stack trace", "disclos"], "A.8.12"),
        (&["certificate", "https", "hsts", "cookie"], "A.8.24"),
    ],
    category_rules: &[
        (Category::Tls, "A.8.24"),
        (Category::Headers, "A.8.9"),
        (Category::Cors, "A.8.9"),
        (Category::Email, "A.5.14"),
        (Category::Dns, "A.8.9"),
        (Category::Vulnerability, "A.8.8"),
        (Category::Secrets, "A.8.12"),
        (Category::SensitiveFiles, "A.8.12"),
    ],
    recommendation: "Track failing Annex A controls in the statement of applicability and risk treatment plan.",
};

pub const GDPR: Framework = Framework {
    standard: "GDPR",
    item_label: "articles",
    items: &[
        ("Art. 25", "Data protection by design and by default"),
        ("Art. 32(1)(a)", "Encryption of personal data"),
        ("Art. 32(1)(b)", "Confidentiality and integrity of processing systems"),
    ],
    keyword_rules: &[
        (&["injection", "vulnerable", "outdated"], "Art. 32(1)(b)"),
        (&["certificate", "https", "hsts", "cookie"], "Art. 32(1)(a)"),
    ],
    category_rules: &[
        (Category::Tls, "Art. 32(1)(a)"),
        (Category::Headers, "Art. 25"),
        (Category::Cors, "Art. 25"),
        (Category::Vulnerability, "Art. 32(1)(b)"),
        (Category::Secrets, "Art. 32(1)(b)"),
        (Category::SensitiveFiles, "Art. 32(1)(b)"),
    ],
    recommendation: "Issues affecting confidentiality of personal data should be assessed for Art. 33 breach-notification relevance.",
};

pub const FRAMEWORKS: [&Framework; 4] = [&OWASP_TOP_10, &PCI_DSS, &ISO_27001, &GDPR];

impl Framework {
    /// Zero-or-one item for a finding.
    pub fn classify(&self, finding: &Finding) -> Option<&'static str> {
        let title = finding.title.to_lowercase();
        for (keywords, item) in self.keyword_rules {
            if keywords.iter().any(|k| title.contains(k)) {
                return Some(item);
            }
        }
        self.category_rules
            .iter()
            .find(|(category, _)| *category == finding.category)
            .map(|(_, item)| *item)
    }

    pub fn breakdown(&self, findings: &[Finding]) -> Vec<ComplianceItem> {
        let mut items: Vec<ComplianceItem> = self
            .items
            .iter()
            .map(|(id, name)| ComplianceItem {
                id: id.to_string(),
                name: name.to_string(),
                issues: 0,
                critical: 0,
                status: ComplianceStatus::Pass,
            })
            .collect();
        let mut blocking = vec![false; items.len()];

        for finding in findings.iter().filter(|f| counts_for_compliance(f)) {
            let Some(id) = self.classify(finding) else { continue };
            let Some(idx) = self.items.iter().position(|(item_id, _)| *item_id == id) else { continue };
            items[idx].issues += 1;
            if finding.severity == Severity::Critical {
                items[idx].critical += 1;
            }
            if finding.severity >= Severity::High {
                blocking[idx] = true;
            }
        }

        for (item, blocking) in items.iter_mut().zip(blocking) {
            item.status = if blocking {
                ComplianceStatus::Fail
            } else if item.issues > 0 {
                ComplianceStatus::Warn
            } else {
                ComplianceStatus::Pass
            };
        }
        items
    }

    pub fn summarize(&self, findings: &[Finding]) -> Finding {
        let items = self.breakdown(findings);
        let ids_with = |status: ComplianceStatus| -> Vec<String> {
            items.iter().filter(|i| i.status == status).map(|i| i.id.clone()).collect()
        };
        let failing = ids_with(ComplianceStatus::Fail);
        let warning = ids_with(ComplianceStatus::Warn);
        let passing = ids_with(ComplianceStatus::Pass);
        let total_issues: usize = items.iter().map(|i| i.issues).sum();

        let severity = severity_for_failures(failing.len());
        let title = format!(
            "{} compliance: {} failing, {} warning, {} passing {}",
            self.standard,
            failing.len(),
            warning.len(),
            passing.len(),
            self.item_label
        );

        let mut description = format!(
            "{} issue(s) mapped to {} {}.",
            total_issues,
            self.standard,
            self.item_label
        );
        for item in items.iter().filter(|i| i.status != ComplianceStatus::Pass) {
            let state = if item.status == ComplianceStatus::Fail { "FAIL" } else { "WARN" };
            description.push_str(&format!(
                " [{}] {} {}: {} issue(s), {} critical.",
                state, item.id, item.name, item.issues, item.critical
            ));
        }

        let mut finding = Finding::new(Category::Informational, severity, title, description)
            .with_details(FindingDetails::Compliance {
                standard: self.standard.to_string(),
                failing,
                warning,
                passing,
                items,
            });
        if severity > Severity::Info {
            finding = finding.with_recommendation(self.recommendation);
        }
        finding
    }
}

/// Info findings and previously derived summaries never count as issues.
fn counts_for_compliance(finding: &Finding) -> bool {
    finding.severity > Severity::Info && !finding.is_compliance_summary()
}

pub fn severity_for_failures(failing: usize) -> Severity {
    match failing {
        n if n > 3 => Severity::Critical,
        n if n > 1 => Severity::High,
        n if n > 0 => Severity::Medium,
        _ => Severity::Info,
    }
}

/// One summary finding per supported standard.
pub fn map_compliance(findings: &[Finding]) -> Vec<Finding> {
    FRAMEWORKS.iter().map(|fw| fw.summarize(findings)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(category: Category, severity: Severity, title: &str) -> Finding {
        Finding::new(category, severity, title, "")
    }

    #[test]
    fn keyword_rules_win_over_category_fallback() {
        let sqli = finding(Category::Vulnerability, Severity::Critical, "SQL injection (error-based) in parameter 'id'");
        assert_eq!(OWASP_TOP_10.classify(&sqli), Some("A03:2021"));

        let lib = finding(Category::Vulnerability, Severity::Medium, "Vulnerable jQuery 1.8.3 (CVE-2020-11022)");
        assert_eq!(OWASP_TOP_10.classify(&lib), Some("A06:2021"));

        let hsts = finding(Category::Headers, Severity::High, "Missing Strict-Transport-Security (HSTS) header");
        assert_eq!(OWASP_TOP_10.classify(&hsts), Some("A02:2021"));

        let xfo = finding(Category::Headers, Severity::Medium, "Missing X-Frame-Options header");
        assert_eq!(OWASP_TOP_10.classify(&xfo), Some("A05:2021"));
    }

    #[test]
    fn informational_findings_are_not_mapped() {
        let info = finding(Category::Informational, Severity::Low, "Crawled 12 pages");
        assert_eq!(OWASP_TOP_10.classify(&info), None);
    }

    #[test]
    fn status_follows_worst_severity() {
        let findings = vec![
            finding(Category::Cors, Severity::Critical, "CORS reflects arbitrary origin with credentials"),
            finding(Category::Headers, Severity::Low, "Missing Referrer-Policy header"),
            finding(Category::Headers, Severity::Info, "Server header present"),
        ];
        let items = OWASP_TOP_10.breakdown(&findings);
        let a01 = items.iter().find(|i| i.id == "A01:2021").unwrap();
        assert_eq!(a01.status, ComplianceStatus::Fail);
        assert_eq!(a01.critical, 1);
        let a05 = items.iter().find(|i| i.id == "A05:2021").unwrap();
        assert_eq!(a05.status, ComplianceStatus::Warn);
        assert_eq!(a05.issues, 1);
    }

    #[test]
    fn summary_severity_scales_with_failing_categories() {
        assert_eq!(severity_for_failures(0), Severity::Info);
        assert_eq!(severity_for_failures(1), Severity::Medium);
        assert_eq!(severity_for_failures(2), Severity::High);
        assert_eq!(severity_for_failures(3), Severity::High);
        assert_eq!(severity_for_failures(4), Severity::Critical);
    }

    #[test]
    fn one_summary_per_standard_and_summaries_are_ignored_on_rerun() {
        let findings = vec![
            finding(Category::Tls, Severity::Critical, "Invalid TLS certificate"),
            finding(Category::Secrets, Severity::Critical, "Exposed AWS Access Key ID"),
        ];
        let first = map_compliance(&findings);
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|f| f.is_compliance_summary()));

        let mut with_summaries = findings.clone();
        with_summaries.extend(first.clone());
        let second = map_compliance(&with_summaries);
        assert_eq!(first, second);
    }

    #[test]
    fn clean_finding_set_passes_everything() {
        let summary = OWASP_TOP_10.summarize(&[]);
        assert_eq!(summary.severity, Severity::Info);
        assert!(summary.recommendation.is_none());
        match summary.details {
            FindingDetails::Compliance { passing, failing, .. } => {
                assert_eq!(passing.len(), 10);
                assert!(failing.is_empty());
            }
            other => panic!("unexpected details {:?}", other),
        }
    }
}
