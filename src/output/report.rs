use crate::engine::ScanState;
use crate::findings::{Finding, Severity, SeverityCounts};

const RULE: &str = "═══════════════════════════════════════════════════════════";

fn scored(findings: &[Finding]) -> impl Iterator<Item = &Finding> {
    findings.iter().filter(|f| !f.is_compliance_summary())
}

/// Short console summary after a scan.
pub fn print_summary(state: &ScanState, findings: &[Finding]) {
    let counts = SeverityCounts::tally(scored(findings));

    println!("\n{}", "=".repeat(60));
    println!("              SCAN {}", state.status.as_str().to_ascii_uppercase());
    println!("{}", "=".repeat(60));
    println!("\n[*] Summary:");
    println!("   Target: {}", state.domain);
    println!("   Scan: {}", state.id);
    if let Some(score) = state.score {
        println!("   Score: {}/100", score);
    }
    if let Some(summary) = &state.summary {
        println!("   {}", summary);
    }

    println!("\n[*] Security Findings:");
    for severity in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
        let n = counts.get(severity);
        if n > 0 {
            println!("   {} {} {}", severity.marker(), severity.label(), n);
        }
    }

    let important: Vec<&Finding> = scored(findings)
        .filter(|f| f.severity >= Severity::High)
        .collect();
    if !important.is_empty() {
        println!("\n[!] Important Findings:");
        for finding in important.iter().take(5) {
            println!("\n   {} {} - {}", finding.severity.marker(), finding.category, finding.title);
            if let Some(url) = &finding.url {
                println!("   URL: {}", url);
            }
        }
    }
    println!();
}

/// Plain-text report grouped by severity, compliance summaries last.
pub fn format_text_report(state: &ScanState, findings: &[Finding]) -> String {
    let mut report = String::new();
    report.push_str(RULE);
    report.push_str("\n                    SECURITY SCAN REPORT\n");
    report.push_str(RULE);
    report.push_str("\n\n");

    report.push_str(&format!("Target: {}\n", state.domain));
    report.push_str(&format!("Scan: {} ({})\n", state.id, state.status.as_str()));
    if let Some(score) = state.score {
        report.push_str(&format!("Score: {}/100\n", score));
    }
    if let Some(summary) = &state.summary {
        report.push_str(&format!("{}\n", summary));
    }
    report.push('\n');

    let counts = SeverityCounts::tally(scored(findings));
    report.push_str("Security Findings:\n");
    for severity in Severity::ALL {
        report.push_str(&format!("  {} {}: {}\n", severity.marker(), severity.label(), counts.get(severity)));
    }

    for severity in Severity::ALL {
        let group: Vec<&Finding> = scored(findings).filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        report.push_str(&format!("\n{} {} SEVERITY FINDINGS\n", severity.marker(), severity.label()));
        report.push_str(&"─".repeat(60));
        report.push_str("\n\n");

        for (i, finding) in group.iter().enumerate() {
            report.push_str(&format!("{}. {}: {}\n", i + 1, finding.category, finding.title));
            if let Some(url) = &finding.url {
                report.push_str(&format!("   URL: {}\n", url));
            }
            report.push_str(&format!("   Description: {}\n", finding.description));
            if let Some(rec) = &finding.recommendation {
                report.push_str(&format!("   Remediation: {}\n", rec));
            }
            report.push('\n');
        }
    }

    let compliance: Vec<&Finding> = findings.iter().filter(|f| f.is_compliance_summary()).collect();
    if !compliance.is_empty() {
        report.push_str("\nCOMPLIANCE\n");
        report.push_str(&"─".repeat(60));
        report.push_str("\n\n");
        for finding in compliance {
            report.push_str(&format!("{} [{}] {}\n", finding.severity.marker(), finding.severity.label(), finding.title));
            report.push_str(&format!("   {}\n\n", finding.description));
        }
    }

    report.push('\n');
    report.push_str(RULE);
    report.push_str("\n                      END OF REPORT\n");
    report.push_str(RULE);
    report.push('\n');
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{map_compliance, Category};

    #[test]
    fn report_groups_by_severity() {
        let mut state = ScanState::new("s1", "example.com");
        state.score = Some(75);
        let mut findings = vec![
            Finding::new(Category::Tls, Severity::Critical, "Invalid TLS certificate", "expired").with_url("https://example.com/"),
            Finding::new(Category::Headers, Severity::Low, "Missing Referrer-Policy header", "absent"),
        ];
        findings.extend(map_compliance(&findings));

        let report = format_text_report(&state, &findings);
        assert!(report.contains("Score: 75/100"));
        assert!(report.contains("[!] CRITICAL: 1"));
        let critical = report.find("CRITICAL SEVERITY FINDINGS").unwrap();
        let low = report.find("LOW SEVERITY FINDINGS").unwrap();
        assert!(critical < low);
        assert!(report.contains("COMPLIANCE"));
        assert!(report.contains("1. tls: Invalid TLS certificate"));
    }
}
