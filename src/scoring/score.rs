use crate::findings::{Finding, Severity, SeverityCounts};

/// `100 - Σ penalty(severity)`, clamped to `[0, 100]`. Info findings and
/// compliance summaries carry no penalty.
pub fn calculate_score(findings: &[Finding]) -> u8 {
    let penalty: u32 = scored(findings).map(|f| f.severity.penalty()).sum();
    100u32.saturating_sub(penalty) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

pub fn score_band(score: u8) -> ScoreBand {
    match score {
        90..=u8::MAX => ScoreBand::Excellent,
        75..=89 => ScoreBand::Good,
        50..=74 => ScoreBand::Fair,
        25..=49 => ScoreBand::Poor,
        _ => ScoreBand::Critical,
    }
}

impl ScoreBand {
    fn headline(&self) -> &'static str {
        match self {
            ScoreBand::Excellent => "Excellent security posture. Only minor hardening opportunities were observed.",
            ScoreBand::Good => "Good security posture with a few issues that should be addressed.",
            ScoreBand::Fair => "Fair security posture. Several weaknesses expose the site to common attacks.",
            ScoreBand::Poor => "Poor security posture. Significant vulnerabilities require prompt remediation.",
            ScoreBand::Critical => "Critical security posture. Serious vulnerabilities demand immediate action.",
        }
    }
}

/// Deterministic paragraph: band headline followed by the severity breakdown.
pub fn generate_summary(score: u8, findings: &[Finding]) -> String {
    let counts = SeverityCounts::tally(scored(findings));
    format!(
        "{} Score {}/100. Found {} critical, {} high, {} medium and {} low severity issue(s).",
        score_band(score).headline(),
        score,
        counts.get(Severity::Critical),
        counts.get(Severity::High),
        counts.get(Severity::Medium),
        counts.get(Severity::Low),
    )
}

fn scored(findings: &[Finding]) -> impl Iterator<Item = &Finding> {
    findings
        .iter()
        .filter(|f| f.severity > Severity::Info && !f.is_compliance_summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{compliance::map_compliance, Category};

    fn findings(severities: &[Severity]) -> Vec<Finding> {
        severities
            .iter()
            .enumerate()
            .map(|(i, s)| Finding::new(Category::Headers, *s, format!("f{}", i), ""))
            .collect()
    }

    #[test]
    fn one_critical_two_high_scores_45() {
        let f = findings(&[Severity::Critical, Severity::High, Severity::High]);
        assert_eq!(calculate_score(&f), 45);
    }

    #[test]
    fn empty_set_scores_100() {
        assert_eq!(calculate_score(&[]), 100);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let f = findings(&[Severity::Critical; 6]);
        assert_eq!(calculate_score(&f), 0);
    }

    #[test]
    fn info_findings_do_not_count() {
        let f = findings(&[Severity::Info, Severity::Info, Severity::Low]);
        assert_eq!(calculate_score(&f), 97);
    }

    #[test]
    fn order_does_not_matter() {
        let mut f = findings(&[Severity::Low, Severity::Critical, Severity::Medium, Severity::High]);
        let a = calculate_score(&f);
        f.reverse();
        assert_eq!(a, calculate_score(&f));
        assert_eq!(a, 100 - 3 - 25 - 8 - 15);
    }

    #[test]
    fn adding_a_critical_never_raises_the_score() {
        let mut f = findings(&[Severity::Medium, Severity::Low]);
        for _ in 0..6 {
            let before = calculate_score(&f);
            f.push(Finding::new(Category::Tls, Severity::Critical, "extra", ""));
            assert!(calculate_score(&f) <= before);
        }
    }

    #[test]
    fn compliance_summaries_are_excluded_from_scoring() {
        let mut f = findings(&[Severity::Critical, Severity::High, Severity::High]);
        let summaries = map_compliance(&f);
        f.extend(summaries);
        assert_eq!(calculate_score(&f), 45);
    }

    #[test]
    fn summary_is_deterministic_and_mentions_counts() {
        let f = findings(&[Severity::Critical, Severity::High, Severity::High]);
        let score = calculate_score(&f);
        let a = generate_summary(score, &f);
        let b = generate_summary(score, &f);
        assert_eq!(a, b);
        assert!(a.starts_with("Poor security posture"));
        assert!(a.contains("1 critical, 2 high, 0 medium and 0 low"));
    }

    #[test]
    fn bands_cover_the_range() {
        assert_eq!(score_band(100), ScoreBand::Excellent);
        assert_eq!(score_band(90), ScoreBand::Excellent);
        assert_eq!(score_band(89), ScoreBand::Good);
        assert_eq!(score_band(50), ScoreBand::Fair);
        assert_eq!(score_band(49), ScoreBand::Poor);
        assert_eq!(score_band(0), ScoreBand::Critical);
    }
}
