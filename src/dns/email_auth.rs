use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use super::{dnssec_authenticated, DnsLookup, SystemResolver};
use crate::findings::{Category, Finding, FindingDetails, Severity};
use crate::probe::{Probe, ProbeContext};
use crate::utils::apex_domain;

/// Selectors tried when looking for DKIM keys.
pub const DKIM_SELECTORS: &[&str] = &[
    "default", "google", "selector1", "selector2", "dkim", "k1", "s1", "s2", "mail", "smtp", "mandrill", "everlytickey1", "mxvault",
];

/// SPF mechanisms that cost a DNS lookup at evaluation time.
const SPF_LOOKUP_MECHANISMS: &[&str] = &["include:", "a", "a:", "a/", "mx", "mx:", "mx/", "ptr", "ptr:", "exists:", "redirect="];
const SPF_LOOKUP_LIMIT: usize = 10;

fn record(record_type: &str, name: &str, records: &[String]) -> FindingDetails {
    FindingDetails::EmailRecord {
        record_type: record_type.to_string(),
        name: name.to_string(),
        records: records.to_vec(),
    }
}

pub fn analyze_mx(domain: &str, mx: &[String]) -> Vec<Finding> {
    if !mx.is_empty() {
        return Vec::new();
    }
    vec![Finding::new(
        Category::Email,
        Severity::Info,
        "No MX records",
        format!("{} publishes no MX records and does not appear to receive email.", domain),
    )
    .with_details(record("MX", domain, mx))]
}

fn spf_lookup_count(spf: &str) -> usize {
    spf.split_whitespace()
        .skip(1)
        .map(|term| term.trim_start_matches(['+', '-', '~', '?']).to_ascii_lowercase())
        .filter(|term| {
            SPF_LOOKUP_MECHANISMS.iter().any(|m| {
                if m.ends_with(':') || m.ends_with('=') || m.ends_with('/') {
                    term.starts_with(m)
                } else {
                    term == m
                }
            })
        })
        .count()
}

pub fn analyze_spf(domain: &str, txt: &[String]) -> Vec<Finding> {
    let spf: Vec<String> = txt
        .iter()
        .filter(|r| r.trim().to_ascii_lowercase().starts_with("v=spf1"))
        .cloned()
        .collect();
    let details = record("SPF", domain, &spf);
    let rec = "Publish a single SPF record ending in '-all' that lists only your legitimate senders.";

    let Some(first) = spf.first() else {
        return vec![Finding::new(
            Category::Email,
            Severity::Medium,
            "Missing SPF record",
            format!("{} has no SPF record, so any server can send mail claiming to be from it.", domain),
        )
        .with_recommendation(rec)
        .with_details(details)];
    };

    let mut findings = Vec::new();
    if spf.len() > 1 {
        findings.push(
            Finding::new(
                Category::Email,
                Severity::Medium,
                "Multiple SPF records",
                format!("{} publishes {} SPF records; receivers treat this as a permanent error.", domain, spf.len()),
            )
            .with_recommendation(rec)
            .with_details(details.clone()),
        );
    }

    let lower = first.to_ascii_lowercase();
    let all = lower
        .split_whitespace()
        .find(|t| t.trim_start_matches(['+', '-', '~', '?']) == "all");

    match all {
        Some("+all") | Some("all") => {
            findings.push(
                Finding::new(
                    Category::Email,
                    Severity::High,
                    "SPF allows any sender (+all)",
                    "The SPF record ends in '+all', authorising every server on the internet to send mail for this domain.",
                )
                .with_recommendation(rec)
                .with_details(details.clone()),
            );
        }
        Some("?all") => findings.push(
            Finding::new(Category::Email, Severity::Low, "SPF neutral policy (?all)", "The SPF record asserts nothing about unlisted senders.")
                .with_recommendation(rec)
                .with_details(details.clone()),
        ),
        Some("~all") => findings.push(
            Finding::new(Category::Email, Severity::Info, "SPF soft-fail policy (~all)", "Unlisted senders are soft-failed rather than rejected.")
                .with_recommendation(rec)
                .with_details(details.clone()),
        ),
        Some(_) => {}
        None => {
            if !lower.contains("redirect=") {
                findings.push(
                    Finding::new(Category::Email, Severity::Low, "SPF record without 'all' mechanism", "The SPF record has no terminating 'all' mechanism, so unlisted senders are neutral.")
                        .with_recommendation(rec)
                        .with_details(details.clone()),
                );
            }
        }
    }

    let lookups = spf_lookup_count(first);
    if lookups > SPF_LOOKUP_LIMIT {
        findings.push(
            Finding::new(
                Category::Email,
                Severity::Medium,
                "SPF exceeds DNS lookup limit",
                format!("The SPF record needs {} DNS lookups; more than {} makes evaluation fail.", lookups, SPF_LOOKUP_LIMIT),
            )
            .with_recommendation("Flatten includes so evaluation needs at most 10 lookups.")
            .with_details(details),
        );
    }

    findings
}

fn dmarc_tags(record: &str) -> HashMap<String, String> {
    record
        .split(';')
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            Some((k.trim().to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect()
}

pub fn analyze_dmarc(domain: &str, txt: &[String]) -> Vec<Finding> {
    let name = format!("_dmarc.{}", domain);
    let dmarc: Vec<String> = txt
        .iter()
        .filter(|r| r.trim().to_ascii_lowercase().starts_with("v=dmarc1"))
        .cloned()
        .collect();
    let details = record("DMARC", &name, &dmarc);
    let rec = "Publish 'v=DMARC1; p=reject; rua=mailto:...' once legitimate mail passes SPF/DKIM.";

    let Some(first) = dmarc.first() else {
        return vec![Finding::new(
            Category::Email,
            Severity::High,
            "Missing DMARC record",
            format!("{} has no DMARC policy; spoofed mail is not rejected and no reports are collected.", domain),
        )
        .with_recommendation(rec)
        .with_details(details)];
    };

    let tags = dmarc_tags(first);
    let mut findings = Vec::new();

    match tags.get("p").map(|p| p.to_ascii_lowercase()).as_deref() {
        Some("reject") => findings.push(
            Finding::new(Category::Email, Severity::Info, "DMARC policy set to reject", "Mail failing DMARC alignment is rejected.")
                .with_details(details.clone()),
        ),
        Some("quarantine") => findings.push(
            Finding::new(Category::Email, Severity::Info, "DMARC policy set to quarantine", "Mail failing DMARC alignment is sent to spam; 'reject' is stronger.")
                .with_recommendation(rec)
                .with_details(details.clone()),
        ),
        Some("none") => findings.push(
            Finding::new(Category::Email, Severity::Medium, "DMARC policy set to none", "DMARC is in monitoring mode only; spoofed mail is still delivered.")
                .with_recommendation(rec)
                .with_details(details.clone()),
        ),
        _ => findings.push(
            Finding::new(Category::Email, Severity::Medium, "DMARC record without valid policy", "The DMARC record has no valid 'p=' tag and is ignored by receivers.")
                .with_recommendation(rec)
                .with_details(details.clone()),
        ),
    }

    if let Some(pct) = tags.get("pct").and_then(|p| p.parse::<u32>().ok()) {
        if pct < 100 {
            findings.push(
                Finding::new(Category::Email, Severity::Low, "DMARC applies to a fraction of mail", format!("pct={} leaves {}% of failing mail unenforced.", pct, 100 - pct))
                    .with_recommendation(rec)
                    .with_details(details.clone()),
            );
        }
    }

    if !tags.contains_key("rua") {
        findings.push(
            Finding::new(Category::Email, Severity::Low, "DMARC aggregate reporting disabled", "No 'rua' address is set, so spoofing attempts go unnoticed.")
                .with_recommendation(rec)
                .with_details(details),
        );
    }

    findings
}

/// `found` holds (selector, record) pairs that answered with a DKIM key.
pub fn analyze_dkim(domain: &str, found: &[(String, String)]) -> Vec<Finding> {
    if !found.is_empty() {
        return Vec::new();
    }
    vec![Finding::new(
        Category::Email,
        Severity::Low,
        "No DKIM key found for common selectors",
        format!("None of {} common DKIM selectors returned a key for {}.", DKIM_SELECTORS.len(), domain),
    )
    .with_recommendation("Sign outbound mail with DKIM and publish the key under your selector.")
    .with_details(record("DKIM", &format!("_domainkey.{}", domain), &[]))]
}

pub fn analyze_dnssec(domain: &str, authenticated: Option<bool>) -> Vec<Finding> {
    match authenticated {
        Some(false) => vec![Finding::new(
            Category::Dns,
            Severity::Low,
            "DNSSEC not enabled",
            format!("Answers for {} are not DNSSEC-authenticated, so they can be spoofed in transit.", domain),
        )
        .with_recommendation("Enable DNSSEC signing at your DNS provider and publish the DS record.")],
        _ => Vec::new(),
    }
}

pub fn analyze_bimi(domain: &str, txt: &[String]) -> Vec<Finding> {
    let name = format!("default._bimi.{}", domain);
    let bimi: Vec<String> = txt
        .iter()
        .filter(|r| r.trim().to_ascii_lowercase().starts_with("v=bimi1"))
        .cloned()
        .collect();
    let (title, description) = if bimi.is_empty() {
        ("No BIMI record", "No brand indicator is published for supporting mail clients.")
    } else {
        ("BIMI record present", "A brand indicator is published for supporting mail clients.")
    };
    vec![Finding::new(Category::Email, Severity::Info, title, description).with_details(record("BIMI", &name, &bimi))]
}

pub fn analyze_caa(domain: &str, caa: &[String]) -> Vec<Finding> {
    if !caa.is_empty() {
        return Vec::new();
    }
    vec![Finding::new(
        Category::Dns,
        Severity::Low,
        "No CAA records",
        format!("{} does not restrict which certificate authorities may issue certificates for it.", domain),
    )
    .with_recommendation("Publish CAA records naming the CAs you use.")
    .with_details(record("CAA", domain, caa))]
}

pub struct EmailAuthProbe;

#[async_trait]
impl Probe for EmailAuthProbe {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<Vec<Finding>> {
        let domain = apex_domain(&ctx.target.domain).to_string();
        let resolver = SystemResolver::new(&ctx.config);
        tracing::info!(domain = %domain, "checking email authentication records");

        let (mut findings, dnssec) = tokio::join!(
            check_mail_records(&resolver, &domain),
            dnssec_authenticated(&ctx.client, &domain),
        );
        let dnssec = match dnssec {
            Ok(ad) => Some(ad),
            Err(e) => {
                tracing::debug!(domain = %domain, error = %e, "DNSSEC check failed");
                None
            }
        };
        findings.extend(analyze_dnssec(&domain, dnssec));
        Ok(findings)
    }
}

/// Look up and judge every mail-related record of `domain`: MX, SPF, DMARC,
/// DKIM under the common selectors, BIMI and CAA.
pub async fn check_mail_records(lookup: &dyn DnsLookup, domain: &str) -> Vec<Finding> {
    let dmarc_name = format!("_dmarc.{}", domain);
    let bimi_name = format!("default._bimi.{}", domain);
    let (mx, txt, dmarc, bimi, caa) = tokio::join!(
        lookup.mx(domain),
        lookup.txt(domain),
        lookup.txt(&dmarc_name),
        lookup.txt(&bimi_name),
        lookup.caa(domain),
    );

    let mut dkim = Vec::new();
    for selector in DKIM_SELECTORS {
        let name = format!("{}._domainkey.{}", selector, domain);
        for rec in lookup.txt(&name).await {
            let lower = rec.to_ascii_lowercase();
            if lower.starts_with("v=dkim1") || lower.contains("p=") {
                dkim.push((selector.to_string(), rec));
            }
        }
    }

    let mut findings = analyze_mx(domain, &mx);
    findings.extend(analyze_spf(domain, &txt));
    findings.extend(analyze_dmarc(domain, &dmarc));
    findings.extend(analyze_dkim(domain, &dkim));
    findings.extend(analyze_bimi(domain, &bimi));
    findings.extend(analyze_caa(domain, &caa));
    findings
}
