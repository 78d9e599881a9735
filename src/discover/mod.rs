//! Attack-surface discovery: subdomains (certificate transparency plus
//! wordlist), dangling CNAMEs and a bounded same-site crawl.

pub mod crawler;
pub mod crtsh;
pub mod subdomain;
pub mod takeover;

pub use crawler::{crawl, CrawlResult};
pub use subdomain::{analyze_subdomains, enumerate_subdomains, SubdomainStatus};
pub use takeover::TakeoverProbe;
