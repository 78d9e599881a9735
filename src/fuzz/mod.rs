//! Active probes that send crafted input: SQL injection, forged host
//! headers, request bursts.

pub mod host_header;
pub mod rate_limit;
pub mod sqli;

pub use host_header::HostHeaderProbe;
pub use rate_limit::RateLimitProbe;
pub use sqli::SqlInjectionProbe;
