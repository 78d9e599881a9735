//! WAF/CDN detection: passive signature scoring plus a few requests a
//! protection layer should refuse.

pub mod detector;
pub mod signatures;

pub use detector::{detect_passive, is_blocked_response, WafMatch, WafProbe};
pub use signatures::WafSignature;
