pub mod cors_checker;
pub mod fingerprint;
pub mod info_leak;
pub mod security_headers;
pub mod sensitive_files;

pub use cors_checker::CorsProbe;
pub use fingerprint::DependencyProbe;
pub use info_leak::InfoLeakProbe;
pub use security_headers::HeaderProbe;
pub use sensitive_files::SensitiveFileProbe;
