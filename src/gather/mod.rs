pub mod secrets;

pub use secrets::{mask_secret, scan_content, SecretScanner};
