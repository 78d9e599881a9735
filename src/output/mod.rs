pub mod report;
pub mod writer_csv;
pub mod writer_jsonl;

pub use report::{format_text_report, print_summary};
pub use writer_csv::write_csv;
pub use writer_jsonl::write_jsonl;
