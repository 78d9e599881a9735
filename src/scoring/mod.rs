pub mod score;

pub use score::{calculate_score, generate_summary, score_band, ScoreBand};
