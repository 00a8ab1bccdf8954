pub mod composite;
pub mod index_scorer;

pub use index_scorer::{score_coin, IndexScorer};
