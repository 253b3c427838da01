pub mod annotate;
pub mod engine;

pub use annotate::Annotator;
pub use engine::{Match, MatchEngine};
