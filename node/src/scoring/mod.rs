pub mod pools;
pub mod version;
pub mod workers;

pub use pools::{compute_composite_score, MiningPoolScorer, SubScores};
pub use version::{version_accepted, NodeVersion};
pub use workers::{ScoreSummary, WorkerScorer};
