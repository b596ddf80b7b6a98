pub mod engine;
pub mod heuristic;
pub mod providers;

pub use engine::EvaluationEngine;
