pub mod batch;
pub mod metadata;
pub mod reconciler;

pub use reconciler::Reconciler;
