pub mod queue;
pub mod scheduler;
pub mod worker;

pub use queue::JobQueue;
pub use worker::JobWorker;
