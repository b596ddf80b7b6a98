pub mod latency;
pub mod routes;
