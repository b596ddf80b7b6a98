pub mod market_store;
pub mod models;

pub use market_store::MarketStore;
