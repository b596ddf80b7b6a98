use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::warn;

use crate::error::{AppError, Result};

/// Runs per-key detail fetches in fixed-size concurrent windows with a
/// pause between windows, so a large backlog cannot hammer the upstream.
/// A failed key is recorded and skipped; it never aborts the batch.
pub struct BatchFetcher {
    window_size: usize,
    window_delay: Duration,
}

#[derive(Debug)]
pub struct BatchResults<K, V> {
    pub ok: Vec<(K, V)>,
    pub failed: Vec<K>,
}

impl BatchFetcher {
    pub fn new(window_size: usize, window_delay: Duration) -> Result<Self> {
        if window_size == 0 {
            return Err(AppError::Config(
                "fetch window size must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            window_size,
            window_delay,
        })
    }

    pub async fn fetch_all<K, V, F, Fut>(&self, keys: &[K], fetch_one: F) -> BatchResults<K, V>
    where
        K: Clone + Display,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut results = BatchResults {
            ok: Vec::new(),
            failed: Vec::new(),
        };
        if keys.is_empty() {
            return results;
        }

        let window_count = keys.len().div_ceil(self.window_size);
        for (i, window) in keys.chunks(self.window_size).enumerate() {
            let in_flight = window.iter().map(|key| {
                let key = key.clone();
                let fut = fetch_one(key.clone());
                async move { (key, fut.await) }
            });
            for (key, outcome) in join_all(in_flight).await {
                match outcome {
                    Ok(value) => results.ok.push((key, value)),
                    Err(e) => {
                        warn!("Detail fetch failed for {key}: {e}");
                        results.failed.push(key);
                    }
                }
            }
            if i + 1 < window_count {
                tokio::time::sleep(self.window_delay).await;
            }
        }
        results
    }
}
