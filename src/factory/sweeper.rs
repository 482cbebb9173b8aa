//! Expiration sweeper.
//!
//! The backend has no per-field TTL, so entries expire by sweeping: on every
//! tick, each known region's TTL index is scanned for rows whose expiry time
//! has passed and those entries are deleted.
//!
//! One sweeper runs per started factory. Stopping it signals the task and
//! waits for it to exit, so a sweep already in progress finishes before the
//! client is torn down and none starts afterwards.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::{now_millis, StoreClient};

/// Region names the sweeper covers, shared with the factory that registers them.
pub type KnownRegions = Arc<RwLock<BTreeSet<String>>>;

/// A running sweeper task.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(client: Arc<StoreClient>, regions: KnownRegions, period: Duration) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(client, regions, period, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Expiration sweeper ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn sweep_loop(
    client: Arc<StoreClient>,
    regions: KnownRegions,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_ms = period.as_millis() as u64, "Expiration sweeper started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                sweep_once(&client, &regions).await;
            }
        }
    }

    info!("Expiration sweeper stopped");
}

/// Expire every known region once. Returns the number of entries removed.
///
/// A failing region is logged and skipped; the rest are still swept.
pub async fn sweep_once(client: &StoreClient, regions: &KnownRegions) -> usize {
    let names: Vec<String> = regions.read().iter().cloned().collect();
    let now = now_millis();

    let mut expired = 0;
    for region in &names {
        match client.expire_region(region, now).await {
            Ok(count) => expired += count,
            Err(e) => {
                debug!(region = %region, error = %e, "Sweep failed for region; continuing");
            }
        }
    }

    client.metrics().record_sweep(expired as u64);
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::CacheMetrics;
    use crate::store::MemoryBackend;

    fn client() -> Arc<StoreClient> {
        Arc::new(StoreClient::new(
            Arc::new(MemoryBackend::new()),
            &Config::default(),
            CacheMetrics::standalone(),
        ))
    }

    #[tokio::test]
    async fn test_sweep_once_covers_known_regions_only() {
        let client = client();
        client.put_with_ttl("known", "a", &1u32, 1).await.unwrap();
        client.put_with_ttl("unknown", "b", &2u32, 1).await.unwrap();

        let regions: KnownRegions = Arc::new(RwLock::new(BTreeSet::from(["known".to_string()])));
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(sweep_once(&client, &regions).await, 1);
        assert!(!client.exists("known", "a").await);
        assert!(client.exists("unknown", "b").await);
        assert_eq!(client.metrics().sweeps(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let sweeper = Sweeper::spawn(client(), KnownRegions::default(), Duration::from_secs(3_600));

        let stopped = tokio::time::timeout(Duration::from_secs(1), sweeper.stop()).await;
        assert!(stopped.is_ok());
    }
}
