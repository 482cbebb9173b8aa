//! Region factory: owns the store client, the known regions and the sweeper.
//!
//! Two flavors:
//! - [`FactoryFlavor::PerInstance`] connects its own client and flushes the
//!   whole backend on stop; it assumes it owns the backend outright.
//! - [`FactoryFlavor::Shared`] joins one process-wide client and flushes only
//!   when the last shared factory stops.

pub mod shared;
pub mod sweeper;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

pub use sweeper::{sweep_once, KnownRegions, Sweeper};

use crate::config::{Config, RegionSettings};
use crate::error::{CacheError, Result};
use crate::metrics::CacheMetrics;
use crate::region::{self, CacheDataDescription, GeneralDataRegion, RegionKind, TransactionalDataRegion};
use crate::store::StoreClient;
use crate::strategy::{AccessStrategy, AccessType, CacheValue};

/// How a factory relates to the backend it connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactoryFlavor {
    /// Sole owner of the backend.
    #[default]
    PerInstance,
    /// One of possibly many factories sharing a process-wide client.
    Shared,
}

struct Running {
    client: Arc<StoreClient>,
    sweeper: Sweeper,
}

/// Builds regions and access strategies over one store client.
///
/// Dropping a started factory without [`stop`](Self::stop) still ends its
/// sweeper, but skips the flush.
pub struct RegionFactory {
    config: Config,
    flavor: FactoryFlavor,
    metrics: RwLock<CacheMetrics>,
    regions: KnownRegions,
    running: Mutex<Option<Running>>,
}

impl RegionFactory {
    pub fn new(config: Config, flavor: FactoryFlavor) -> Result<Self> {
        Self::with_metrics(config, flavor, CacheMetrics::standalone())
    }

    /// Like [`new`](Self::new), counting into caller-registered metrics.
    pub fn with_metrics(config: Config, flavor: FactoryFlavor, metrics: CacheMetrics) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            flavor,
            metrics: RwLock::new(metrics),
            regions: KnownRegions::default(),
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn flavor(&self) -> FactoryFlavor {
        self.flavor
    }

    /// The counters regions built by this factory record into. A shared
    /// factory that joined a running client reports that client's counters.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.read().clone()
    }

    /// Connect the store client and start the sweeper. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!(flavor = ?self.flavor, "Region factory already started");
            return Ok(());
        }

        info!(flavor = ?self.flavor, backend = ?self.config.backend.kind, "Starting region factory");
        let metrics = self.metrics();
        let client = match self.flavor {
            FactoryFlavor::PerInstance => Arc::new(StoreClient::connect(&self.config, metrics).await?),
            FactoryFlavor::Shared => {
                let client = shared::acquire(&self.config, metrics).await?;
                *self.metrics.write() = client.metrics().clone();
                client
            }
        };
        let sweeper = Sweeper::spawn(
            Arc::clone(&client),
            Arc::clone(&self.regions),
            self.config.cache.sweep_interval(),
        );

        *running = Some(Running { client, sweeper });
        info!("Region factory started");
        Ok(())
    }

    /// Stop the sweeper, then flush or release the client.
    ///
    /// The sweeper has exited before the backend is touched. Stopping a
    /// factory that isn't running does nothing.
    pub async fn stop(&self) -> Result<()> {
        let Some(Running { client, sweeper }) = self.running.lock().await.take() else {
            return Ok(());
        };

        debug!(flavor = ?self.flavor, "Region factory stopping");
        sweeper.stop().await;

        match self.flavor {
            FactoryFlavor::PerInstance => client.flush_all().await?,
            FactoryFlavor::Shared => {
                drop(client);
                shared::release().await?;
            }
        }
        info!("Region factory stopped");
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// The connected client.
    pub async fn client(&self) -> Result<Arc<StoreClient>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| Arc::clone(&running.client))
            .ok_or_else(|| CacheError::Configuration("region factory has not been started".to_string()))
    }

    // ─── Region builders ────────────────────────────────────────────────────

    pub async fn build_entity_region(
        &self,
        name: &str,
        settings: RegionSettings,
        description: CacheDataDescription,
    ) -> Result<Arc<TransactionalDataRegion>> {
        self.build_transactional(name, RegionKind::Entity, settings, description).await
    }

    pub async fn build_collection_region(
        &self,
        name: &str,
        settings: RegionSettings,
        description: CacheDataDescription,
    ) -> Result<Arc<TransactionalDataRegion>> {
        self.build_transactional(name, RegionKind::Collection, settings, description).await
    }

    pub async fn build_natural_id_region(
        &self,
        name: &str,
        settings: RegionSettings,
        description: CacheDataDescription,
    ) -> Result<Arc<TransactionalDataRegion>> {
        self.build_transactional(name, RegionKind::NaturalId, settings, description).await
    }

    pub async fn build_query_results_region(
        &self,
        name: &str,
        settings: RegionSettings,
    ) -> Result<Arc<GeneralDataRegion>> {
        self.build_general(name, RegionKind::QueryResults, settings).await
    }

    pub async fn build_timestamps_region(&self, name: &str, settings: RegionSettings) -> Result<Arc<GeneralDataRegion>> {
        self.build_general(name, RegionKind::Timestamps, settings).await
    }

    /// Wrap a region in the strategy for `access_type`.
    ///
    /// Natural-id regions under the transactional type also get the client
    /// for batched lookups.
    pub fn create_access_strategy<V: CacheValue>(
        &self,
        region: Arc<TransactionalDataRegion>,
        access_type: AccessType,
    ) -> Result<AccessStrategy<V>> {
        if region.kind() == RegionKind::NaturalId {
            let client = Arc::clone(region.client());
            return AccessStrategy::for_natural_ids(region, access_type, client);
        }
        AccessStrategy::new(region, access_type)
    }

    pub fn default_access_type(&self) -> AccessType {
        AccessType::ReadWrite
    }

    pub fn is_minimal_puts_enabled_by_default(&self) -> bool {
        true
    }

    pub fn next_timestamp(&self) -> i64 {
        region::next_timestamp()
    }

    /// Names of every region built so far.
    pub fn known_regions(&self) -> Vec<String> {
        self.regions.read().iter().cloned().collect()
    }

    async fn build_transactional(
        &self,
        name: &str,
        kind: RegionKind,
        settings: RegionSettings,
        description: CacheDataDescription,
    ) -> Result<Arc<TransactionalDataRegion>> {
        let client = self.client().await?;
        trace!(region = name, %kind, "Building region");
        let region = TransactionalDataRegion::new(
            client,
            name,
            kind,
            description,
            settings.expiry_or(&self.config.cache),
            settings.lock_timeout_or(&self.config.cache),
        );
        self.register(name);
        Ok(Arc::new(region))
    }

    async fn build_general(
        &self,
        name: &str,
        kind: RegionKind,
        settings: RegionSettings,
    ) -> Result<Arc<GeneralDataRegion>> {
        let client = self.client().await?;
        trace!(region = name, %kind, "Building region");
        let region = GeneralDataRegion::new(
            client,
            name,
            kind,
            settings.expiry_or(&self.config.cache),
            settings.lock_timeout_or(&self.config.cache),
        );
        self.register(name);
        Ok(Arc::new(region))
    }

    fn register(&self, name: &str) {
        self.regions.write().insert(name.to_string());
    }
}

impl std::fmt::Debug for RegionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionFactory")
            .field("flavor", &self.flavor)
            .field("regions", &self.known_regions())
            .finish()
    }
}
