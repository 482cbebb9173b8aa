//! The process-wide store client behind shared factories.
//!
//! Every started shared factory holds one reference. The backend is flushed
//! and the client dropped only when the last reference is released, so a
//! factory never wipes data another live factory is still serving.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::metrics::CacheMetrics;
use crate::store::StoreClient;

struct Shared {
    client: Arc<StoreClient>,
    refs: usize,
}

// Async mutex: connecting happens while the slot is held so two factories
// starting at once can't both connect.
static SHARED: Lazy<Mutex<Option<Shared>>> = Lazy::new(|| Mutex::new(None));

/// Join the shared client, connecting it on first use.
///
/// `config` and `metrics` are only used by the call that connects.
pub async fn acquire(config: &Config, metrics: CacheMetrics) -> Result<Arc<StoreClient>> {
    let mut slot = SHARED.lock().await;
    if let Some(shared) = slot.as_mut() {
        shared.refs += 1;
        debug!(refs = shared.refs, "Joined shared store client");
        return Ok(Arc::clone(&shared.client));
    }

    let client = Arc::new(StoreClient::connect(config, metrics).await?);
    *slot = Some(Shared {
        client: Arc::clone(&client),
        refs: 1,
    });
    info!("Shared store client connected");
    Ok(client)
}

/// Drop one reference; the last one out flushes the backend.
pub async fn release() -> Result<()> {
    let mut slot = SHARED.lock().await;
    let Some(shared) = slot.as_mut() else {
        return Ok(());
    };

    shared.refs = shared.refs.saturating_sub(1);
    if shared.refs > 0 {
        debug!(refs = shared.refs, "Released shared store client");
        return Ok(());
    }

    let client = Arc::clone(&shared.client);
    *slot = None;
    client.flush_all().await?;
    info!("Last reference released; shared store client flushed");
    Ok(())
}

/// Live references to the shared client.
pub async fn reference_count() -> usize {
    SHARED.lock().await.as_ref().map_or(0, |shared| shared.refs)
}
