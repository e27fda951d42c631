use futures_util::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::{OrderStream, StoreError};
use crate::domain::order::Order;

// ============================================================================
// Order Cache - In-Memory Read Model
// ============================================================================
//
// Single source of truth for queries. One RwLock guards both the map and the
// startup phase: reads take a shared hold, writes an exclusive hold, and no
// hold ever spans store I/O.
//
// Values are Arc<Order>, so replacing an entry swaps a whole aggregate and a
// reader that already cloned the Arc keeps a complete snapshot.
//
// Phases:
//   Hydrating --load_from ok--> Ready
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CachePhase {
    Hydrating,
    Ready,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Hydration aborted after {loaded} orders: {source}")]
    Hydration {
        loaded: usize,
        #[source]
        source: StoreError,
    },

    #[error("Cache is already hydrated")]
    AlreadyHydrated,
}

struct CacheState {
    phase: CachePhase,
    orders: HashMap<String, Arc<Order>>,
}

pub struct OrderCache {
    state: RwLock<CacheState>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                phase: CachePhase::Hydrating,
                orders: HashMap::new(),
            }),
        }
    }

    pub async fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        self.state.read().await.orders.get(order_uid).cloned()
    }

    /// Insert or replace the order under its identifier.
    pub async fn put(&self, order: Order) {
        let order = Arc::new(order);
        let mut state = self.state.write().await;
        state.orders.insert(order.id().to_string(), order);
    }

    /// Populate the cache from one pass over the store.
    ///
    /// Orders are staged outside the lock and published in a single write
    /// hold once the stream is exhausted. On the first error nothing is
    /// published and the cache stays in `Hydrating`. Entries already present
    /// can only come from a `put` racing hydration, and they win.
    pub async fn load_from(&self, mut orders: OrderStream<'_>) -> Result<usize, CacheError> {
        if self.is_ready().await {
            return Err(CacheError::AlreadyHydrated);
        }

        let mut staged: HashMap<String, Arc<Order>> = HashMap::new();
        while let Some(next) = orders.next().await {
            match next {
                Ok(order) => {
                    staged.insert(order.id().to_string(), Arc::new(order));
                }
                Err(source) => {
                    return Err(CacheError::Hydration {
                        loaded: staged.len(),
                        source,
                    });
                }
            }
        }

        let loaded = staged.len();
        let mut state = self.state.write().await;
        for (order_uid, order) in staged {
            state.orders.entry(order_uid).or_insert(order);
        }
        state.phase = CachePhase::Ready;

        tracing::info!(
            loaded = loaded,
            cached = state.orders.len(),
            "✅ Order cache hydrated"
        );

        Ok(loaded)
    }

    pub async fn phase(&self) -> CachePhase {
        self.state.read().await.phase
    }

    pub async fn is_ready(&self) -> bool {
        self.phase().await == CachePhase::Ready
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cached identifiers, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.orders.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for OrderCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
