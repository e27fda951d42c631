use std::sync::Arc;

use crate::cache::OrderCache;
use crate::domain::order::Order;

// ============================================================================
// Query Service - Read-Only Order Lookups
// ============================================================================
//
// Answers come from the cache only, never from the store. A miss is a plain
// `Ok(None)`; the only error is asking before hydration finished.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Order cache is hydrating")]
    Hydrating,
}

#[derive(Clone)]
pub struct QueryService {
    cache: Arc<OrderCache>,
}

impl QueryService {
    pub fn new(cache: Arc<OrderCache>) -> Self {
        Self { cache }
    }

    pub async fn find_by_id(&self, order_uid: &str) -> Result<Option<Arc<Order>>, QueryError> {
        // The phase only ever moves forward, so checking it before the lookup
        // cannot report a stale Hydrating for a Ready cache.
        if !self.cache.is_ready().await {
            return Err(QueryError::Hydrating);
        }

        let order = self.cache.get(order_uid).await;
        tracing::debug!(order_uid = %order_uid, found = order.is_some(), "Order lookup");
        Ok(order)
    }

    pub async fn is_ready(&self) -> bool {
        self.cache.is_ready().await
    }
}
