use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::order::Order;

// ============================================================================
// Order Store - Durable Persistence Seam
// ============================================================================
//
// The store is authoritative; the cache is derived from it. Implementations:
// - PostgresOrderStore (production, sqlx pool)
// - InMemoryOrderStore (tests, with failure injection)
//
// ============================================================================

/// One pass over every stored order, each item a complete aggregate.
pub type OrderStream<'a> = BoxStream<'a, Result<Order, StoreError>>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Validate connectivity.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Stream every stored order. The stream is lazy, finite and can be
    /// consumed once; a failure is yielded as an error item and the caller
    /// is expected to stop there.
    fn load_all(&self) -> OrderStream<'_>;

    /// Persist header, payment, delivery and items atomically.
    ///
    /// On error nothing was written.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to connect to the order store: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Failed to apply the order schema: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("Failed to read orders: {0}")]
    Read(#[source] sqlx::Error),

    #[error("Order {order_uid} is missing its {part} record")]
    Incomplete {
        order_uid: String,
        part: &'static str,
    },

    #[error("Failed to write order {order_uid}: {source}")]
    Write {
        order_uid: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Order {0} already exists")]
    Duplicate(String),

    /// The database refused the values themselves (bad data or a violated
    /// constraint), so the same order will never be accepted.
    #[error("Order {order_uid} was refused by the store: {source}")]
    Rejected {
        order_uid: String,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    /// Retrying the same write can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::Duplicate(_) | StoreError::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_refused_writes_are_permanent() {
        assert!(StoreError::Duplicate("O1".to_string()).is_permanent());

        let rejected = StoreError::Rejected {
            order_uid: "O1".to_string(),
            source: sqlx::Error::Protocol("invalid byte sequence".to_string()),
        };
        assert!(rejected.is_permanent());

        let write = StoreError::Write {
            order_uid: "O1".to_string(),
            source: sqlx::Error::PoolTimedOut,
        };
        assert!(!write.is_permanent());
        assert!(!StoreError::Read(sqlx::Error::PoolClosed).is_permanent());
    }

    #[test]
    fn test_incomplete_names_the_missing_part() {
        let err = StoreError::Incomplete {
            order_uid: "O7".to_string(),
            part: "payment",
        };
        assert_eq!(err.to_string(), "Order O7 is missing its payment record");
    }
}
