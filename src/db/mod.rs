// ============================================================================
// Persistence Layer
// ============================================================================
//
// - store/    - OrderStore trait and StoreError
// - postgres/ - sqlx-backed implementation
// - memory/   - in-memory implementation for tests
//
// ============================================================================

mod store;
mod postgres;

#[cfg(test)]
pub mod memory;

pub use store::{OrderStore, OrderStream, StoreError};
pub use postgres::PostgresOrderStore;
