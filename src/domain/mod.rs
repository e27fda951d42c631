// ============================================================================
// Domain Layer
// ============================================================================
//
// Order aggregate as it travels through the system: decoded from the message
// feed, written to Postgres, held in the cache and served to queries.
//
// ============================================================================

pub mod order;
