// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (Delivery, Payment, Item)
// - Aggregate (Order) and payload decoding
// - Errors (DecodeError)
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod aggregate;

#[cfg(test)]
pub mod fixtures;

pub use value_objects::*;
pub use errors::*;
pub use aggregate::*;
