// ============================================================================
// Order Payload Errors
// ============================================================================

/// Why an inbound payload could not become an [`Order`](super::Order).
///
/// All variants are permanent: the same bytes will never decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload is not a valid order document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Order has an empty order_uid")]
    MissingOrderUid,

    #[error("Item {index} of order {order_uid} has a negative {field}")]
    NegativeAmount {
        order_uid: String,
        index: usize,
        field: &'static str,
    },
}
