use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::value_objects::{Delivery, Item, Payment};
use super::errors::DecodeError;

// ============================================================================
// Order Aggregate
// ============================================================================
//
// Root entity keyed by `order_uid`. An Order is only ever handled as a whole:
// it is decoded whole, written in one transaction, and swapped into the cache
// as a single value.
//
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i64,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

impl Order {
    /// Decode and validate a raw message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let order: Order = serde_json::from_slice(payload)?;
        order.validate()?;
        Ok(order)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.order_uid.trim().is_empty() {
            return Err(DecodeError::MissingOrderUid);
        }

        for (index, item) in self.items.iter().enumerate() {
            let field = if item.price < 0 {
                "price"
            } else if item.total_price < 0 {
                "total_price"
            } else {
                continue;
            };

            return Err(DecodeError::NegativeAmount {
                order_uid: self.order_uid.clone(),
                index,
                field,
            });
        }

        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.order_uid
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::{sample_order, sample_payload};

    #[test]
    fn test_decode_full_payload() {
        let order = Order::from_payload(&sample_payload("b563feb7b2b84b6test")).unwrap();

        assert_eq!(order.id(), "b563feb7b2b84b6test");
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].name, "Mascaras");
        assert_eq!(order.items[1].name, "Lipstick");
        assert_eq!(order.date_created.to_rfc3339(), "2021-11-26T06:22:19+00:00");
    }

    #[test]
    fn test_decode_equals_serialized_order() {
        let original = sample_order("O1");
        let bytes = serde_json::to_vec(&original).unwrap();

        assert_eq!(Order::from_payload(&bytes).unwrap(), original);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Order::from_payload(b"not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_zeroes_missing_payment() {
        let mut value: serde_json::Value = serde_json::from_slice(&sample_payload("O1")).unwrap();
        value.as_object_mut().unwrap().remove("payment");

        let order = Order::from_payload(value.to_string().as_bytes()).unwrap();
        assert_eq!(order.payment, Payment::default());
        assert_eq!(order.items.len(), 2);
    }

    #[test]
    fn test_decode_sparse_payload() {
        let payload = br#"{"order_uid":"O1","items":[{"price":100}],"payment":{"amount":100}}"#;

        let order = Order::from_payload(payload).unwrap();
        assert_eq!(order.id(), "O1");
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].price, 100);
        assert_eq!(order.payment.amount, 100);
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.date_created, DateTime::<Utc>::default());
    }

    #[test]
    fn test_decode_rejects_missing_order_uid() {
        let err = Order::from_payload(br#"{"items":[{"price":100}]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingOrderUid));
    }

    #[test]
    fn test_decode_rejects_wrong_field_type() {
        let err = Order::from_payload(br#"{"order_uid":"O1","sm_id":"ninety-nine"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_rejects_blank_order_uid() {
        let err = Order::from_payload(&sample_payload("   ")).unwrap_err();
        assert!(matches!(err, DecodeError::MissingOrderUid));
    }

    #[test]
    fn test_decode_rejects_negative_item_price() {
        let mut order = sample_order("O1");
        order.items[1].price = -5;
        let bytes = serde_json::to_vec(&order).unwrap();

        match Order::from_payload(&bytes).unwrap_err() {
            DecodeError::NegativeAmount { order_uid, index, field } => {
                assert_eq!(order_uid, "O1");
                assert_eq!(index, 1);
                assert_eq!(field, "price");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_order_without_items_is_valid() {
        let mut order = sample_order("O1");
        order.items.clear();
        let bytes = serde_json::to_vec(&order).unwrap();

        assert!(Order::from_payload(&bytes).unwrap().items.is_empty());
    }
}
