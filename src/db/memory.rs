use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::order::Order;
use super::store::{OrderStore, OrderStream, StoreError};

// ============================================================================
// In-Memory Order Store (tests only)
// ============================================================================
//
// Mirrors the Postgres semantics that matter to the core: order_uid is a
// primary key, text containing NUL is refused, inserts are all-or-nothing,
// load_all yields insertion order. Failures can be injected for pings, writes
// and the N-th hydrated row.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<Vec<Order>>,
    fail_writes: AtomicBool,
    fail_pings: AtomicBool,
    fail_read_at: Mutex<Option<usize>>,
    insert_calls: AtomicUsize,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        let store = Self::new();
        *store.orders.lock().unwrap() = orders;
        store
    }

    /// Make every subsequent insert fail with a write error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent ping fail with a connection error.
    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Make load_all yield a read error in place of the row at `index`.
    pub fn fail_read_at(&self, index: usize) {
        *self.fail_read_at.lock().unwrap() = Some(index);
    }

    pub fn row_count(&self, order_uid: &str) -> usize {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .filter(|order| order.order_uid == order_uid)
            .count()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .orders
            .lock()
            .unwrap()
            .iter()
            .map(|order| order.order_uid.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn load_all(&self) -> OrderStream<'_> {
        let snapshot = self.orders.lock().unwrap().clone();
        let fail_at = *self.fail_read_at.lock().unwrap();

        let rows = snapshot.into_iter().enumerate().map(move |(index, order)| {
            if fail_at == Some(index) {
                Err(StoreError::Read(sqlx::Error::RowNotFound))
            } else {
                Ok(order)
            }
        });

        stream::iter(rows).boxed()
    }

    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                order_uid: order.order_uid.clone(),
                source: sqlx::Error::PoolTimedOut,
            });
        }

        if contains_nul(order) {
            return Err(StoreError::Rejected {
                order_uid: order.order_uid.clone(),
                source: sqlx::Error::Protocol(
                    "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
                ),
            });
        }

        let mut orders = self.orders.lock().unwrap();
        if orders.iter().any(|existing| existing.order_uid == order.order_uid) {
            return Err(StoreError::Duplicate(order.order_uid.clone()));
        }
        orders.push(order.clone());
        Ok(())
    }
}

fn contains_nul(order: &Order) -> bool {
    let delivery = &order.delivery;
    let payment = &order.payment;

    let mut text = vec![
        &order.order_uid,
        &order.track_number,
        &order.entry,
        &order.locale,
        &order.internal_signature,
        &order.customer_id,
        &order.delivery_service,
        &order.shardkey,
        &order.oof_shard,
        &delivery.name,
        &delivery.phone,
        &delivery.zip,
        &delivery.city,
        &delivery.address,
        &delivery.region,
        &delivery.email,
        &payment.transaction,
        &payment.request_id,
        &payment.currency,
        &payment.provider,
        &payment.bank,
    ];
    for item in &order.items {
        text.extend([&item.track_number, &item.rid, &item.name, &item.size, &item.brand]);
    }

    text.iter().any(|value| value.contains('\0'))
}
