use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::config::PostgresConfig;
use crate::domain::order::{Delivery, Item, Order, Payment};
use super::store::{OrderStore, OrderStream, StoreError};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Orders are normalized over four tables (orders, delivery, payments, items),
// all keyed by order_uid. Writes go through a single transaction; reads
// assemble one aggregate per orders row. The pool is shared by hydration and
// every ingestion write.
//
// ============================================================================

const SCHEMA: &str = include_str!("schema.sql");

const SELECT_ORDERS: &str = "SELECT order_uid, track_number, entry, locale, internal_signature,
        customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
 FROM orders
 ORDER BY order_uid";

const SELECT_DELIVERY: &str = "SELECT name, phone, zip, city, address, region, email
 FROM delivery
 WHERE order_uid = $1";

const SELECT_PAYMENT: &str = "SELECT \"transaction\", request_id, currency, provider, amount,
        payment_dt, bank, delivery_cost, goods_total, custom_fee
 FROM payments
 WHERE order_uid = $1";

const SELECT_ITEMS: &str = "SELECT chrt_id, track_number, price, rid, name, sale, size,
        total_price, nm_id, brand, status
 FROM items
 WHERE order_uid = $1
 ORDER BY position ASC";

const INSERT_ORDER: &str = "INSERT INTO orders (
        order_uid, track_number, entry, locale, internal_signature, customer_id,
        delivery_service, shardkey, sm_id, date_created, oof_shard
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_PAYMENT: &str = "INSERT INTO payments (
        order_uid, \"transaction\", request_id, currency, provider, amount,
        payment_dt, bank, delivery_cost, goods_total, custom_fee
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_DELIVERY: &str = "INSERT INTO delivery (
        order_uid, name, phone, zip, city, address, region, email
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const INSERT_ITEM: &str = "INSERT INTO items (
        order_uid, position, chrt_id, track_number, price, rid, name, sale,
        size, total_price, nm_id, brand, status
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Open the pool and validate it with a ping.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(StoreError::Connection)?;

        let store = Self::from_pool(pool);
        store.ping().await?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = config.max_connections,
            "✅ Connected to PostgreSQL"
        );

        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the order tables if they don't exist yet.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Schema)?;

        tracing::info!("Order schema is in place");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }

    /// Read the owned records of one order and assemble the aggregate.
    ///
    /// A missing delivery or payment row is an error, never a default.
    async fn assemble(&self, header: PgRow) -> Result<Order, StoreError> {
        let order_uid: String = header.try_get("order_uid").map_err(StoreError::Read)?;

        let delivery_row = sqlx::query(SELECT_DELIVERY)
            .bind(order_uid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Read)?
            .ok_or_else(|| StoreError::Incomplete {
                order_uid: order_uid.clone(),
                part: "delivery",
            })?;

        let payment_row = sqlx::query(SELECT_PAYMENT)
            .bind(order_uid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Read)?
            .ok_or_else(|| StoreError::Incomplete {
                order_uid: order_uid.clone(),
                part: "payment",
            })?;

        let items = sqlx::query(SELECT_ITEMS)
            .bind(order_uid.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Read)?
            .iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Read)?;

        let delivery = delivery_from_row(&delivery_row).map_err(StoreError::Read)?;
        let payment = payment_from_row(&payment_row).map_err(StoreError::Read)?;

        tracing::debug!(
            order_uid = %order_uid,
            item_count = items.len(),
            "Loaded order from PostgreSQL"
        );

        order_from_row(&header, delivery, payment, items).map_err(StoreError::Read)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Connection)?;
        Ok(())
    }

    fn load_all(&self) -> OrderStream<'_> {
        sqlx::query(SELECT_ORDERS)
            .fetch(&self.pool)
            .map_err(StoreError::Read)
            .and_then(move |header| self.assemble(header))
            .boxed()
    }

    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| write_error(order, e))?;

        if let Err(e) = write_order(&mut tx, order).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    order_uid = %order.order_uid,
                    error = %rollback_err,
                    "Rollback failed, connection will be discarded"
                );
            }
            return Err(write_error(order, e));
        }

        tx.commit().await.map_err(|e| write_error(order, e))?;

        tracing::debug!(
            order_uid = %order.order_uid,
            item_count = order.items.len(),
            "Committed order to PostgreSQL"
        );

        Ok(())
    }
}

async fn write_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_ORDER)
        .bind(order.order_uid.as_str())
        .bind(order.track_number.as_str())
        .bind(order.entry.as_str())
        .bind(order.locale.as_str())
        .bind(order.internal_signature.as_str())
        .bind(order.customer_id.as_str())
        .bind(order.delivery_service.as_str())
        .bind(order.shardkey.as_str())
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(order.oof_shard.as_str())
        .execute(&mut **tx)
        .await?;

    let payment = &order.payment;
    sqlx::query(INSERT_PAYMENT)
        .bind(order.order_uid.as_str())
        .bind(payment.transaction.as_str())
        .bind(payment.request_id.as_str())
        .bind(payment.currency.as_str())
        .bind(payment.provider.as_str())
        .bind(payment.amount)
        .bind(payment.payment_dt)
        .bind(payment.bank.as_str())
        .bind(payment.delivery_cost)
        .bind(payment.goods_total)
        .bind(payment.custom_fee)
        .execute(&mut **tx)
        .await?;

    let delivery = &order.delivery;
    sqlx::query(INSERT_DELIVERY)
        .bind(order.order_uid.as_str())
        .bind(delivery.name.as_str())
        .bind(delivery.phone.as_str())
        .bind(delivery.zip.as_str())
        .bind(delivery.city.as_str())
        .bind(delivery.address.as_str())
        .bind(delivery.region.as_str())
        .bind(delivery.email.as_str())
        .execute(&mut **tx)
        .await?;

    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(INSERT_ITEM)
            .bind(order.order_uid.as_str())
            .bind(position as i32)
            .bind(item.chrt_id)
            .bind(item.track_number.as_str())
            .bind(item.price)
            .bind(item.rid.as_str())
            .bind(item.name.as_str())
            .bind(item.sale)
            .bind(item.size.as_str())
            .bind(item.total_price)
            .bind(item.nm_id)
            .bind(item.brand.as_str())
            .bind(item.status)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

fn write_error(order: &Order, source: sqlx::Error) -> StoreError {
    let order_uid = order.order_uid.clone();

    let (duplicate, refused) = match &source {
        sqlx::Error::Database(db) => (
            db.is_unique_violation(),
            db.code().is_some_and(|code| is_refusal(&code)),
        ),
        _ => (false, false),
    };

    if duplicate {
        StoreError::Duplicate(order_uid)
    } else if refused {
        StoreError::Rejected { order_uid, source }
    } else {
        StoreError::Write { order_uid, source }
    }
}

/// SQLSTATE class 22 (data exception) or 23 (integrity constraint violation).
fn is_refusal(sqlstate: &str) -> bool {
    sqlstate.starts_with("22") || sqlstate.starts_with("23")
}

// ============================================================================
// Row Mapping
// ============================================================================

fn order_from_row(
    row: &PgRow,
    delivery: Delivery,
    payment: Payment,
    items: Vec<Item>,
) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery,
        payment,
        items,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, sqlx::Error> {
    Ok(Delivery {
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        transaction: row.try_get("transaction")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

#[cfg(test)]
mod sqlstate_tests {
    use super::is_refusal;

    #[test]
    fn test_data_and_constraint_classes_are_refusals() {
        assert!(is_refusal("22021")); // character_not_in_repertoire (NUL byte)
        assert!(is_refusal("22003")); // numeric_value_out_of_range
        assert!(is_refusal("23502")); // not_null_violation
        assert!(is_refusal("23503")); // foreign_key_violation
    }

    #[test]
    fn test_connection_and_resource_errors_are_not_refusals() {
        assert!(!is_refusal("08006")); // connection_failure
        assert!(!is_refusal("53300")); // too_many_connections
        assert!(!is_refusal("40001")); // serialization_failure
        assert!(!is_refusal("57P01")); // admin_shutdown
    }
}

// ============================================================================
// Integration Tests
// ============================================================================
//
// Require Docker. Run with: cargo test -- --ignored
//
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::sample_order;
    use testcontainers::{runners::AsyncRunner, ContainerAsync};
    use testcontainers_modules::postgres::Postgres as PostgresImage;

    async fn setup_store() -> (ContainerAsync<PostgresImage>, PostgresOrderStore) {
        let container = PostgresImage::default()
            .start()
            .await
            .expect("Failed to start postgres container");

        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get postgres port");

        let config = PostgresConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
            max_connections: 4,
            acquire_timeout_secs: 5,
            apply_schema: true,
        };

        let mut retries = 0;
        loop {
            if let Ok(store) = PostgresOrderStore::connect(&config).await {
                store.apply_schema().await.expect("Failed to apply schema");
                return (container, store);
            }

            assert!(retries < 30, "Postgres never became reachable");
            retries += 1;
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    async fn count_rows(store: &PostgresOrderStore, table: &str, order_uid: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table} WHERE order_uid = $1"))
            .bind(order_uid)
            .fetch_one(&store.pool)
            .await
            .expect("count query failed")
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_insert_then_load_all_round_trips() {
        let (_container, store) = setup_store().await;

        let first = sample_order("O1");
        let mut second = sample_order("O2");
        second.items.reverse();

        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let loaded: Vec<Order> = store.load_all().try_collect().await.unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_duplicate_order_is_rejected() {
        let (_container, store) = setup_store().await;

        store.insert(&sample_order("O1")).await.unwrap();
        let err = store.insert(&sample_order("O1")).await.unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(ref id) if id == "O1"));
        assert_eq!(count_rows(&store, "items", "O1").await, 2);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_failed_item_write_rolls_back_everything() {
        let (_container, store) = setup_store().await;

        // Postgres refuses NUL bytes in text, so the second item write fails
        // after the header, payment and delivery rows went in.
        let mut order = sample_order("O1");
        order.items[1].name = "bad\0name".to_string();

        let err = store.insert(&order).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(err.is_permanent());

        for table in ["orders", "payments", "delivery", "items"] {
            assert_eq!(count_rows(&store, table, "O1").await, 0, "{table} not rolled back");
        }
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_order_without_payment_fails_hydration() {
        let (_container, store) = setup_store().await;

        store.insert(&sample_order("O1")).await.unwrap();
        sqlx::query("DELETE FROM payments WHERE order_uid = 'O1'")
            .execute(&store.pool)
            .await
            .unwrap();

        let result: Result<Vec<Order>, StoreError> = store.load_all().try_collect().await;
        assert!(matches!(
            result,
            Err(StoreError::Incomplete { part: "payment", .. })
        ));
    }
}
