//! Sample orders shared by tests across the crate.

use chrono::{TimeZone, Utc};

use super::{Delivery, Item, Order, Payment};

pub fn sample_order(order_uid: &str) -> Order {
    Order {
        order_uid: order_uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: order_uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1637907727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items: vec![
            Item {
                chrt_id: 9934930,
                track_number: "WBILMTESTTRACK".to_string(),
                price: 453,
                rid: "ab4219087a764ae0btest".to_string(),
                name: "Mascaras".to_string(),
                sale: 30,
                size: "0".to_string(),
                total_price: 317,
                nm_id: 2389212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            },
            Item {
                chrt_id: 9934931,
                track_number: "WBILMTESTTRACK".to_string(),
                price: 120,
                rid: "ab4219087a764ae0btest2".to_string(),
                name: "Lipstick".to_string(),
                sale: 0,
                size: "0".to_string(),
                total_price: 120,
                nm_id: 2389213,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            },
        ],
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
        oof_shard: "1".to_string(),
    }
}

/// Same order as [`sample_order`], encoded the way producers publish it.
pub fn sample_payload(order_uid: &str) -> Vec<u8> {
    serde_json::to_vec(&sample_order(order_uid)).unwrap()
}

/// A sample order with a single item priced at `price` and a matching payment amount.
pub fn priced_order(order_uid: &str, price: i64) -> Order {
    let mut order = sample_order(order_uid);
    order.items.truncate(1);
    order.items[0].price = price;
    order.items[0].total_price = price;
    order.payment.amount = price;
    order.payment.goods_total = price;
    order.payment.delivery_cost = 0;
    order
}
