//! Tests for the SQLite catalog store.

use std::time::Duration;

use comanda::catalog::{
    CatalogSnapshot, CatalogStore, ClientRecord, NewOrder, NewOrderItem, ProductRecord, StoreError,
    VariantRecord,
};
use comanda::store::SqliteStore;

async fn open_temp_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("test_comanda.db");
    let store = SqliteStore::open(&db_path).await.expect("open store");
    (store, dir)
}

fn fixture_catalog() -> CatalogSnapshot {
    CatalogSnapshot {
        clients: vec![
            ClientRecord {
                id: "c2".to_owned(),
                name: "Bruno Diaz".to_owned(),
                phone: None,
            },
            ClientRecord {
                id: "c1".to_owned(),
                name: "Ana Silva".to_owned(),
                phone: Some("555-0100".to_owned()),
            },
        ],
        products: vec![
            ProductRecord {
                id: "p2".to_owned(),
                name: "Tortillas".to_owned(),
                price: 18.0,
                variants: vec![],
            },
            ProductRecord {
                id: "p1".to_owned(),
                name: "Queso".to_owned(),
                price: 80.0,
                variants: vec![
                    VariantRecord {
                        id: "v1".to_owned(),
                        name: "Oaxaca".to_owned(),
                        price: 95.0,
                    },
                    VariantRecord {
                        id: "v2".to_owned(),
                        name: "Panela".to_owned(),
                        price: 70.0,
                    },
                ],
            },
        ],
    }
}

#[tokio::test]
async fn open_creates_schema() {
    let (store, _dir) = open_temp_store().await;

    let catalog = store.load_catalog().await.expect("load");
    assert!(catalog.is_empty());

    let orders = store.recent_orders(10).await.expect("orders");
    assert!(orders.is_empty());
}

#[tokio::test]
async fn import_and_load_roundtrip() {
    let (store, _dir) = open_temp_store().await;

    let counts = store
        .import_catalog(&fixture_catalog())
        .await
        .expect("import");
    assert_eq!(counts.clients, 2);
    assert_eq!(counts.products, 2);
    assert_eq!(counts.variants, 2);

    let catalog = store.load_catalog().await.expect("load");

    // Rows come back ordered by name regardless of import order.
    let client_names: Vec<&str> = catalog.clients.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(client_names, ["Ana Silva", "Bruno Diaz"]);
    assert_eq!(catalog.clients[0].phone.as_deref(), Some("555-0100"));

    let product_names: Vec<&str> = catalog.products.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(product_names, ["Queso", "Tortillas"]);

    let queso = catalog.product("p1").expect("queso");
    let variant_names: Vec<&str> = queso.variants.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(variant_names, ["Oaxaca", "Panela"]);
    assert!((queso.variant("v1").expect("v1").price - 95.0).abs() < f64::EPSILON);

    let tortillas = catalog.product("p2").expect("tortillas");
    assert!(tortillas.variants.is_empty());
}

#[tokio::test]
async fn import_twice_updates_in_place() {
    let (store, _dir) = open_temp_store().await;

    store
        .import_catalog(&fixture_catalog())
        .await
        .expect("first import");

    let mut updated = fixture_catalog();
    updated.products[0].price = 20.0;
    updated.clients[0].name = "Bruno Diaz Jr".to_owned();
    let counts = store.import_catalog(&updated).await.expect("second import");
    assert_eq!(counts.clients, 2);

    let catalog = store.load_catalog().await.expect("load");
    assert_eq!(catalog.clients.len(), 2, "upsert must not duplicate rows");
    assert_eq!(catalog.products.len(), 2);
    assert!((catalog.product("p2").expect("p2").price - 20.0).abs() < f64::EPSILON);
    assert_eq!(catalog.client("c2").expect("c2").name, "Bruno Diaz Jr");
}

#[tokio::test]
async fn import_rejects_blank_ids() {
    let (store, _dir) = open_temp_store().await;

    let mut bad = fixture_catalog();
    bad.clients[0].id = String::new();
    let err = store
        .import_catalog(&bad)
        .await
        .expect_err("blank id must be rejected");
    assert!(matches!(err, StoreError::Import(_)), "{err:?}");

    // The failed transaction must leave nothing behind.
    let catalog = store.load_catalog().await.expect("load");
    assert!(catalog.is_empty());
}

#[tokio::test]
async fn save_order_and_list_roundtrip() {
    let (store, _dir) = open_temp_store().await;
    store
        .import_catalog(&fixture_catalog())
        .await
        .expect("import");

    let order = NewOrder {
        client_id: "c1".to_owned(),
        paid: true,
        items: vec![
            NewOrderItem {
                product_id: "p1".to_owned(),
                variant_id: Some("v1".to_owned()),
                quantity: 2.0,
                unit_price: 95.0,
            },
            NewOrderItem {
                product_id: "p2".to_owned(),
                variant_id: None,
                quantity: 3.0,
                unit_price: 18.0,
            },
        ],
    };
    let order_id = store.save_order(&order).await.expect("save");
    assert!(!order_id.is_empty());

    let orders = store.recent_orders(10).await.expect("list");
    assert_eq!(orders.len(), 1);
    let saved = &orders[0];
    assert_eq!(saved.id, order_id);
    assert_eq!(saved.client_id, "c1");
    assert_eq!(saved.client_name, "Ana Silva");
    assert!(saved.paid);
    assert_eq!(saved.item_count, 2);
    assert!((saved.total - 244.0).abs() < f64::EPSILON, "{}", saved.total);
}

#[tokio::test]
async fn save_order_requires_known_client() {
    let (store, _dir) = open_temp_store().await;
    store
        .import_catalog(&fixture_catalog())
        .await
        .expect("import");

    let order = NewOrder {
        client_id: "ghost".to_owned(),
        paid: false,
        items: vec![NewOrderItem {
            product_id: "p2".to_owned(),
            variant_id: None,
            quantity: 1.0,
            unit_price: 18.0,
        }],
    };
    let err = store
        .save_order(&order)
        .await
        .expect_err("unknown client must violate the foreign key");
    assert!(matches!(err, StoreError::Query(_)), "{err:?}");

    let orders = store.recent_orders(10).await.expect("list");
    assert!(orders.is_empty(), "failed save must not leave rows");
}

#[tokio::test]
async fn recent_orders_newest_first_with_limit() {
    let (store, _dir) = open_temp_store().await;
    store
        .import_catalog(&fixture_catalog())
        .await
        .expect("import");

    let mut last_id = String::new();
    for n in 1..=3 {
        let order = NewOrder {
            client_id: "c1".to_owned(),
            paid: false,
            items: vec![NewOrderItem {
                product_id: "p2".to_owned(),
                variant_id: None,
                quantity: f64::from(n),
                unit_price: 18.0,
            }],
        };
        last_id = store.save_order(&order).await.expect("save");
        // Distinct timestamps keep the ordering assertion meaningful.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let orders = store.recent_orders(2).await.expect("list");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].id, last_id);
}
