mod common;

use std::sync::Arc;

use serde_json::json;
use stockcast_api::{
    config::LedgerConfig,
    errors::ServiceError,
    ledger::{entries_filter, LedgerClient},
    repositories::{product_repository::NewProduct, ProductRepository, SalesRepository},
    services::sales_import::{ImportOutcome, SalesImportService, SalesSource},
};
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use common::{date, seed_product, setup_db};

const ENTRIES_PATH: &str = "/v2.0/sandbox/api/v2.0/companies(acme)/itemLedgerEntries";

fn ledger_config(server: &MockServer) -> LedgerConfig {
    LedgerConfig {
        base_url: server.uri(),
        token_url: format!("{}/oauth2/token", server.uri()),
        company_id: "acme".to_string(),
        environment: "sandbox".to_string(),
        client_id: "stockcast".to_string(),
        client_secret: "s3cret".to_string(),
        scope: "ledger/.default".to_string(),
        request_timeout_secs: 5,
        token_refresh_margin_secs: 60,
    }
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=stockcast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "token-1",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn entry(day: &str, entry_type: &str, quantity: f64) -> serde_json::Value {
    json!({
        "itemNumber": "SKU-9",
        "postingDate": day,
        "entryType": entry_type,
        "quantity": quantity
    })
}

#[tokio::test]
async fn follows_next_links_and_reuses_the_token() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    let start = date(2024, 3, 1);
    let end = date(2024, 3, 31);
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("$filter", entries_filter("SKU-9", start, end).as_str()))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [entry("2024-03-01", "Sale", -2.0)],
            "@odata.nextLink": format!("{}/pages/2", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pages/2"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [entry("2024-03-02", "Purchase", 10.0)]
        })))
        .mount(&server)
        .await;

    let client = LedgerClient::new(ledger_config(&server)).unwrap();
    let first = client.item_ledger_entries("SKU-9", start, end).await.unwrap();
    let second = client.item_ledger_entries("SKU-9", start, end).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert!(first[0].is_sale());
    assert!(!first[1].is_sale());
}

#[tokio::test]
async fn server_error_maps_to_upstream_failure() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = LedgerClient::new(ledger_config(&server)).unwrap();
    let err = client
        .item_ledger_entries("SKU-9", date(2024, 1, 1), date(2024, 1, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::UpstreamSource(_)), "{err:?}");
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn rejected_credentials_surface_as_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = LedgerClient::new(ledger_config(&server)).unwrap();
    let err = client
        .item_ledger_entries("SKU-9", date(2024, 1, 1), date(2024, 1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UpstreamSource(ref m) if m.contains("token")));
}

#[tokio::test]
async fn unauthorized_response_drops_the_cached_token() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&server)
        .await;

    let client = LedgerClient::new(ledger_config(&server)).unwrap();
    let (start, end) = (date(2024, 1, 1), date(2024, 1, 2));
    assert!(client.item_ledger_entries("SKU-9", start, end).await.is_err());
    let entries = client.item_ledger_entries("SKU-9", start, end).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn import_writes_daily_sales_for_products_with_a_sku() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                entry("2024-03-01", "Sale", -2.0),
                entry("2024-03-01", "Sale", -1.5),
                entry("2024-03-01", "Purchase", 50.0),
                entry("2024-03-03", "Sale", -4.0)
            ]
        })))
        .mount(&server)
        .await;

    let db = setup_db().await;
    let products = ProductRepository::new(db.clone());
    let sales = SalesRepository::new(db.clone());
    let tracked = products
        .create(NewProduct {
            name: "Tracked".into(),
            category: None,
            sku: Some("SKU-9".into()),
            stock_level: 10,
            reorder_threshold: 2,
        })
        .await
        .unwrap();
    let untracked = seed_product(&db, "No sku", 10, 2).await;

    let source: Arc<dyn SalesSource> =
        Arc::new(LedgerClient::new(ledger_config(&server)).unwrap());
    let importer = SalesImportService::new(products, sales.clone(), source);

    let report = importer
        .import(None, date(2024, 3, 1), date(2024, 3, 31))
        .await
        .unwrap();

    assert_eq!(
        report.results.get(&tracked.id),
        Some(&ImportOutcome::Imported {
            entries: 4,
            days: 2
        })
    );
    assert!(matches!(
        report.results.get(&untracked.id),
        Some(ImportOutcome::Skipped { .. })
    ));

    let rows = sales.list_sales(tracked.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date, date(2024, 3, 1));
    assert_eq!(rows[0].quantity, 3.5);
    assert_eq!(rows[1].quantity, 4.0);

    let err = importer
        .import(Some(vec![4242]), date(2024, 3, 1), date(2024, 3, 31))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = importer
        .import(None, date(2024, 3, 31), date(2024, 3, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));
}
