mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};

use common::{seed_daily_sales, TestApp};

async fn create_product(app: &TestApp, body: Value) -> Value {
    let (status, product) = app
        .request_json(Method::POST, "/api/v1/products", Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    product
}

async fn wait_for_job(app: &TestApp, job_id: &str) -> Value {
    for _ in 0..100 {
        let (status, job) = app
            .request_json(Method::GET, &format!("/api/v1/forecasts/jobs/{job_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        if job["state"] != "running" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("forecast job {job_id} did not finish");
}

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request_json(Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn product_create_get_and_stock_update() {
    let app = TestApp::new().await;
    let product = create_product(
        &app,
        json!({"name": "Bolt", "sku": "BOLT-1", "stock_level": 40, "reorder_threshold": 5}),
    )
    .await;
    let id = product["id"].as_i64().expect("product id");

    let (status, fetched) = app
        .request_json(Method::GET, &format!("/api/v1/products/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["sku"], "BOLT-1");

    let (status, updated) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/products/{id}/stock"),
            Some(json!({"stock_level": 12})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["stock_level"], 12);
    assert_eq!(updated["reorder_threshold"], 5);

    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/products",
            Some(json!({"name": "Bolt again", "sku": "BOLT-1"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, error) = app
        .request_json(Method::GET, "/api/v1/products/9999", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error["message"].as_str().unwrap().contains("9999"));
}

#[tokio::test]
async fn negative_stock_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/products",
            Some(json!({"name": "Nut", "stock_level": -1})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recorded_sales_merge_same_day_entries() {
    let app = TestApp::new().await;
    let product = create_product(&app, json!({"name": "Washer"})).await;
    let id = product["id"].as_i64().unwrap();

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/sales",
            Some(json!({
                "product_id": id,
                "entries": [
                    {"date": "2024-05-01", "quantity": 2.0},
                    {"date": "2024-05-01", "quantity": 3.5},
                    {"date": "2024-05-02", "quantity": 1.0}
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["days"], 2);

    let (status, rows) = app
        .request_json(Method::GET, &format!("/api/v1/sales/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["quantity"], 5.5);

    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/sales",
            Some(json!({"product_id": id, "entries": [{"date": "2024-05-03", "quantity": -1.0}]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_is_accepted_and_job_reports_outcomes() {
    let app = TestApp::new().await;
    let today = Utc::now().date_naive();
    let product = create_product(&app, json!({"name": "Gear", "stock_level": 100})).await;
    let id = product["id"].as_i64().unwrap() as i32;
    seed_daily_sales(app.db(), id, today, 30, |i| 3.0 + (i % 2) as f64).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/forecasts/generate",
            Some(json!({"product_ids": [id, 777], "periods": 10})),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    let job_id = body["job_id"].as_str().expect("job id").to_string();

    let job = wait_for_job(&app, &job_id).await;
    assert_eq!(job["state"], "completed", "{job}");
    assert_eq!(job["summary"], "1 succeeded, 0 skipped, 1 failed");
    assert_eq!(job["report"]["results"][id.to_string()]["status"], "generated");
    assert_eq!(job["report"]["results"]["777"]["status"], "failed");

    let (status, rows) = app
        .request_json(Method::GET, &format!("/api/v1/forecasts/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn generate_accepts_empty_body_and_rejects_bad_json() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/forecasts/generate", None)
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/forecasts/generate",
            Some(json!({"periods": 0})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/forecasts/generate",
            Some(json!({"frequency": "hourly"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_forecast_job_is_not_found() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request_json(
            Method::GET,
            "/api/v1/forecasts/jobs/00000000-0000-0000-0000-000000000000",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alert_check_list_and_status_update() {
    let app = TestApp::new().await;
    create_product(
        &app,
        json!({"name": "Spring", "stock_level": 2, "reorder_threshold": 10}),
    )
    .await;

    let (status, report) = app
        .request_json(Method::GET, "/api/v1/alerts/check", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["created"], 1);
    assert_eq!(report["persisted"], true);
    assert_eq!(report["candidates"][0]["min_expected_stock_next_7_days"], 2.0);

    let (status, alerts) = app
        .request_json(Method::GET, "/api/v1/alerts?status=new", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let alert_id = alerts[0]["id"].as_i64().unwrap();

    let (status, updated) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/alerts/{alert_id}/status"),
            Some(json!({"status": "acknowledged"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "acknowledged");

    let (status, _) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/alerts/{alert_id}/status"),
            Some(json!({"status": "archived"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request_json(
            Method::PUT,
            "/api/v1/alerts/9999/status",
            Some(json!({"status": "resolved"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, open) = app
        .request_json(Method::GET, "/api/v1/alerts?status=new", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(open.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn reopening_a_resolved_alert_conflicts_with_the_open_one() {
    let app = TestApp::new().await;
    create_product(
        &app,
        json!({"name": "Latch", "stock_level": 1, "reorder_threshold": 10}),
    )
    .await;

    let (_, report) = app
        .request_json(Method::GET, "/api/v1/alerts/check", None)
        .await;
    assert_eq!(report["created"], 1);
    let (_, alerts) = app
        .request_json(Method::GET, "/api/v1/alerts?status=new", None)
        .await;
    let first = alerts[0]["id"].as_i64().unwrap();

    let (status, _) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/alerts/{first}/status"),
            Some(json!({"status": "resolved"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, report) = app
        .request_json(Method::GET, "/api/v1/alerts/check", None)
        .await;
    assert_eq!(report["created"], 1);

    let (status, error) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/alerts/{first}/status"),
            Some(json!({"status": "new"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{error}");
}

#[tokio::test]
async fn import_without_ledger_is_unavailable() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/sales/import",
            Some(json!({"start_date": "2024-01-01", "end_date": "2024-01-31"})),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn inverted_date_range_is_bad_request() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request_json(
            Method::GET,
            "/api/v1/forecasts?start_date=2024-02-01&end_date=2024-01-01",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
