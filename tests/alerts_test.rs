mod common;

use chrono::Days;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use stockcast_api::{
    entities::stock_alert::{AlertStatus, AlertType},
    errors::ServiceError,
    repositories::{alert_repository::AlertFilter, AlertRepository, Page},
    services::alerts::PersistSummary,
};

use common::{alert_service, date, seed_forecast, seed_product, setup_db};

#[tokio::test]
async fn threshold_is_strict_against_seeded_forecasts() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let at_threshold = seed_product(&db, "Exactly", 100, 20).await;
    let below = seed_product(&db, "Below", 100, 20).await;

    // 80 and 81 units spread over the window
    for day in 0..4 {
        seed_forecast(&db, at_threshold.id, today + Days::new(day), 20.0).await;
        seed_forecast(&db, below.id, today + Days::new(day), 20.25).await;
    }

    let candidates = alert_service(&db).evaluate_as_of(today).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].product_id, below.id);
    assert_eq!(candidates[0].forecasted_usage, 81.0);
    assert_eq!(candidates[0].min_expected_stock, 19.0);
}

#[tokio::test]
async fn forecasts_outside_the_window_are_ignored() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let product = seed_product(&db, "Windowed", 30, 10).await;

    seed_forecast(&db, product.id, today - Days::new(1), 100.0).await;
    seed_forecast(&db, product.id, today + Days::new(8), 100.0).await;
    seed_forecast(&db, product.id, today + Days::new(7), 5.0).await;

    let candidates = alert_service(&db).evaluate_as_of(today).await.unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn product_without_forecasts_is_evaluated_with_zero_usage() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let product = seed_product(&db, "Neglected", 3, 10).await;

    let report = alert_service(&db).check_alerts_as_of(today).await.unwrap();
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].product_id, product.id);
    assert_eq!(report.candidates[0].forecasted_usage, 0.0);
    assert_eq!(report.created, 1);
    assert!(report.persisted);
}

#[tokio::test]
async fn end_to_end_alert_message_and_status() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let product = seed_product(&db, "Gizmo", 50, 10).await;
    for day in 0..5 {
        seed_forecast(&db, product.id, today + Days::new(day), 9.0).await;
    }

    let report = alert_service(&db).check_alerts_as_of(today).await.unwrap();
    assert_eq!(report.created, 1);

    let alerts = AlertRepository::new(db.clone())
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.product_id, product.id);
    assert_eq!(alert.alert_type, AlertType::LowStock);
    assert_eq!(alert.status, AlertStatus::New);
    assert!(alert.message.contains("Gizmo"));
    assert!(alert.message.contains("(10)"));
    assert!(alert.message.contains("45.00"));
    assert!(alert.message.contains("5.00"));
}

#[tokio::test]
async fn repeated_checks_do_not_duplicate_open_alerts() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    seed_product(&db, "Repeat", 5, 10).await;
    let service = alert_service(&db);

    let first = service.check_alerts_as_of(today).await.unwrap();
    let second = service.check_alerts_as_of(today).await.unwrap();

    assert_eq!(first.created, 1);
    assert_eq!(second.created, 0);
    assert_eq!(second.candidates.len(), 1);

    let alerts = AlertRepository::new(db.clone())
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
}

#[tokio::test]
async fn resolved_alert_allows_a_new_one() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let product = seed_product(&db, "Cycle", 5, 10).await;
    let service = alert_service(&db);

    service.check_alerts_as_of(today).await.unwrap();
    let open = AlertRepository::new(db.clone())
        .list(
            &AlertFilter {
                product_id: Some(product.id),
                status: Some(AlertStatus::New),
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(open.len(), 1);

    let resolved = service
        .update_status(open[0].id, AlertStatus::Resolved)
        .await
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);

    let again = service.check_alerts_as_of(today).await.unwrap();
    assert_eq!(again.created, 1);
}

#[tokio::test]
async fn acknowledged_alert_does_not_block_a_new_one() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    seed_product(&db, "Ack", 5, 10).await;
    let service = alert_service(&db);

    service.check_alerts_as_of(today).await.unwrap();
    let alerts = service
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    service
        .update_status(alerts[0].id, AlertStatus::Acknowledged)
        .await
        .unwrap();

    // Only `new` alerts count as open
    let report = service.check_alerts_as_of(today).await.unwrap();
    assert_eq!(report.created, 1);
}

#[tokio::test]
async fn updating_unknown_alert_is_not_found() {
    let db = setup_db().await;
    let err = alert_service(&db)
        .update_status(4242, AlertStatus::Resolved)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(ref msg) if msg == "Alert 4242 not found"));
}

#[tokio::test]
async fn open_alert_index_rejects_a_second_new_alert() {
    let db = setup_db().await;
    let product = seed_product(&db, "Indexed", 5, 10).await;
    let repo = AlertRepository::new(db.clone());

    repo.insert(db.as_ref(), product.id, AlertType::LowStock, "first".into())
        .await
        .unwrap();
    let err = repo
        .insert(db.as_ref(), product.id, AlertType::LowStock, "second".into())
        .await
        .unwrap_err();
    assert!(err.is_unique_violation(), "{err:?}");

    // Rows in other states do not collide
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "UPDATE stock_alerts SET status = 'resolved'".to_string(),
    ))
    .await
    .unwrap();
    repo.insert(db.as_ref(), product.id, AlertType::LowStock, "third".into())
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_checks_create_one_alert_per_product() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    for i in 0..5 {
        seed_product(&db, &format!("Busy {i}"), 1, 10).await;
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = alert_service(&db);
            tokio::spawn(async move { service.check_alerts_as_of(today).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(report.persisted);
        created += report.created;
    }
    assert_eq!(created, 5);

    let alerts = AlertRepository::new(db.clone())
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 5);
}

#[tokio::test]
async fn evaluated_usage_sums_the_inclusive_window() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let product = seed_product(&db, "Summed", 20, 15).await;
    for day in 0..10 {
        seed_forecast(&db, product.id, today + Days::new(day), 1.5).await;
    }

    // today through today + 7 is eight rows
    let candidates = alert_service(&db).evaluate_as_of(today).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].forecasted_usage, 12.0);
    assert_eq!(candidates[0].min_expected_stock, 8.0);
}

#[tokio::test]
async fn reopening_onto_an_open_alert_is_a_conflict() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let product = seed_product(&db, "Reopen", 5, 10).await;
    let service = alert_service(&db);

    service.check_alerts_as_of(today).await.unwrap();
    let first = service
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap()[0]
        .id;
    service
        .update_status(first, AlertStatus::Resolved)
        .await
        .unwrap();
    assert_eq!(service.check_alerts_as_of(today).await.unwrap().created, 1);

    let err = service
        .update_status(first, AlertStatus::New)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(ref msg) if msg.contains(&product.id.to_string())));
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);

    let reloaded = AlertRepository::new(db.clone())
        .find_by_id(first)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, AlertStatus::Resolved);
}

#[tokio::test]
async fn failed_insert_rolls_back_the_whole_batch() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    seed_product(&db, "First", 1, 10).await;
    let failing = seed_product(&db, "Second", 1, 10).await;

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        format!(
            "CREATE TRIGGER reject_alert BEFORE INSERT ON stock_alerts \
             WHEN NEW.product_id = {} \
             BEGIN SELECT RAISE(ABORT, 'alert storage unavailable'); END",
            failing.id
        ),
    ))
    .await
    .unwrap();

    let report = alert_service(&db).check_alerts_as_of(today).await.unwrap();
    assert!(!report.persisted);
    assert_eq!(report.created, 0);
    assert_eq!(report.candidates.len(), 2);
    assert!(report.error.is_some());

    // The first product's alert was written before the failure and must be gone
    let alerts = AlertRepository::new(db.clone())
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    assert!(alerts.is_empty(), "{alerts:?}");
}

#[tokio::test]
async fn alert_opened_between_lookup_and_insert_counts_as_already_open() {
    let db = setup_db().await;
    let today = date(2024, 6, 1);
    let raced = seed_product(&db, "Raced", 1, 10).await;
    let other = seed_product(&db, "Other", 1, 10).await;

    // Another checker's row lands after the open-alert lookup, right before our insert
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        format!(
            "CREATE TRIGGER competing_alert BEFORE INSERT ON stock_alerts \
             WHEN NEW.product_id = {} \
             BEGIN INSERT INTO stock_alerts \
             (product_id, alert_type, message, status, created_at, updated_at) \
             VALUES (NEW.product_id, NEW.alert_type, 'competing', 'new', \
             NEW.created_at, NEW.updated_at); END",
            raced.id
        ),
    ))
    .await
    .unwrap();

    let service = alert_service(&db);
    let summary = service
        .persist_candidates(&service.evaluate_as_of(today).await.unwrap())
        .await
        .unwrap();
    assert_eq!(
        summary,
        PersistSummary {
            created: 1,
            already_open: 1
        }
    );

    // The batch committed past the unique violation
    let alerts = AlertRepository::new(db.clone())
        .list(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].product_id, other.id);
}
