use chrono::Utc;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use rep_callback_api::callback_workflow::{CallbackWorkflow, CompletionPolicy};
use rep_callback_api::caller::Caller;
use rep_callback_api::data::db::Database;
use rep_callback_api::geo::{BoundingBox, Coordinate};
use rep_callback_api::models::{CallbackStatus, CreateCallbackPayload, CreateRatingPayload, TargetKey, TargetRole};
use rep_callback_api::pg_store::PgStore;
use rep_callback_api::rating_aggregator::RatingAggregator;
use rep_callback_api::store::AgentDirectory;

async fn connect() -> anyhow::Result<(Database, Arc<PgStore>)> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let store = Arc::new(PgStore::new(db.pool.clone(), Duration::from_secs(5)));
    Ok((db, store))
}

async fn insert_representative(db: &Database, role: TargetRole) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO representatives
            (id, display_name, role, latitude, longitude, location_updated_at,
             is_available, is_approved, is_active)
        VALUES ($1, $2, $3, 40.01, -73.01, $4, TRUE, TRUE, TRUE)
        "#,
    )
    .bind(id)
    .bind(format!("Smoke Test {}", id))
    .bind(role)
    .bind(Utc::now())
    .execute(&db.pool)
    .await?;
    Ok(id)
}

/// Smoke test for the Postgres stores: search, callback transitions and
/// concurrent rating aggregation.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pg_store_smoke_test() -> anyhow::Result<()> {
    let (db, store) = connect().await?;
    let rep_id = insert_representative(&db, TargetRole::Agent).await?;

    let origin = Coordinate::new(40.0, -73.0).map_err(|e| anyhow::anyhow!(e))?;
    let candidates = store
        .search_candidates(&BoundingBox::around(origin, 5.0))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(candidates.iter().any(|r| r.id == rep_id));

    let workflow = CallbackWorkflow::new(store.clone(), store.clone(), CompletionPolicy::default());
    let created = workflow
        .create(
            &Caller::anonymous(),
            &CreateCallbackPayload {
                representative_id: Some(rep_id),
                requester_name: Some("Smoke".to_string()),
                requester_phone: None,
                requester_email: Some("smoke@example.com".to_string()),
                purpose: Some("Smoke test".to_string()),
            },
            phonenumber::country::Id::US,
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let cancelled = workflow
        .cancel(&Caller::representative(rep_id), created.id, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(cancelled.status, CallbackStatus::Cancelled);

    let aggregator = Arc::new(RatingAggregator::new(
        store.clone(),
        store.clone(),
        Duration::from_secs(60),
    ));
    let target = TargetKey::new(rep_id, TargetRole::Agent);
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                let payload = CreateRatingPayload {
                    target_id: Some(target.target_id),
                    target_role: Some(target.target_role),
                    score: Some(i % 5 + 1),
                    ..Default::default()
                };
                aggregator
                    .submit(&Caller::client(Uuid::new_v4()), &payload)
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await?.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    let rep = store
        .get_representative(rep_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("representative vanished"))?;
    assert_eq!(rep.average_score, Some(3.0));
    Ok(())
}
