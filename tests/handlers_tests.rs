/// HTTP-level tests: the router driven with `oneshot` over in-memory stores
/// Checks status codes and bodies for every endpoint family
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use phonenumber::country::Id as CountryId;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use rep_callback_api::callback_workflow::CompletionPolicy;
use rep_callback_api::caller::{CALLER_ID_HEADER, CALLER_ROLE_HEADER};
use rep_callback_api::config::Config;
use rep_callback_api::handlers::AppState;
use rep_callback_api::memory_store::MemoryStore;
use rep_callback_api::models::{RatingQuestion, Representative, TargetRole};
use rep_callback_api::routes;

/// Helper function to create test config
fn create_test_config() -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        db_max_connections: 1,
        store_timeout: Duration::from_secs(1),
        default_search_radius_km: 10.0,
        default_search_limit: 20,
        max_search_limit: 2,
        completion_policy: CompletionPolicy::default(),
        phone_region: CountryId::US,
        notify_webhook_url: None,
        question_cache_ttl: Duration::from_secs(60),
    }
}

struct TestApp {
    store: MemoryStore,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let store = MemoryStore::new();
        let state = Arc::new(AppState::new(
            create_test_config(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            None,
        ));
        let router = routes::app_routes().with_state(state);
        Self { store, router }
    }

    fn seed(&self, lat: f64, lon: f64, available: bool) -> Representative {
        let rep = Representative {
            id: Uuid::new_v4(),
            display_name: "Quinn".to_string(),
            role: TargetRole::Agent,
            headline: None,
            latitude: Some(lat),
            longitude: Some(lon),
            location_updated_at: Some(Utc::now()),
            is_available: available,
            is_approved: true,
            is_active: true,
            average_score: None,
            created_at: Utc::now(),
        };
        self.store.insert_representative(rep.clone());
        rep
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        caller: Option<(Uuid, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = caller {
            builder = builder
                .header(CALLER_ID_HEADER, id.to_string())
                .header(CALLER_ROLE_HEADER, role);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_nearby_search() {
    let app = TestApp::new();
    let near = app.seed(40.01, -73.01, true);
    app.seed(40.02, -73.02, false);
    app.seed(41.0, -74.0, true);

    let (status, body) = app
        .send("GET", "/agents/nearby?lat=40.0&lon=-73.0&radiusKm=5", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["representativeId"], json!(near.id));
    assert!((hits[0]["distanceKm"].as_f64().unwrap() - 1.4).abs() < 0.05);

    // limit is clamped to the configured maximum of 2
    for _ in 0..3 {
        app.seed(40.001, -73.001, true);
    }
    let (_, body) = app
        .send("GET", "/agents/nearby?lat=40.0&lon=-73.0&radiusKm=500&limit=50", None, None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = app
        .send("GET", "/agents/nearby?lat=40.0&lon=-73.0&radiusKm=0", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_nearby_rejects_bad_coordinates() {
    let app = TestApp::new();
    for uri in [
        "/agents/nearby?lon=-73.0",
        "/agents/nearby?lat=91&lon=0",
        "/agents/nearby?lat=0&lon=-180.5",
    ] {
        let (status, _) = app.send("GET", uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_location_and_availability_are_owner_only() {
    let app = TestApp::new();
    let rep = app.seed(40.0, -73.0, true);
    let uri = format!("/agents/{}/location", rep.id);
    let body = json!({"latitude": 40.5, "longitude": -73.5});

    let (status, _) = app
        .send("PUT", &uri, Some((Uuid::new_v4(), "agent")), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = app
        .send("PUT", &uri, Some((rep.id, "agent")), Some(body))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["latitude"], 40.5);

    let (status, _) = app
        .send(
            "PUT",
            &uri,
            Some((rep.id, "agent")),
            Some(json!({"latitude": 100.0, "longitude": 0.0})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = app
        .send(
            "PUT",
            &format!("/agents/{}/availability", rep.id),
            Some((Uuid::new_v4(), "admin")),
            Some(json!({"available": false})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["isAvailable"], false);
}

#[tokio::test]
async fn test_callback_lifecycle_over_http() {
    let app = TestApp::new();
    let rep = app.seed(40.0, -73.0, true);

    let (status, _) = app
        .send("POST", "/callbacks", None, Some(json!({"representativeId": rep.id})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            "/callbacks",
            None,
            Some(json!({
                "representativeId": Uuid::new_v4(),
                "requesterName": "Lee",
                "requesterEmail": "lee@example.com",
                "purpose": "Pricing question"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, created) = app
        .send(
            "POST",
            "/callbacks",
            None,
            Some(json!({
                "representativeId": rep.id,
                "requesterName": "Lee",
                "requesterEmail": "lee@example.com",
                "purpose": "Pricing question"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    let uri = format!("/callbacks/{}", created["id"].as_str().unwrap());

    let (status, _) = app
        .send(
            "PATCH",
            &uri,
            Some((Uuid::new_v4(), "agent")),
            Some(json!({"status": "cancelled"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, scheduled) = app
        .send(
            "PATCH",
            &uri,
            Some((rep.id, "agent")),
            Some(json!({"status": "scheduled", "scheduledAt": "2030-01-01T15:00:00Z"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scheduled["status"], "scheduled");

    let (status, _) = app
        .send("PATCH", &uri, Some((rep.id, "agent")), Some(json!({"status": "completed"})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send("PATCH", &uri, Some((rep.id, "agent")), Some(json!({"status": "cancelled"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], false);

    let (status, list) = app
        .send(
            "GET",
            &format!("/agents/{}/callbacks?status=completed", rep.id),
            Some((rep.id, "agent")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_callback_to_unavailable_rep_is_conflict() {
    let app = TestApp::new();
    let rep = app.seed(40.0, -73.0, false);
    let (status, _) = app
        .send(
            "POST",
            "/callbacks",
            None,
            Some(json!({
                "representativeId": rep.id,
                "requesterName": "Lee",
                "requesterPhone": "+44 7400 123456",
                "purpose": "Viewing"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_malformed_caller_headers_are_rejected() {
    let app = TestApp::new();
    let rep = app.seed(40.0, -73.0, true);
    let request = Request::builder()
        .method("GET")
        .uri(format!("/agents/{}/callbacks", rep.id))
        .header(CALLER_ID_HEADER, "not-a-uuid")
        .header(CALLER_ROLE_HEADER, "agent")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rating_endpoints() {
    let app = TestApp::new();
    let rep = app.seed(40.0, -73.0, true);
    let question = RatingQuestion {
        id: Uuid::new_v4(),
        target_role: TargetRole::Agent,
        question_text: "Was the agent on time?".to_string(),
        display_order: 1,
        is_active: true,
    };
    app.store.insert_question(question.clone());
    let client = Some((Uuid::new_v4(), "client"));

    let (status, _) = app
        .send(
            "POST",
            "/ratings",
            client,
            Some(json!({"targetId": rep.id, "targetRole": "agent", "score": 7})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            "/ratings",
            client,
            Some(json!({"targetId": Uuid::new_v4(), "targetRole": "agent", "score": 4})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut ids = Vec::new();
    for score in [5, 4, 3] {
        let (status, body) = app
            .send(
                "POST",
                "/ratings",
                client,
                Some(json!({
                    "targetId": rep.id,
                    "targetRole": "agent",
                    "score": score,
                    "questionScores": [{"questionId": question.id, "score": score}]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push((score, body["id"].as_str().unwrap().to_string()));
    }

    let (_, summary) = app
        .send("GET", &format!("/agents/{}/ratings", rep.id), None, None)
        .await;
    assert_eq!(summary["averageScore"], 4.0);
    assert_eq!(summary["count"], 3);

    let three = &ids.iter().find(|(s, _)| *s == 3).unwrap().1;
    let (status, _) = app
        .send("DELETE", &format!("/ratings/{}", three), client, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            "DELETE",
            &format!("/ratings/{}", three),
            Some((Uuid::new_v4(), "admin")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["targetAverage"], 4.5);

    let (status, questions) = app
        .send("GET", "/rating-questions?role=agent", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(questions.as_array().unwrap().len(), 1);

    let (status, history) = app
        .send(
            "GET",
            &format!("/rating-questions/{}/scores?targetId={}", question.id, rep.id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["count"], 2);
    assert_eq!(history["mean"], 4.5);
}
