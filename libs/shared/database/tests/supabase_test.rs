use reqwest::Method;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_database::{is_conflict_error, SupabaseClient, SupabaseError};

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_url: server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_request_sends_api_key_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(header("apikey", "test-anon-key"))
        .and(header("authorization", "Bearer service-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;

    let client = SupabaseClient::new(&config_for(&server));
    let rows: Vec<Value> = client
        .request(Method::GET, "/rest/v1/appointments", Some("service-token"), None)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_returning_request_sets_prefer_header() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/verifications"))
        .and(header("prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = SupabaseClient::new(&config_for(&server));
    let rows: Vec<Value> = client
        .request_returning(Method::PATCH, "/rest/v1/verifications", None, Some(json!({"attempts": 1})))
        .await
        .unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_conflict_status_is_recoverable_from_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/book_appointment"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23P01",
            "message": "scheduling_conflict"
        })))
        .mount(&server)
        .await;

    let client = SupabaseClient::new(&config_for(&server));
    let err = client
        .rpc::<Value>("book_appointment", None, json!({}))
        .await
        .unwrap_err();

    assert!(is_conflict_error(&err));
    assert!(err.to_string().contains("scheduling_conflict"));
}

#[tokio::test]
async fn test_not_found_is_not_a_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .mount(&server)
        .await;

    let client = SupabaseClient::new(&config_for(&server));
    let err = client
        .request::<Value>(Method::GET, "/rest/v1/missing", None, None)
        .await
        .unwrap_err();

    assert!(!is_conflict_error(&err));
    assert!(matches!(err.downcast_ref::<SupabaseError>(), Some(SupabaseError::NotFound { .. })));
}
