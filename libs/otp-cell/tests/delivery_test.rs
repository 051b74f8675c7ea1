use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use otp_cell::models::VerificationType;
use otp_cell::services::{DeliveryError, OtpDelivery, ProviderDelivery};
use shared_config::AppConfig;

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        email_api_url: format!("{}/emails", server.uri()),
        email_api_key: "email-key".to_string(),
        email_from: "Clinic <no-reply@clinic.example>".to_string(),
        sms_api_url: format!("{}/dev/bulkV2", server.uri()),
        sms_api_key: "sms-key".to_string(),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_sms_goes_to_bulk_endpoint_with_key_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/dev/bulkV2"))
        .and(header("authorization", "sms-key"))
        .and(body_json(json!({
            "message": "Your verification code is: 042917",
            "language": "english",
            "route": "q",
            "numbers": "9876543210"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "return": true })))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = ProviderDelivery::new(&config_for(&server));
    delivery
        .deliver(VerificationType::Phone, "9876543210", "042917")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_email_uses_bearer_key_and_fixed_subject() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer email-key"))
        .and(body_json(json!({
            "from": "Clinic <no-reply@clinic.example>",
            "to": ["patient@example.com"],
            "subject": "Your verification code",
            "text": "Your verification code is: 123456"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = ProviderDelivery::new(&config_for(&server));
    delivery
        .deliver(VerificationType::Email, "patient@example.com", "123456")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_provider_rejection_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/dev/bulkV2"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let delivery = ProviderDelivery::new(&config_for(&server));
    let result = delivery
        .deliver(VerificationType::Phone, "9876543210", "000001")
        .await;

    assert_matches!(result, Err(DeliveryError::Rejected { status: 401, body }) if body == "invalid key");
}

#[tokio::test]
async fn test_missing_keys_fail_without_network() {
    let delivery = ProviderDelivery::new(&AppConfig::default());

    assert_matches!(
        delivery.deliver(VerificationType::Phone, "9876543210", "123456").await,
        Err(DeliveryError::NotConfigured("sms_not_configured"))
    );
    assert_matches!(
        delivery.deliver(VerificationType::Email, "a@example.com", "123456").await,
        Err(DeliveryError::NotConfigured("email_not_configured"))
    );
}
