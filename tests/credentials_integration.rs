//! Integration tests for credential token flows and validation

mod common;

use domo_api_core::api::{ApiError, ExecutionContext};
use domo_api_core::auth::{
    AccessTokenCredential, ClientCredential, Credential, EmbeddedEnvironmentCredential, TokenStatus,
    UsernamePasswordCredential,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::init_logging;

async fn mount_identity(server: &MockServer, header_name: &str, token: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/api/content/v2/users/me"))
        .and(header(header_name, token))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1893952720,
            "displayName": "Jae Wilson",
            "emailAddress": "jae@example.com"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_access_token_validate_sets_identity() {
    init_logging();
    let server = MockServer::start().await;
    mount_identity(&server, "x-domo-developer-token", "dev-token", 1).await;

    let credential = AccessTokenCredential::new("acme", "dev-token").unwrap().with_base_url(server.uri());
    let identity = credential.validate(&ExecutionContext::new()).await.unwrap();

    assert_eq!(identity.id, "1893952720");
    assert!(credential.is_valid());
    assert_eq!(credential.state().identity.as_ref().map(|i| i.id.as_str()), Some("1893952720"));
}

#[tokio::test]
async fn test_each_validate_issues_one_identity_request() {
    init_logging();
    let server = MockServer::start().await;
    mount_identity(&server, "x-domo-developer-token", "dev-token", 2).await;

    let credential = AccessTokenCredential::new("acme", "dev-token").unwrap().with_base_url(server.uri());
    let context = ExecutionContext::new();
    credential.validate(&context).await.unwrap();
    credential.validate(&context).await.unwrap();
}

#[tokio::test]
async fn test_rejected_token_marks_invalid() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/content/v2/users/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"reason": "token expired"})))
        .expect(1)
        .mount(&server)
        .await;

    let credential = AccessTokenCredential::new("acme", "old-token").unwrap().with_base_url(server.uri());
    let err = credential.validate(&ExecutionContext::new()).await.unwrap_err();

    match err {
        ApiError::Credential { status, message, .. } => {
            assert_eq!(status, Some(401));
            assert!(message.contains("token expired"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(credential.state().status, TokenStatus::Invalid);
}

#[tokio::test]
async fn test_identity_check_is_not_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/content/v2/users/me"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"reason": "maintenance"})))
        .expect(1)
        .mount(&server)
        .await;

    let credential = AccessTokenCredential::new("acme", "dev-token").unwrap().with_base_url(server.uri());
    let err = credential.validate(&ExecutionContext::new()).await.unwrap_err();

    match err {
        ApiError::Credential { status, .. } => assert_eq!(status, Some(503)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dry_run_validate_sends_nothing() {
    init_logging();
    let server = MockServer::start().await;

    let credential = UsernamePasswordCredential::new("acme", "jae@example.com", "pw")
        .unwrap()
        .with_base_url(server.uri());
    let identity = credential.validate(&ExecutionContext::new().with_dry_run(true)).await.unwrap();

    assert!(identity.id.is_empty());
    assert_eq!(credential.state().status, TokenStatus::Constructed);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_password_login_then_validate() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/content/v2/authentication"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessionToken": "session-1"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_identity(&server, "x-domo-authentication", "session-1", 1).await;

    let credential = UsernamePasswordCredential::new("acme", "jae@example.com", "pw")
        .unwrap()
        .with_base_url(server.uri());
    let identity = credential.validate(&ExecutionContext::new()).await.unwrap();

    assert_eq!(identity.email.as_deref(), Some("jae@example.com"));
    assert_eq!(credential.state().token.as_deref(), Some("session-1"));
}

#[tokio::test]
async fn test_bad_password_reports_reason() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/content/v2/authentication"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "reason": "INVALID_CREDENTIALS"})))
        .expect(1)
        .mount(&server)
        .await;

    let credential = UsernamePasswordCredential::new("acme", "jae@example.com", "wrong")
        .unwrap()
        .with_base_url(server.uri());
    let err = credential.get_token(&ExecutionContext::new()).await.unwrap_err();

    assert!(err.to_string().contains("INVALID_CREDENTIALS"));
    assert_eq!(credential.state().token, None);
}

#[tokio::test]
async fn test_client_credentials_grant() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .and(query_param("grant_type", "client_credentials"))
        .and(header("authorization", "Basic aWQ6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "granted", "expires_in": 3599})))
        .expect(1)
        .mount(&server)
        .await;

    let credential = ClientCredential::new("acme", "id", "secret").unwrap().with_api_base(server.uri());
    let context = ExecutionContext::new();
    let token = credential.get_token(&context).await.unwrap();
    // cached, no second grant
    credential.get_token(&context).await.unwrap();

    assert_eq!(token, "granted");
    assert_eq!(credential.auth_header()["authorization"], "bearer granted");
}

#[tokio::test]
async fn test_embedded_validates_through_inner_credential() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/content/v2/users/me"))
        .and(header("authorization", "Token env-token"))
        .and(header("x-domo-developer-token", "dev-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42"})))
        .expect(1)
        .mount(&server)
        .await;

    let inner = AccessTokenCredential::new("acme", "dev-token").unwrap().with_base_url(server.uri());
    let credential = EmbeddedEnvironmentCredential::new(inner, "env-token", "https://jupyter.acme", "/u/42").unwrap();

    let identity = credential.validate(&ExecutionContext::new()).await.unwrap();
    assert_eq!(identity.id, "42");
    assert!(credential.is_valid());
}
