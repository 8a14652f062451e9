//! Pod identity agent flow against a local mock HTTP server.

use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use secrets_store_provider_aws::auth::PodIdentityAgentClient;
use secrets_store_provider_aws::config::AddressPreference;

const TIMEOUT: Duration = Duration::from_millis(500);

/// An endpoint that refuses connections, standing in for an unreachable
/// address family.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:1/v1/credentials";

fn credentials_body() -> serde_json::Value {
    serde_json::json!({
        "AccessKeyId": "ASIAEXAMPLE",
        "SecretAccessKey": "secret",
        "Token": "session-token"
    })
}

async fn agent_mock(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credentials"))
        .and(header("Authorization", "jwt-pod"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

fn endpoint(server: &MockServer) -> String {
    format!("{}/v1/credentials", server.uri())
}

#[tokio::test]
async fn test_fetches_credentials_with_token_header() {
    let server = agent_mock(ResponseTemplate::new(200).set_body_json(credentials_body())).await;
    let client = PodIdentityAgentClient::with_endpoints(
        TIMEOUT,
        endpoint(&server),
        DEAD_ENDPOINT.to_string(),
    )
    .unwrap();

    let credentials = client
        .fetch_credentials("jwt-pod", AddressPreference::Ipv4)
        .await
        .unwrap();
    assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
    assert_eq!(credentials.secret_access_key, "secret");
    assert_eq!(credentials.token, "session-token");
}

#[tokio::test]
async fn test_auto_falls_back_to_second_endpoint_on_transport_failure() {
    let server = agent_mock(ResponseTemplate::new(200).set_body_json(credentials_body())).await;
    // IPv4 slot is unreachable; auto should land on the IPv6 slot
    let client = PodIdentityAgentClient::with_endpoints(
        TIMEOUT,
        DEAD_ENDPOINT.to_string(),
        endpoint(&server),
    )
    .unwrap();

    let credentials = client
        .fetch_credentials("jwt-pod", AddressPreference::Auto)
        .await
        .unwrap();
    assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
}

#[tokio::test]
async fn test_http_error_is_final_even_on_auto() {
    let failing = agent_mock(ResponseTemplate::new(403).set_body_string("forbidden")).await;
    let healthy = agent_mock(ResponseTemplate::new(200).set_body_json(credentials_body())).await;
    let client = PodIdentityAgentClient::with_endpoints(
        TIMEOUT,
        endpoint(&failing),
        endpoint(&healthy),
    )
    .unwrap();

    // A served error status must not trigger the address-family fallback
    let err = client
        .fetch_credentials("jwt-pod", AddressPreference::Auto)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("403"));
    assert_eq!(healthy.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_incomplete_credentials_are_rejected() {
    let server = agent_mock(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "AccessKeyId": "",
        "SecretAccessKey": "secret",
        "Token": "session-token"
    })))
    .await;
    let client = PodIdentityAgentClient::with_endpoints(
        TIMEOUT,
        endpoint(&server),
        DEAD_ENDPOINT.to_string(),
    )
    .unwrap();

    let err = client
        .fetch_credentials("jwt-pod", AddressPreference::Ipv4)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("incomplete"));
}

#[tokio::test]
async fn test_ipv6_preference_skips_ipv4_endpoint() {
    let server = agent_mock(ResponseTemplate::new(200).set_body_json(credentials_body())).await;
    let client = PodIdentityAgentClient::with_endpoints(
        TIMEOUT,
        DEAD_ENDPOINT.to_string(),
        endpoint(&server),
    )
    .unwrap();

    let credentials = client
        .fetch_credentials("jwt-pod", AddressPreference::Ipv6)
        .await
        .unwrap();
    assert_eq!(credentials.token, "session-token");
}
