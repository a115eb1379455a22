//! Integration tests for the Forescout plugin against a mock Forescout server.

use ib_plugins::testing::test_host_settings;
use ib_plugins::{ForescoutConfig, ForescoutPlugin, Plugin, PullCheckpoint, RecordSource};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn plugin(server: &MockServer) -> ForescoutPlugin {
    let config = ForescoutConfig::from_value(&json!({
        "base_url": format!("{}/", server.uri()),
        "username": " admin ",
        "password": "s3cret",
    }))
    .unwrap();
    ForescoutPlugin::new("forescout", config, test_host_settings(1)).unwrap()
}

#[tokio::test]
async fn test_login_sends_trimmed_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(query_param("username", "admin"))
        .and(query_param("password", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("token-1"))
        .expect(1)
        .mount(&server)
        .await;

    let token = plugin(&server).get_auth_header(false).await.unwrap();
    assert_eq!(token.expose_secret(), "token-1");
}

#[tokio::test]
async fn test_validate_reports_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = plugin(&server).validate().await;
    assert!(!result.success);
    assert_eq!(
        result.message,
        "Received exit code 401, Unauthorized, Verify the Base URL, Username and Password \
         provided in the configuration parameters."
    );
}

#[tokio::test]
async fn test_validate_rejects_empty_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  "))
        .mount(&server)
        .await;

    let result = plugin(&server).validate().await;
    assert!(!result.success);
    assert!(result
        .message
        .starts_with("Invalid authentication token received from Forescout."));
}

#[tokio::test]
async fn test_pull_fetches_host_details_and_skips_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("token-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/hosts"))
        .and(header("Authorization", "token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hosts": [
                {"hostId": 11, "ip": "10.0.0.5", "mac": "005056aa0001"},
                {"hostId": 12, "ip": "10.0.0.6", "mac": "005056aa0002"},
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/hosts/hostid/11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "host": {
                "id": 11,
                "ip": "10.0.0.5",
                "mac": "005056aa0001",
                "fields": {
                    "dhcp_hostname": {"value": "ws-01"},
                    "va_os": {"value": "Windows 11"},
                    "online": {"value": "true"},
                    "segment_path": {"value": "/Corp/Finance"},
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/hosts/hostid/12"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let devices = plugin(&server).pull(&PullCheckpoint::default()).await.unwrap();

    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.id, "11");
    assert_eq!(device.ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(device.hostname.as_deref(), Some("ws-01"));
    assert_eq!(device.os.as_deref(), Some("Windows 11"));
    assert_eq!(device.online, Some(true));
    assert_eq!(
        device.properties.get("segment_path").map(String::as_str),
        Some("/Corp/Finance")
    );
}

#[tokio::test]
async fn test_expired_token_is_regenerated_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stale"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/hosts"))
        .and(header("Authorization", "stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/hosts"))
        .and(header("Authorization", "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hosts": []})))
        .expect(1)
        .mount(&server)
        .await;

    let devices = plugin(&server).fetch_devices().await.unwrap();
    assert!(devices.is_empty());
}

#[tokio::test]
async fn test_second_unauthorized_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("token"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/hosts"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let err = plugin(&server).fetch_devices().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}
