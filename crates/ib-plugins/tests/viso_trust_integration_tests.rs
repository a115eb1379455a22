//! Integration tests for the VISO TRUST plugin against a mock API.

use ib_plugins::testing::test_host_settings;
use ib_plugins::{
    Action, ApplicationRecord, Plugin, PluginError, PullCheckpoint, RecordSource,
    VisoTrustConfig, VisoTrustPlugin,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn plugin(server: &MockServer) -> VisoTrustPlugin {
    let config = VisoTrustConfig::from_value(&json!({
        "base_url": server.uri(),
        "api_token": "viso-token",
    }))
    .unwrap();
    VisoTrustPlugin::new("viso", config, test_host_settings(1)).unwrap()
}

fn app(name: &str, homepage: &str) -> ApplicationRecord {
    ApplicationRecord {
        name: name.to_string(),
        homepage: Some(homepage.to_string()),
        tags: vec!["saas".to_string()],
        ..Default::default()
    }
}

async fn mount_relationships(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/relationships"))
        .and(header("Authorization", "Bearer viso-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_validate_success() {
    let server = MockServer::start().await;
    mount_relationships(&server, json!([])).await;
    assert!(plugin(&server).validate().await.success);
}

#[tokio::test]
async fn test_validate_bad_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/relationships"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = plugin(&server).validate().await;
    assert_eq!(
        result.message,
        "Received exit code 401, Unauthorized, Verify API Token provided in the \
         configuration parameters."
    );
}

#[tokio::test]
async fn test_pull_maps_relationships() {
    let server = MockServer::start().await;
    mount_relationships(
        &server,
        json!([
            {
                "id": 5,
                "name": "Acme Payroll",
                "homepage": "acme.example.com",
                "tags": ["hr"],
                "residualRisk": "HIGH",
                "businessOwner": {"email": "owner@example.com"},
            },
            {"id": 6},
        ]),
    )
    .await;

    let apps = plugin(&server).pull(&PullCheckpoint::default()).await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].id, "5");
    assert_eq!(apps[0].risk_level.as_deref(), Some("HIGH"));
}

#[tokio::test]
async fn test_push_creates_only_new_relationships() {
    let server = MockServer::start().await;
    mount_relationships(&server, json!([{"id": 1, "name": "Acme"}])).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/relationships/create"))
        .and(body_partial_json(json!({
            "name": "Globex",
            "homepage": "globex.example.com",
            "businessOwnerEmail": "owner@example.com",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/relationships/create"))
        .and(body_partial_json(json!({"name": "Initech"})))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let action = Action::new("Create Relationship", "create_relationship")
        .with_parameter("business_owner_email", json!("owner@example.com"));
    let apps = vec![
        app("ACME", "acme.example.com"),
        app("Globex", "globex\u{200b}.example.com"),
        app("Initech", "initech.example.com"),
    ];
    let result = plugin(&server).push_applications(&apps, &action).await.unwrap();

    assert!(result.success);
    assert_eq!(result.pushed, 1);
    assert_eq!(result.failed, 1);
    assert!(result.message.contains("skipped 1 existing"));
}

#[tokio::test]
async fn test_push_rejects_unknown_action() {
    let server = MockServer::start().await;
    let err = plugin(&server)
        .push_applications(&[], &Action::new("x", "syslog"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Validation(_)));
}
