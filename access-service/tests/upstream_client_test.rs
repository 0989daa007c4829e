use access_service::models::Provider;
use access_service::services::{
    ArgOptionSource, HttpArgOptionSource, HttpProviderRegistry, ProviderRegistry,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry(server: &MockServer) -> HttpProviderRegistry {
    HttpProviderRegistry::new(&server.uri(), Duration::from_secs(5))
        .expect("Failed to build registry client")
}

#[tokio::test]
async fn registry_lookup_decodes_provider_documents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/acme/ec2/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "publisher": "acme",
            "name": "ec2",
            "version": "1.0.0",
            "schema": { "target": { "accountId": { "type": "string" } } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = registry(&server)
        .get_provider(&Provider::new("acme", "ec2", "1.0.0"))
        .await
        .unwrap();

    assert!(response.is_success());
    let detail = response.provider.unwrap();
    assert_eq!(detail.schema.target, json!({ "accountId": { "type": "string" } }));
}

#[tokio::test]
async fn registry_lookup_reports_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/acme/ec2/9.9.9"))
        .respond_with(ResponseTemplate::new(404).set_body_string("provider not found"))
        .mount(&server)
        .await;

    let response = registry(&server)
        .get_provider(&Provider::new("acme", "ec2", "9.9.9"))
        .await
        .unwrap();

    assert_eq!(response.status, 404);
    assert!(response.provider.is_none());
    assert_eq!(response.body, "provider not found");
}

#[tokio::test]
async fn registry_lookup_rejects_malformed_documents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/acme/ec2/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
        .mount(&server)
        .await;

    let result = registry(&server)
        .get_provider(&Provider::new("acme", "ec2", "1.0.0"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn option_source_fetches_and_maps_missing_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/aws-sso/args/accountId/options"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "options": [
                { "value": "123456789012", "label": "prod", "description": null, "groups": ["sre"] }
            ],
            "grouped_options": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/aws-sso/args/unknown/options"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/aws-sso/args/broken/options"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let source = HttpArgOptionSource::new(&server.uri(), Duration::from_secs(5)).unwrap();

    let options = source
        .fetch_options("aws-sso", "accountId")
        .await
        .unwrap()
        .expect("expected options");
    assert_eq!(options.options.len(), 1);
    assert_eq!(options.options[0].label, "prod");

    assert!(source
        .fetch_options("aws-sso", "unknown")
        .await
        .unwrap()
        .is_none());
    assert!(source.fetch_options("aws-sso", "broken").await.is_err());
}
