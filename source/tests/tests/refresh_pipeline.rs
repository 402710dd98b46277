//! End-to-end coverage of fetch -> decode -> filter -> assemble -> commit
//! through `ConfigurationService::refresh`, against a mocked subscription
//! endpoint and a real temp-file config document.

use std::fs;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use relaykeeper_config::service::ConfigurationService;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_with_one_subscription(sub_url: &str) -> String {
    format!(
        r#"{{
  // region preserved across refreshes
  "outbounds": [
    /** @ParserSTART */
    /** @ParserEND */
  ],
  /* {{ "ParserConfig": {{ "version": 2, "proxies": [
        {{ "source": "{sub_url}", "outbounds": [
          {{ "tag": "auto", "type": "urltest", "filters": {{}} }}
        ] }}
      ], "outbounds": [], "parser": {{ "last_updated": "2026-01-01T00:00:00Z" }} }} }} */
  "trailer": "kept"
}}
"#
    )
}

#[tokio::test]
async fn base64_subscription_is_decoded_filtered_and_committed() {
    let server = MockServer::start().await;
    let raw = "vless://11111111-1111-1111-1111-111111111111@proxy.example:443?security=tls&sni=proxy.example#NL-1\nss://YWVzLTI1Ni1nY206cGFzcw==@proxy2.example:8388#DE-1";
    let body = STANDARD.encode(raw);
    Mock::given(method("GET")).and(path("/sub")).respond_with(ResponseTemplate::new(200).set_body_string(body)).mount(&server).await;

    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, config_with_one_subscription(&format!("{}/sub", server.uri()))).unwrap();

    let service = ConfigurationService::new(config_path.clone(), "relaykeeper-tests/0.0").unwrap();
    service.refresh(|_| {}).await.unwrap();

    let new_text = fs::read_to_string(&config_path).unwrap();
    assert!(new_text.contains("\"tag\": \"NL-1\""));
    assert!(new_text.contains("\"tag\": \"DE-1\""));
    assert!(new_text.contains("\"tag\": \"auto\""));
    assert!(new_text.contains("region preserved across refreshes"));
    assert!(new_text.contains("\"trailer\": \"kept\""));
    assert!(dir.path().join("config-old.json").exists());
}

#[tokio::test]
async fn refresh_skips_unreachable_source_without_failing_the_whole_pass() {
    let server = MockServer::start().await;
    // No mock mounted for /sub: the fetch fails and that source contributes
    // nothing, but the refresh as a whole should still succeed once at
    // least one literal connection line exists.
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let doc = format!(
        r#"{{
  "outbounds": [
    /** @ParserSTART */
    /** @ParserEND */
  ],
  /* {{ "ParserConfig": {{ "version": 2, "proxies": [
        {{ "source": "{}/missing", "connections": ["vless://u@h:443#Fallback"], "outbounds": [] }}
      ], "outbounds": [], "parser": {{}} }} }} */
  "other": true
}}
"#,
        server.uri()
    );
    fs::write(&config_path, doc).unwrap();

    let service = ConfigurationService::new(config_path.clone(), "relaykeeper-tests/0.0").unwrap();
    service.refresh(|_| {}).await.unwrap();

    let new_text = fs::read_to_string(&config_path).unwrap();
    assert!(new_text.contains("\"tag\": \"Fallback\""));
}
