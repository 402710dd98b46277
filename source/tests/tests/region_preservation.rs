//! Scenario: a config document authored with pre-existing user comments and
//! formatting around the region markers keeps that formatting untouched
//! across a refresh; only the spliced region and stamped `last_updated`
//! change.

use std::fs;

use relaykeeper_config::service::ConfigurationService;
use tempfile::tempdir;

fn doc() -> String {
    r#"{
  // top-of-file comment, must survive
  "log_level": "info",
  "outbounds": [
    // a pre-existing hand-written entry, left alone because it's outside the markers
    { "tag": "direct", "type": "direct" },
    /** @ParserSTART */
    /** @ParserEND */
  ],
  /* { "ParserConfig": { "version": 2, "proxies": [
        { "connections": ["vless://u@h:443#Kept"], "outbounds": [] }
      ], "outbounds": [], "parser": { "last_updated": "2020-01-01T00:00:00Z" } } } */
  "unrelated": { "nested": [1, 2, 3] }
}
"#
    .to_string()
}

#[tokio::test]
async fn refresh_preserves_everything_outside_the_region_markers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, doc()).unwrap();

    let service = ConfigurationService::new(path.clone(), "relaykeeper-tests/0.0").unwrap();
    service.refresh(|_| {}).await.unwrap();

    let new_text = fs::read_to_string(&path).unwrap();
    assert!(new_text.contains("top-of-file comment, must survive"));
    assert!(new_text.contains("\"tag\": \"direct\", \"type\": \"direct\""));
    assert!(new_text.contains("\"unrelated\": { \"nested\": [1, 2, 3] }"));
    assert!(new_text.contains("\"tag\": \"Kept\""));
    assert!(!new_text.contains("2020-01-01T00:00:00Z"));
}
