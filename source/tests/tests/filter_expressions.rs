//! Scenario: AND (object form) and OR (list form) filter expressions,
//! authored exactly as they'd appear in the directive JSON, select the
//! expected members through a full refresh.

use std::fs;

use relaykeeper_config::region::jsonc::strip_comments;
use relaykeeper_config::service::ConfigurationService;
use tempfile::tempdir;

fn doc() -> String {
    r#"{
  "outbounds": [
    /** @ParserSTART */
    /** @ParserEND */
  ],
  /* { "ParserConfig": { "version": 2, "proxies": [
        { "connections": [
            "vless://u@h1:443#NL-A",
            "vless://u@h2:443#NL-B",
            "vless://u@h3:443#US-A",
            "vless://u@h4:443#RU-A"
          ],
          "outbounds": [
            { "tag": "nl-tls", "type": "selector",
              "filters": { "tag": "/^NL/", "scheme": "vless" } },
            { "tag": "nl-or-us", "type": "selector",
              "filters": [ { "tag": "/^NL/" }, { "tag": "/^US/" } ] }
          ]
        }
      ], "outbounds": [], "parser": {} } } */
  "other": true
}
"#
    .to_string()
}

#[tokio::test]
async fn and_filter_narrows_to_matching_scheme_and_tag_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, doc()).unwrap();

    let service = ConfigurationService::new(path.clone(), "relaykeeper-tests/0.0").unwrap();
    service.refresh(|_| {}).await.unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = {
        let start = text.find("/** @ParserSTART */").unwrap();
        let end = text.find("/** @ParserEND */").unwrap();
        let body = &text[start + "/** @ParserSTART */".len()..end];
        let stripped = strip_comments(&format!("[{}]", body.trim_end_matches(',').trim()));
        serde_json::from_str(&stripped).unwrap()
    };
    let array = value.as_array().unwrap();

    let nl_tls = array.iter().find(|v| v["tag"] == "nl-tls").expect("nl-tls selector present");
    let members: Vec<&str> = nl_tls["outbounds"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(members, vec!["NL-A", "NL-B"]);

    let nl_or_us = array.iter().find(|v| v["tag"] == "nl-or-us").expect("nl-or-us selector present");
    let members: Vec<&str> = nl_or_us["outbounds"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(members, vec!["NL-A", "NL-B", "US-A"]);
}
