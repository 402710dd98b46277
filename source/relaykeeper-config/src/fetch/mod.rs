//! Subscription Fetcher: turns a ProxySource's `source` URL into an ordered
//! list of candidate URI strings, concatenated in front of its literal
//! `connections` list.

use std::time::Duration;

use reqwest::Client;

use crate::decode::b64;
use crate::error::FetchError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SIZE_CAP: u64 = 2 * 1024 * 1024;

const KNOWN_SCHEMES: &[&str] = &["vless://", "vmess://", "trojan://", "ss://", "hysteria2://", "hy2://", "ssh://"];

/// Build the shared client used for every subscription fetch. Built once by
/// the Configuration Service and reused across refreshes.
pub fn build_client(user_agent: &str) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(user_agent.to_string())
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| FetchError::Network(e.to_string()))
}

/// Fetch one subscription body and split it into candidate URI lines.
pub async fn fetch_lines(client: &Client, url: &str) -> Result<Vec<String>, FetchError> {
    fetch_lines_capped(client, url, DEFAULT_SIZE_CAP).await
}

pub async fn fetch_lines_capped(client: &Client, url: &str, size_cap: u64) -> Result<Vec<String>, FetchError> {
    let response = client.get(url).send().await.map_err(|e| FetchError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let body = read_body_capped(response, size_cap).await?;
    let text = String::from_utf8(body).map_err(|_| FetchError::Decode)?;

    Ok(split_candidates(&text))
}

async fn read_body_capped(mut response: reqwest::Response, size_cap: u64) -> Result<Vec<u8>, FetchError> {
    let mut buf = Vec::new();
    loop {
        let chunk = response.chunk().await.map_err(|e| FetchError::Network(e.to_string()))?;
        let Some(chunk) = chunk else { break };
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > size_cap {
            return Err(FetchError::TooLarge);
        }
    }
    Ok(buf)
}

/// Split a subscription body into candidate URI lines, retrying through a
/// base64 unwrap when the raw text isn't already line-delimited URIs.
fn split_candidates(text: &str) -> Vec<String> {
    let direct = lines_with_known_scheme(text);
    if !direct.is_empty() {
        return direct;
    }

    if let Ok(decoded) = b64::decode_any(text) {
        if let Ok(decoded_text) = String::from_utf8(decoded) {
            return lines_with_known_scheme(&decoded_text);
        }
    }

    Vec::new()
}

fn lines_with_known_scheme(text: &str) -> Vec<String> {
    let non_empty: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if non_empty.is_empty() {
        return Vec::new();
    }
    let all_known = non_empty.iter().all(|l| KNOWN_SCHEMES.iter().any(|s| l.starts_with(s)));
    if !all_known {
        return Vec::new();
    }
    non_empty.into_iter().map(str::to_string).collect()
}

/// Concatenate fetched lines with a ProxySource's literal `connections`,
/// fetched lines first.
pub fn candidate_list(fetched: Vec<String>, connections: &[String]) -> Vec<String> {
    let mut out = fetched;
    out.extend(connections.iter().cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn splits_plain_uri_lines() {
        let body = "vless://u@h:443\n\nss://m:p@h2:8388\n";
        let lines = split_candidates(body);
        assert_eq!(lines, vec!["vless://u@h:443", "ss://m:p@h2:8388"]);
    }

    #[test]
    fn falls_back_to_base64_body() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let raw = "vless://u@h:443\nss://m:p@h2:8388";
        let body = STANDARD.encode(raw);
        let lines = split_candidates(&body);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn unrecognized_body_yields_empty() {
        let lines = split_candidates("not a uri at all, just prose");
        assert!(lines.is_empty());
    }

    #[test]
    fn candidate_list_puts_fetched_lines_first() {
        let fetched = vec!["vless://a".to_string()];
        let connections = vec!["ss://b".to_string()];
        assert_eq!(candidate_list(fetched, &connections), vec!["vless://a", "ss://b"]);
    }

    #[tokio::test]
    async fn fetch_lines_rejects_oversized_body() {
        let server = MockServer::start().await;
        let big_body = "x".repeat(64);
        Mock::given(method("GET"))
            .and(path("/sub"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big_body))
            .mount(&server)
            .await;

        let client = build_client("relaykeeper-test/0.0").unwrap();
        let url = format!("{}/sub", server.uri());
        let err = fetch_lines_capped(&client, &url, 16).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge));
    }

    #[tokio::test]
    async fn fetch_lines_propagates_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = build_client("relaykeeper-test/0.0").unwrap();
        let url = format!("{}/sub", server.uri());
        let err = fetch_lines(&client, &url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
    }
}
