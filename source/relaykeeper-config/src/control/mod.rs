//! Control-Plane Client: a Clash-compatible HTTP client against the core's
//! local control API, with bearer auth and per-group request serialization.

pub mod session;
pub use session::ControlSession;

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::ControlError;
use crate::logsink::{NullSink, Sink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OVERALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sentinel value for a failed latency probe.
pub const FAILED_DELAY_MS: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGroup {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct GroupMembers {
    pub members: Vec<String>,
    pub now: String,
}

/// Holds the session state and serializes operations against one group at
/// a time.
pub struct ControlClient {
    client: Client,
    base_url: String,
    bearer_token: String,
    group_locks: Mutex<HashMap<String, std::sync::Arc<Mutex<()>>>>,
    sink: std::sync::Arc<dyn Sink>,
}

#[derive(Debug, Deserialize)]
struct ProxyRaw {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    now: Option<String>,
    #[serde(default)]
    all: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ProxiesResponse {
    proxies: HashMap<String, ProxyRaw>,
}

#[derive(Debug, Deserialize)]
struct DelayResponse {
    delay: i64,
}

impl ControlClient {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Result<Self, ControlError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(OVERALL_TIMEOUT)
            .build()
            .map_err(|e| ControlError::ControlUnreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            group_locks: Mutex::new(HashMap::new()),
            sink: std::sync::Arc::new(NullSink),
        })
    }

    /// Traces every request/response pair through `sink` in addition to the
    /// typed `ControlError` returned to the caller.
    pub fn with_sink(mut self, sink: std::sync::Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    fn trace(&self, line: std::fmt::Arguments<'_>) {
        self.sink.write_line(line);
    }

    async fn lock_for(&self, group: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mut locks = self.group_locks.lock().await;
        let entry = locks.entry(group.to_string()).or_insert_with(|| std::sync::Arc::new(Mutex::new(())));
        let entry = entry.clone();
        drop(locks);
        entry.lock_owned().await
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.bearer_token)
    }

    pub async fn test_connection(&self) -> Result<(), ControlError> {
        let url = self.base_url.clone();
        self.trace(format_args!("GET {url}"));
        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ControlError::ControlUnreachable(e.to_string()))?;
        self.trace(format_args!("GET {url} -> {}", resp.status()));
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ControlError::ControlAuth);
        }
        if !resp.status().is_success() {
            return Err(ControlError::ControlUnreachable(format!("status {}", resp.status())));
        }
        Ok(())
    }

    pub async fn list_groups(&self) -> Result<Vec<ProxyGroup>, ControlError> {
        let url = format!("{}/proxies", self.base_url);
        self.trace(format_args!("GET {url}"));
        let body: ProxiesResponse = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ControlError::ControlUnreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ControlError::ControlBadRequest(e.to_string()))?;

        Ok(body
            .proxies
            .into_iter()
            .filter(|(_, p)| matches!(p.kind.as_str(), "Selector" | "URLTest" | "selector" | "urltest"))
            .map(|(name, p)| ProxyGroup { name, kind: p.kind })
            .collect())
    }

    pub async fn list_members(&self, group: &str) -> Result<GroupMembers, ControlError> {
        let _guard = self.lock_for(group).await;
        let url = format!("{}/proxies/{group}", self.base_url);
        self.trace(format_args!("GET {url}"));
        let body: ProxyRaw = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ControlError::ControlUnreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ControlError::ControlBadRequest(e.to_string()))?;

        Ok(GroupMembers { members: body.all.unwrap_or_default(), now: body.now.unwrap_or_default() })
    }

    pub async fn probe_latency(&self, member: &str, reference_url: &str) -> Result<i64, ControlError> {
        self.probe_latency_with_timeout(member, reference_url, DEFAULT_PROBE_TIMEOUT).await
    }

    pub async fn probe_latency_with_timeout(&self, member: &str, reference_url: &str, timeout: Duration) -> Result<i64, ControlError> {
        let url = format!("{}/proxies/{member}/delay", self.base_url);
        self.trace(format_args!("GET {url} (reference={reference_url})"));
        let request = self.authorized(self.client.get(&url).query(&[("url", reference_url), ("timeout", &timeout.as_millis().to_string())]));

        match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(resp)) if resp.status().is_success() => {
                let body: DelayResponse = resp.json().await.map_err(|e| ControlError::ControlBadRequest(e.to_string()))?;
                self.trace(format_args!("GET {url} -> {}ms", body.delay));
                Ok(body.delay)
            }
            Ok(Ok(resp)) => {
                self.trace(format_args!("GET {url} -> status {}", resp.status()));
                Ok(FAILED_DELAY_MS)
            }
            Ok(Err(e)) => {
                self.trace(format_args!("GET {url} -> error {e}"));
                Ok(FAILED_DELAY_MS)
            }
            Err(_) => {
                self.trace(format_args!("GET {url} -> timed out"));
                Err(ControlError::ProbeTimeout)
            }
        }
    }

    pub async fn switch_active(&self, group: &str, member: &str, sessions: &Mutex<HashMap<String, String>>) -> Result<(), ControlError> {
        let _guard = self.lock_for(group).await;
        let url = format!("{}/proxies/{group}", self.base_url);
        self.trace(format_args!("PUT {url} (name={member})"));
        let resp = self
            .authorized(self.client.put(&url).json(&serde_json::json!({ "name": member })))
            .send()
            .await
            .map_err(|e| ControlError::ControlUnreachable(e.to_string()))?;

        if !resp.status().is_success() {
            self.trace(format_args!("PUT {url} -> status {}", resp.status()));
            return Err(ControlError::ControlBadRequest(format!("status {}", resp.status())));
        }

        sessions.lock().await.insert(group.to_string(), member.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ControlClient {
        ControlClient::new(server.uri(), "secret").unwrap()
    }

    #[tokio::test]
    async fn list_groups_filters_by_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "proxies": {
                    "auto": { "type": "URLTest", "now": "a", "all": ["a", "b"] },
                    "direct": { "type": "Direct" },
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let groups = client.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "auto");
    }

    #[tokio::test]
    async fn list_members_returns_active_member() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies/auto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "URLTest", "now": "a", "all": ["a", "b"]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.list_members("auto").await.unwrap();
        assert_eq!(result.now, "a");
        assert_eq!(result.members, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn probe_latency_returns_failed_sentinel_on_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/proxies/.*/delay$"))
            .respond_with(ResponseTemplate::new(504))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let delay = client.probe_latency("a", "https://example.com").await.unwrap();
        assert_eq!(delay, FAILED_DELAY_MS);
    }

    #[tokio::test]
    async fn probe_latency_times_out_distinctly_from_a_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/proxies/.*/delay$"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .probe_latency_with_timeout("a", "https://example.com", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ProbeTimeout));
    }

    #[tokio::test]
    async fn switch_active_updates_session_map() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/proxies/auto"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let sessions = Mutex::new(HashMap::new());
        client.switch_active("auto", "b", &sessions).await.unwrap();
        assert_eq!(sessions.lock().await.get("auto"), Some(&"b".to_string()));
    }
}
