//! Configuration Service: orchestrates fetch → decode → filter → assemble
//! → commit for one refresh, serialized by a `try_lock` gate, and
//! self-schedules a reload ticker when the directive sets `reload`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::assemble::{self, SourceCandidates};
use crate::error::ServiceError;
use crate::fetch;
use crate::logsink::{NullSink, Sink};
use crate::region;

const RELOAD_TICK: Duration = Duration::from_secs(60);

/// Orchestrates one refresh pass. Holds the shared HTTP client and the
/// concurrency gate; does not own the supervisor, which stays uninvolved in
/// reload scheduling.
pub struct ConfigurationService {
    config_path: PathBuf,
    client: Client,
    gate: Mutex<()>,
    sink: Arc<dyn Sink>,
}

impl ConfigurationService {
    pub fn new(config_path: PathBuf, user_agent: &str) -> Result<Self, ServiceError> {
        let client = fetch::build_client(user_agent).map_err(|e| ServiceError::CommitFailed(e.to_string()))?;
        Ok(Self { config_path, client, gate: Mutex::new(()), sink: Arc::new(NullSink) })
    }

    /// Traces each refresh's source fetches and outcome through `sink`
    /// alongside the existing `tracing` events.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs one refresh, rejecting re-entrant callers with `RefreshBusy`
    /// rather than queuing them.
    pub async fn refresh(&self, mut progress: impl FnMut(u8) + Send) -> Result<(), ServiceError> {
        let _permit = self.gate.try_lock().map_err(|_| ServiceError::RefreshBusy)?;

        let directive = region::extract_directive(&self.config_path)?;
        progress(0);
        self.sink.write_line(format_args!("refresh started for {}", self.config_path.display()));

        let total_sources = directive.proxies.len().max(1);
        let mut source_candidates = Vec::with_capacity(directive.proxies.len());

        for (i, proxy_source) in directive.proxies.iter().enumerate() {
            let mut fetched = Vec::new();
            if let Some(url) = &proxy_source.source {
                match fetch::fetch_lines(&self.client, url).await {
                    Ok(lines) => {
                        self.sink.write_line(format_args!("fetched {} lines from {url}", lines.len()));
                        fetched = lines;
                    }
                    Err(e) => {
                        self.sink.write_line(format_args!("fetch failed for {url}: {e}"));
                        warn!(url, error = %e, "subscription fetch failed; source skipped");
                    }
                }
            }
            let candidates = fetch::candidate_list(fetched, &proxy_source.connections);
            source_candidates.push(SourceCandidates { source: proxy_source.clone(), lines: candidates });
            progress(10 + ((i + 1) * 30 / total_sources) as u8);
        }

        progress(40);
        let mut warnings = Vec::new();
        let fragments = assemble::assemble(source_candidates, &directive.outbounds, &mut warnings);
        for warning in &warnings {
            warn!(%warning, "assembler warning");
        }
        progress(95);

        if fragments.is_empty() && !directive.proxies.is_empty() {
            return Err(ServiceError::AssemblerEmpty);
        }

        let trailing_comma = region::content_follows_end_marker(&self.config_path).unwrap_or(false);
        let body = assemble::render_region(&fragments, trailing_comma);

        let last_updated = OffsetDateTime::now_utc();
        let sentinel_payload = directive.to_sentinel_payload(last_updated);
        region::commit(&self.config_path, &sentinel_payload, &body)?;

        progress(100);
        self.sink.write_line(format_args!("refresh committed {} entries", fragments.len()));
        info!(nodes_and_selectors = fragments.len(), "configuration refreshed");
        Ok(())
    }

    /// Spawns the 60 s reload ticker as a background task. Never involves
    /// the supervisor; callers that need the core stopped during refresh
    /// are responsible for doing so themselves.
    pub fn spawn_reload_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RELOAD_TICK);
            loop {
                interval.tick().await;
                let due = match region::extract_directive(&self.config_path) {
                    Ok(directive) => directive.is_due_for_reload(OffsetDateTime::now_utc()),
                    Err(e) => {
                        warn!(error = %e, "reload ticker could not read directive");
                        false
                    }
                };
                if due {
                    info!("scheduled reload is due; starting refresh");
                    if let Err(e) = self.refresh(|_| {}).await {
                        warn!(error = %e, "scheduled refresh failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn doc_with_one_source() -> String {
        r#"{
  "outbounds": [
    /** @ParserSTART */
    /** @ParserEND */
  ],
  /* { "ParserConfig": { "version": 2, "proxies": [
        { "connections": ["vless://u@h:443#A"], "outbounds": [] }
      ], "outbounds": [], "parser": { "last_updated": "2026-01-01T00:00:00Z" } } } */
  "other": true
}
"#
        .to_string()
    }

    #[tokio::test]
    async fn refresh_commits_decoded_node_and_reports_full_progress() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, doc_with_one_source()).unwrap();

        let service = ConfigurationService::new(path.clone(), "relaykeeper-test/0.0").unwrap();
        let mut percents = Vec::new();
        service.refresh(|p| percents.push(p)).await.unwrap();

        assert_eq!(percents.last(), Some(&100));
        let new_text = fs::read_to_string(&path).unwrap();
        assert!(new_text.contains("\"tag\": \"A\""));
        assert!(new_text.contains("\"other\": true"));
    }

    #[tokio::test]
    async fn concurrent_refresh_is_rejected_as_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, doc_with_one_source()).unwrap();

        let service = Arc::new(ConfigurationService::new(path, "relaykeeper-test/0.0").unwrap());
        let gate = service.gate.lock().await;
        let err = service.refresh(|_| {}).await.unwrap_err();
        assert!(matches!(err, ServiceError::RefreshBusy));
        drop(gate);
    }
}
