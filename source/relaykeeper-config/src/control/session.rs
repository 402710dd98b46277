//! Control-plane session state: the enabled flag, selected group,
//! per-group last-selected member, and cached member lists, scoped to the
//! Supervisor's running state.
//!
//! Invariant: while the supervised core is not running, `enabled` reads
//! false and every cache is empty. [`ControlSession::set_running`] is the
//! single place that transition is driven from; the Supervisor calls it on
//! every `RunState` change into or out of `running`.

use std::collections::HashMap;

use tokio::sync::Mutex;

use super::{ControlClient, GroupMembers, ProxyGroup};
use crate::error::ControlError;

#[derive(Default)]
struct Cache {
    selected_group: Option<String>,
    cached_member_list: HashMap<String, GroupMembers>,
    active_member: HashMap<String, String>,
}

/// Wraps a [`ControlClient`] with the session state described above.
pub struct ControlSession {
    client: ControlClient,
    enabled: Mutex<bool>,
    cache: Mutex<Cache>,
    last_selected_member_per_group: Mutex<HashMap<String, String>>,
}

impl ControlSession {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Result<Self, ControlError> {
        Ok(Self {
            client: ControlClient::new(base_url, bearer_token)?,
            enabled: Mutex::new(false),
            cache: Mutex::new(Cache::default()),
            last_selected_member_per_group: Mutex::new(HashMap::new()),
        })
    }

    /// Drives the P6 transition. Entering `running` enables the bridge;
    /// leaving it clears every cache so a later display never observes a
    /// member list or active member from a previous run of the core.
    pub async fn set_running(&self, running: bool) {
        *self.enabled.lock().await = running;
        if !running {
            let mut cache = self.cache.lock().await;
            cache.selected_group = None;
            cache.cached_member_list.clear();
            cache.active_member.clear();
        }
    }

    pub async fn enabled(&self) -> bool {
        *self.enabled.lock().await
    }

    async fn require_enabled(&self) -> Result<(), ControlError> {
        if *self.enabled.lock().await {
            Ok(())
        } else {
            Err(ControlError::ControlDisabled)
        }
    }

    pub async fn test_connection(&self) -> Result<(), ControlError> {
        self.require_enabled().await?;
        self.client.test_connection().await
    }

    pub async fn list_groups(&self) -> Result<Vec<ProxyGroup>, ControlError> {
        self.require_enabled().await?;
        self.client.list_groups().await
    }

    pub async fn list_members(&self, group: &str) -> Result<GroupMembers, ControlError> {
        self.require_enabled().await?;
        let members = self.client.list_members(group).await?;
        let mut cache = self.cache.lock().await;
        cache.selected_group = Some(group.to_string());
        cache.active_member.insert(group.to_string(), members.now.clone());
        cache.cached_member_list.insert(group.to_string(), members.clone());
        Ok(members)
    }

    pub async fn probe_latency(&self, member: &str, reference_url: &str) -> Result<i64, ControlError> {
        self.require_enabled().await?;
        self.client.probe_latency(member, reference_url).await
    }

    pub async fn switch_active(&self, group: &str, member: &str) -> Result<(), ControlError> {
        self.require_enabled().await?;
        self.client.switch_active(group, member, &self.last_selected_member_per_group).await?;
        let mut cache = self.cache.lock().await;
        cache.selected_group = Some(group.to_string());
        cache.active_member.insert(group.to_string(), member.to_string());
        Ok(())
    }

    /// Display projection of the cached member list for `group`, honoring
    /// P6: `None` whenever the bridge is disabled, regardless of whether a
    /// stale cache entry happens to still be present underneath.
    pub async fn cached_members(&self, group: &str) -> Option<GroupMembers> {
        if !self.enabled().await {
            return None;
        }
        self.cache.lock().await.cached_member_list.get(group).cloned()
    }
}
