use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One of the proxy URI schemes a decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Vless,
    Vmess,
    Trojan,
    #[serde(rename = "shadowsocks")]
    Shadowsocks,
    Hysteria2,
    Ssh,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Vless => "vless",
            Scheme::Vmess => "vmess",
            Scheme::Trojan => "trojan",
            Scheme::Shadowsocks => "shadowsocks",
            Scheme::Hysteria2 => "hysteria2",
            Scheme::Ssh => "ssh",
        }
    }
}

/// A decoded proxy endpoint.
///
/// `fields` holds every scheme-specific key in the order it should appear
/// after `tag, type, server, server_port` in the emitted outbound object.
/// It never contains `tag`, `type`, `server` or `server_port` itself —
/// those four are injected uniformly by [`Node::to_outbound_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub scheme: Scheme,
    pub tag: String,
    pub label: String,
    pub comment: String,
    pub server: String,
    pub port: u16,
    /// Transport-layer host hint (ws/http `host`, or TLS SNI) used by the
    /// filter engine's `host` projection, distinct from `server`.
    pub host_hint: String,
    pub fields: Map<String, Value>,
}

impl Node {
    pub fn new(scheme: Scheme, server: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            tag: String::new(),
            label: String::new(),
            comment: String::new(),
            server: server.into(),
            port,
            host_hint: String::new(),
            fields: Map::new(),
        }
    }

    /// Emit this node as an outbound JSON object in the locked field order.
    pub fn to_outbound_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("tag".into(), Value::String(self.tag.clone()));
        map.insert("type".into(), Value::String(self.scheme.as_str().into()));
        map.insert("server".into(), Value::String(self.server.clone()));
        map.insert("server_port".into(), Value::Number(self.port.into()));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}
