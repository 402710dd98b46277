use serde_json::{Map, Value};
use url::Url;

use crate::error::DecodeError;
use crate::model::node::{Node, Scheme};

use super::common::{finalize_label, parse_bool, parse_port, query_map, strip_ipv6_brackets};

const SCHEME: &str = "vless";

pub fn decode(line: &str) -> Result<Node, DecodeError> {
    let url = Url::parse(line).map_err(|e| DecodeError::new(SCHEME, e.to_string()))?;

    let uuid = url.username();
    if uuid.is_empty() {
        return Err(DecodeError::new(SCHEME, "missing uuid in user-info"));
    }

    let host = url
        .host_str()
        .ok_or_else(|| DecodeError::new(SCHEME, "missing host"))?;
    let server = strip_ipv6_brackets(host).to_string();
    let port = url.port().ok_or_else(|| DecodeError::new(SCHEME, "missing port"))?;
    let port = parse_port(SCHEME, &port.to_string())?;

    let q = query_map(&url);

    let mut node = Node::new(Scheme::Vless, server, port);
    node.fields.insert("uuid".into(), Value::String(uuid.to_string()));

    if let Some(flow) = q.get("flow") {
        if !flow.is_empty() {
            node.fields.insert("flow".into(), Value::String(flow.clone()));
        }
    }

    let security = q.get("security").map(String::as_str).unwrap_or("none");
    if security == "tls" || security == "reality" {
        let mut tls = Map::new();
        tls.insert("enabled".into(), Value::Bool(true));
        let sni = q.get("sni").or_else(|| q.get("servername"));
        if let Some(sni) = sni {
            tls.insert("server_name".into(), Value::String(sni.clone()));
        }
        if let Some(insecure) = q.get("allowInsecure") {
            tls.insert("insecure".into(), Value::Bool(parse_bool(insecure)));
        }
        if let Some(fp) = q.get("fp") {
            let mut utls = Map::new();
            utls.insert("enabled".into(), Value::Bool(true));
            utls.insert("fingerprint".into(), Value::String(fp.clone()));
            tls.insert("utls".into(), Value::Object(utls));
        }
        if security == "reality" {
            let mut reality = Map::new();
            reality.insert("enabled".into(), Value::Bool(true));
            if let Some(pbk) = q.get("pbk") {
                reality.insert("public_key".into(), Value::String(pbk.clone()));
            }
            if let Some(sid) = q.get("sid") {
                reality.insert("short_id".into(), Value::String(sid.clone()));
            }
            tls.insert("reality".into(), Value::Object(reality));
        }
        node.fields.insert("tls".into(), Value::Object(tls));
    }

    if let Some(net) = q.get("type") {
        if matches!(net.as_str(), "ws" | "grpc" | "http") {
            let mut transport = Map::new();
            transport.insert("type".into(), Value::String(net.clone()));
            if let Some(path) = q.get("path") {
                transport.insert("path".into(), Value::String(path.clone()));
            }
            if let Some(host) = q.get("host") {
                transport.insert("host".into(), Value::String(host.clone()));
            }
            if let Some(service_name) = q.get("serviceName") {
                transport.insert("service_name".into(), Value::String(service_name.clone()));
            }
            if let Some(header_type) = q.get("headerType") {
                transport.insert("header_type".into(), Value::String(header_type.clone()));
            }
            if let Some(mode) = q.get("mode") {
                transport.insert("mode".into(), Value::String(mode.clone()));
            }
            node.fields.insert("transport".into(), Value::Object(transport));
        }
    }

    if let Some(host) = q.get("host").or_else(|| q.get("sni")) {
        node.host_hint = host.clone();
    }

    finalize_label(&mut node, url.fragment());
    Ok(node)
}
