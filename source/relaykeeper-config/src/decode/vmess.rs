use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::model::node::{Node, Scheme};

use super::b64;
use super::common::{comma_list, finalize_label, parse_port};

const SCHEME: &str = "vmess";

pub fn decode(line: &str) -> Result<Node, DecodeError> {
    let rest = line
        .strip_prefix("vmess://")
        .ok_or_else(|| DecodeError::new(SCHEME, "missing vmess:// prefix"))?;

    let (body, fragment) = match rest.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (rest, None),
    };

    let bytes = b64::decode_any(body).map_err(|e| DecodeError::new(SCHEME, e.to_string()))?;
    let payload: Value = serde_json::from_slice(&bytes).map_err(|e| DecodeError::new(SCHEME, e.to_string()))?;

    let obj = payload.as_object().ok_or_else(|| DecodeError::new(SCHEME, "payload is not a JSON object"))?;

    let get_str = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    let server = get_str("add");
    if server.is_empty() {
        return Err(DecodeError::new(SCHEME, "missing 'add' field"));
    }
    let port_raw = obj
        .get("port")
        .map(|v| match v {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => String::new(),
        })
        .unwrap_or_default();
    let port = parse_port(SCHEME, &port_raw)?;

    let uuid = get_str("id");
    if uuid.is_empty() {
        return Err(DecodeError::new(SCHEME, "missing 'id' field"));
    }

    let mut node = Node::new(Scheme::Vmess, server, port);
    node.fields.insert("uuid".into(), Value::String(uuid));

    let security = {
        let s = get_str("scy");
        if s.is_empty() { get_str("security") } else { s }
    };
    node.fields.insert(
        "security".into(),
        Value::String(if security.is_empty() { "auto".into() } else { security }),
    );

    if let Some(aid) = obj.get("aid") {
        node.fields.insert("alter_id".into(), aid.clone());
    }

    let net = get_str("net");
    if !net.is_empty() {
        let mut transport = Map::new();
        transport.insert("type".into(), Value::String(net));
        let path = get_str("path");
        if !path.is_empty() {
            transport.insert("path".into(), Value::String(path));
        }
        let host = get_str("host");
        if !host.is_empty() {
            transport.insert("host".into(), Value::String(host.clone()));
            node.host_hint = host;
        }
        node.fields.insert("transport".into(), Value::Object(transport));
    }

    let tls_flag = get_str("tls");
    if tls_flag == "tls" {
        let mut tls = Map::new();
        tls.insert("enabled".into(), Value::Bool(true));
        let sni = get_str("sni");
        if !sni.is_empty() {
            tls.insert("server_name".into(), Value::String(sni));
        }
        let alpn = get_str("alpn");
        if !alpn.is_empty() {
            tls.insert(
                "alpn".into(),
                Value::Array(comma_list(&alpn).into_iter().map(Value::String).collect()),
            );
        }
        let fp = get_str("fp");
        if !fp.is_empty() {
            let mut utls = Map::new();
            utls.insert("enabled".into(), Value::Bool(true));
            utls.insert("fingerprint".into(), Value::String(fp));
            tls.insert("utls".into(), Value::Object(utls));
        }
        node.fields.insert("tls".into(), Value::Object(tls));
    }

    let uri_fragment = fragment;
    let ps = get_str("ps");
    match uri_fragment {
        Some(f) if !f.is_empty() => finalize_label(&mut node, Some(f)),
        _ => finalize_label_from_plain(&mut node, &ps),
    }

    Ok(node)
}

/// Like `finalize_label`, but the source text is already plain (JSON `ps`
/// field), not percent-encoded.
fn finalize_label_from_plain(node: &mut Node, label: &str) {
    if label.is_empty() {
        node.label = String::new();
        node.comment = String::new();
        node.tag = super::common::synthesize_tag(node.scheme.as_str(), &node.server, node.port);
    } else {
        let (tag, comment) = super::common::split_label(label);
        node.label = label.to_string();
        node.tag = tag;
        node.comment = comment;
    }
}
