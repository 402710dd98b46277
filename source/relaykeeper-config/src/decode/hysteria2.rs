use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::error::DecodeError;
use crate::model::node::{Node, Scheme};

use super::common::{comma_list, finalize_label, parse_bool, parse_port, strip_ipv6_brackets};

const SCHEME: &str = "hysteria2";

/// hysteria2 URIs allow a non-standard `host:"a,b-c"` multi-port form that
/// `url::Url` rejects as an invalid port, so the authority is split by hand
/// instead of going through a full URI parser.
pub fn decode(line: &str) -> Result<Node, DecodeError> {
    let rest = line
        .strip_prefix("hysteria2://")
        .or_else(|| line.strip_prefix("hy2://"))
        .ok_or_else(|| DecodeError::new(SCHEME, "missing hysteria2:// or hy2:// prefix"))?;

    let (rest, fragment) = match rest.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (rest, None),
    };
    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let (userinfo, hostport) = authority
        .split_once('@')
        .ok_or_else(|| DecodeError::new(SCHEME, "missing password in user-info"))?;
    if userinfo.is_empty() {
        return Err(DecodeError::new(SCHEME, "missing password in user-info"));
    }
    let password = percent_decode_str(userinfo)
        .decode_utf8()
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| userinfo.to_string());

    let (host_part, port_spec) = split_host_port(hostport)
        .ok_or_else(|| DecodeError::new(SCHEME, "missing port"))?;
    let server = strip_ipv6_brackets(host_part).to_string();

    let q: std::collections::HashMap<String, String> = query
        .map(|raw| url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut node = Node::new(Scheme::Hysteria2, server, 0);
    node.fields.insert("password".into(), Value::String(password));

    let ports = comma_list(port_spec);
    if ports.len() == 1 {
        node.port = parse_port(SCHEME, &ports[0])?;
    } else {
        node.fields.insert(
            "server_ports".into(),
            Value::Array(ports.into_iter().map(Value::String).collect()),
        );
    }

    let mut tls = serde_json::Map::new();
    tls.insert("enabled".into(), Value::Bool(true));
    let sni = q.get("sni").or_else(|| q.get("peer"));
    if let Some(sni) = sni {
        tls.insert("server_name".into(), Value::String(sni.clone()));
        node.host_hint = sni.clone();
    }
    if let Some(insecure) = q.get("insecure") {
        tls.insert("insecure".into(), Value::Bool(parse_bool(insecure)));
    }
    if let Some(alpn) = q.get("alpn") {
        tls.insert(
            "alpn".into(),
            Value::Array(comma_list(alpn).into_iter().map(Value::String).collect()),
        );
    }
    if let Some(pin) = q.get("pinSHA256") {
        tls.insert("pin_sha256".into(), Value::String(pin.clone()));
    }
    node.fields.insert("tls".into(), Value::Object(tls));

    if let Some(obfs) = q.get("obfs") {
        if !obfs.is_empty() {
            let mut obfs_obj = serde_json::Map::new();
            obfs_obj.insert("type".into(), Value::String(obfs.clone()));
            if let Some(obfs_password) = q.get("obfs-password") {
                obfs_obj.insert("password".into(), Value::String(obfs_password.clone()));
            }
            node.fields.insert("obfs".into(), Value::Object(obfs_obj));
        }
    }

    if let Some(up) = q.get("up") {
        node.fields.insert("up_mbps".into(), Value::String(up.clone()));
    }
    if let Some(down) = q.get("down") {
        node.fields.insert("down_mbps".into(), Value::String(down.clone()));
    }

    finalize_label(&mut node, fragment);
    Ok(node)
}

fn split_host_port(hostport: &str) -> Option<(&str, &str)> {
    if let Some(stripped) = hostport.strip_prefix('[') {
        let (ipv6, tail) = stripped.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((ipv6, port));
    }
    hostport.split_once(':')
}
