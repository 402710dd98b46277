use percent_encoding::percent_decode_str;
use serde_json::Value;
use url::Url;

use crate::error::DecodeError;
use crate::model::node::{Node, Scheme};

use super::b64;
use super::common::{decode_userinfo_maybe_b64, finalize_label, parse_port, strip_ipv6_brackets};

const SCHEME: &str = "ss";

pub fn decode(line: &str) -> Result<Node, DecodeError> {
    if let Ok(url) = Url::parse(line) {
        if !url.username().is_empty() {
            return decode_url_form(line, &url);
        }
    }
    decode_legacy_form(line)
}

/// `ss://method:password@host:port#frag` or `ss://BASE64(method:password)@host:port#frag`.
fn decode_url_form(line: &str, url: &Url) -> Result<Node, DecodeError> {
    let username = percent_decode_str(url.username())
        .decode_utf8()
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| url.username().to_string());

    let (method, password) = decode_userinfo_maybe_b64(&username)
        .ok_or_else(|| DecodeError::new(SCHEME, "invalid user-info"))?;

    let host = url
        .host_str()
        .ok_or_else(|| DecodeError::new(SCHEME, "missing host"))?;
    let server = strip_ipv6_brackets(host).to_string();
    let port = url.port().ok_or_else(|| DecodeError::new(SCHEME, "missing port"))?;
    let port = parse_port(SCHEME, &port.to_string())?;

    let mut node = Node::new(Scheme::Shadowsocks, server, port);
    node.fields.insert("method".into(), Value::String(method));
    node.fields.insert("password".into(), Value::String(password));

    finalize_label(&mut node, url.fragment());
    let _ = line;
    Ok(node)
}

/// Fully legacy form: `ss://BASE64(method:password@host:port)#frag`.
fn decode_legacy_form(line: &str) -> Result<Node, DecodeError> {
    let rest = line
        .strip_prefix("ss://")
        .ok_or_else(|| DecodeError::new(SCHEME, "missing ss:// prefix"))?;
    let (body, fragment) = match rest.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (rest, None),
    };

    let bytes = b64::decode_any(body).map_err(|e| DecodeError::new(SCHEME, e.to_string()))?;
    let decoded = String::from_utf8(bytes).map_err(|e| DecodeError::new(SCHEME, e.to_string()))?;

    let (userinfo, hostport) = decoded
        .split_once('@')
        .ok_or_else(|| DecodeError::new(SCHEME, "missing '@' in legacy payload"))?;
    let (method, password) = userinfo
        .split_once(':')
        .ok_or_else(|| DecodeError::new(SCHEME, "missing ':' in legacy user-info"))?;
    let (host, port_str) = hostport
        .rsplit_once(':')
        .ok_or_else(|| DecodeError::new(SCHEME, "missing port in legacy payload"))?;
    let server = strip_ipv6_brackets(host).to_string();
    let port = parse_port(SCHEME, port_str)?;

    let mut node = Node::new(Scheme::Shadowsocks, server, port);
    node.fields.insert("method".into(), Value::String(method.to_string()));
    node.fields.insert("password".into(), Value::String(password.to_string()));

    finalize_label(&mut node, fragment);
    Ok(node)
}
