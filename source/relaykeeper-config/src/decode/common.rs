//! Shared helpers used by every scheme decoder.

use percent_encoding::percent_decode_str;
use std::collections::HashMap;

use crate::error::DecodeError;
use crate::model::node::Node;

/// Percent-decode a raw URI fragment into the Node's `label`.
pub fn decode_fragment(raw_fragment: &str) -> String {
    percent_decode_str(raw_fragment)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw_fragment.to_string())
}

/// `tag` is `label` left of the first `|`; `comment` is the rest.
pub fn split_label(label: &str) -> (String, String) {
    match label.split_once('|') {
        Some((tag, comment)) => (tag.to_string(), comment.to_string()),
        None => (label.to_string(), String::new()),
    }
}

pub fn synthesize_tag(scheme: &str, server: &str, port: u16) -> String {
    format!("{scheme}-{server}:{port}")
}

/// Populate `label`, `tag`, `comment` on a freshly decoded node, applying
/// the empty-label synthesis fallback.
pub fn finalize_label(node: &mut Node, raw_fragment: Option<&str>) {
    let label = raw_fragment.map(decode_fragment).unwrap_or_default();
    if label.is_empty() {
        node.label = String::new();
        node.comment = String::new();
        node.tag = synthesize_tag(node.scheme.as_str(), &node.server, node.port);
    } else {
        let (tag, comment) = split_label(&label);
        node.label = label;
        node.tag = tag;
        node.comment = comment;
    }
}

pub fn parse_port(scheme: &'static str, s: &str) -> Result<u16, DecodeError> {
    s.parse::<u16>()
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| DecodeError::new(scheme, format!("invalid port '{s}'")))
}

/// Strip IPv6 brackets from a host component (`[::1]` -> `::1`) so `server`
/// stores the bare address; the bracket form is only a URI-syntax artifact.
pub fn strip_ipv6_brackets(host: &str) -> &str {
    host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host)
}

/// Parse a `url::Url`'s query string into a flat map, last-value-wins.
pub fn query_map(url: &url::Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

pub fn comma_list(s: &str) -> Vec<String> {
    s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

pub fn parse_bool(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Parse a (possibly base64-wrapped) user:password pair for shadowsocks.
/// Tries literal `method:password` first, then standard and URL-safe base64
/// with or without padding.
pub fn decode_userinfo_maybe_b64(userinfo: &str) -> Option<(String, String)> {
    if let Some((m, p)) = userinfo.split_once(':') {
        return Some((m.to_string(), p.to_string()));
    }
    super::b64::decode_any(userinfo)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.split_once(':').map(|(m, p)| (m.to_string(), p.to_string())))
}
