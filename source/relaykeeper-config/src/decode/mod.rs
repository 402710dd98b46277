//! URI scheme decoders that turn a single subscription line into a [`Node`].
//! Each scheme lives in its own module; this file only dispatches on the
//! scheme prefix.

pub mod b64;
pub mod common;
pub mod hysteria2;
pub mod shadowsocks;
pub mod ssh;
pub mod trojan;
pub mod vless;
pub mod vmess;

use crate::error::DecodeError;
use crate::model::node::Node;

/// Decode one subscription line. A blank line is a no-op, not an error;
/// an unrecognized scheme is reported through [`DecodeError`].
pub fn decode_line(line: &str) -> Result<Option<Node>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let node = if trimmed.starts_with("vless://") {
        vless::decode(trimmed)?
    } else if trimmed.starts_with("vmess://") {
        vmess::decode(trimmed)?
    } else if trimmed.starts_with("trojan://") {
        trojan::decode(trimmed)?
    } else if trimmed.starts_with("ss://") {
        shadowsocks::decode(trimmed)?
    } else if trimmed.starts_with("hysteria2://") || trimmed.starts_with("hy2://") {
        hysteria2::decode(trimmed)?
    } else if trimmed.starts_with("ssh://") {
        ssh::decode(trimmed)?
    } else {
        let scheme = trimmed.split_once("://").map(|(s, _)| s).unwrap_or(trimmed);
        return Err(DecodeError::new("unknown", format!("unrecognized scheme '{scheme}'")));
    };

    Ok(Some(node))
}
