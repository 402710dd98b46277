use serde_json::Value;
use url::Url;

use crate::error::DecodeError;
use crate::model::node::{Node, Scheme};

use super::common::{finalize_label, parse_port, query_map, strip_ipv6_brackets};

const SCHEME: &str = "ssh";

pub fn decode(line: &str) -> Result<Node, DecodeError> {
    let url = Url::parse(line).map_err(|e| DecodeError::new(SCHEME, e.to_string()))?;

    let user = url.username();
    if user.is_empty() {
        return Err(DecodeError::new(SCHEME, "missing user in user-info"));
    }

    let host = url
        .host_str()
        .ok_or_else(|| DecodeError::new(SCHEME, "missing host"))?;
    let server = strip_ipv6_brackets(host).to_string();
    let port = url.port().unwrap_or(22);
    let port = parse_port(SCHEME, &port.to_string())?;

    let q = query_map(&url);

    let mut node = Node::new(Scheme::Ssh, server, port);
    node.fields.insert("user".into(), Value::String(user.to_string()));
    if let Some(password) = url.password() {
        if !password.is_empty() {
            node.fields.insert("password".into(), Value::String(password.to_string()));
        }
    }

    if let Some(key_path) = q.get("private_key_path").or_else(|| q.get("privateKeyPath")) {
        node.fields.insert("private_key_path".into(), Value::String(key_path.clone()));
    }
    if let Some(host_key) = q.get("host_key").or_else(|| q.get("hostKey")) {
        node.fields.insert("host_key".into(), Value::String(host_key.clone()));
    }
    if let Some(passphrase) = q.get("passphrase") {
        node.fields.insert("passphrase".into(), Value::String(passphrase.clone()));
    }
    if let Some(client_version) = q.get("client_version").or_else(|| q.get("clientVersion")) {
        node.fields.insert("client_version".into(), Value::String(client_version.clone()));
    }

    finalize_label(&mut node, url.fragment());
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_default_port() {
        let node = decode("ssh://user@h?private_key_path=%2Fhome%2Fu%2Fid_rsa#box").unwrap();
        assert_eq!(node.port, 22);
        assert_eq!(node.fields["user"], Value::String("user".into()));
        assert_eq!(node.fields["private_key_path"], Value::String("/home/u/id_rsa".into()));
        assert_eq!(node.tag, "box");
    }

    #[test]
    fn decodes_with_password_and_explicit_port() {
        let node = decode("ssh://user:pw@h:2222").unwrap();
        assert_eq!(node.port, 2222);
        assert_eq!(node.fields["password"], Value::String("pw".into()));
    }

    #[test]
    fn missing_user_fails() {
        let err = decode("ssh://h:22").unwrap_err();
        assert_eq!(err.scheme, SCHEME);
    }
}
