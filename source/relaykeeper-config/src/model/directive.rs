use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::DirectiveError;

use super::source::{OutboundSpec, ProxySource};

/// The current directive schema version. Version 1 carried `version` as a
/// sibling of `ParserConfig` rather than nested inside it; forward
/// migration nests it and stamps the current value. See DESIGN.md for why
/// this shape was chosen.
pub const CURRENT_VERSION: u64 = 2;

/// The authored configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserDirective {
    pub version: u64,
    pub proxies: Vec<ProxySource>,
    pub outbounds: Vec<OutboundSpec>,
    pub reload: Option<Duration>,
    pub last_updated: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ParserConfigRaw {
    version: u64,
    #[serde(default)]
    proxies: Vec<ProxySource>,
    #[serde(default)]
    outbounds: Vec<OutboundSpec>,
    #[serde(default)]
    parser: ParserMetaRaw,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ParserMetaRaw {
    #[serde(default)]
    reload: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

impl ParserDirective {
    /// Parse and normalize the sentinel payload: migrate old versions,
    /// lowercase/trim the reload string, and require `last_updated` to be
    /// UTC when present.
    pub fn from_sentinel_payload(raw: &Value) -> Result<Self, DirectiveError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| DirectiveError::Invalid("sentinel payload is not a JSON object".into()))?;

        let top_level_version = obj.get("version").and_then(Value::as_u64);

        let mut parser_config = obj
            .get("ParserConfig")
            .cloned()
            .ok_or_else(|| DirectiveError::Invalid("missing `ParserConfig` key".into()))?;

        let pc_obj = parser_config
            .as_object_mut()
            .ok_or_else(|| DirectiveError::Invalid("`ParserConfig` is not a JSON object".into()))?;

        let declared_version = pc_obj
            .get("version")
            .and_then(Value::as_u64)
            .or(top_level_version)
            .unwrap_or(1);

        if declared_version > CURRENT_VERSION {
            return Err(DirectiveError::UnsupportedVersionTooNew {
                found: declared_version,
                supported: CURRENT_VERSION,
            });
        }

        // Migrate: nest (or bump) the version field in place. Missing
        // `parser` is populated by `ParserMetaRaw`'s `Default`.
        pc_obj.insert("version".into(), Value::from(CURRENT_VERSION));

        let raw_cfg: ParserConfigRaw = serde_json::from_value(parser_config)
            .map_err(|e| DirectiveError::Invalid(e.to_string()))?;

        let reload = match raw_cfg.parser.reload.as_deref() {
            Some(s) => {
                let trimmed = s.trim().to_lowercase();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(
                        humantime::parse_duration(&trimmed)
                            .map_err(|e| DirectiveError::Invalid(format!("invalid reload interval '{trimmed}': {e}")))?,
                    )
                }
            }
            None => None,
        };

        let last_updated = match raw_cfg.parser.last_updated.as_deref() {
            Some(s) => Some(
                OffsetDateTime::parse(s, &Rfc3339)
                    .map_err(|e| DirectiveError::Invalid(format!("invalid last_updated timestamp '{s}': {e}")))?,
            ),
            None => None,
        };

        Ok(ParserDirective {
            version: CURRENT_VERSION,
            proxies: raw_cfg.proxies,
            outbounds: raw_cfg.outbounds,
            reload,
            last_updated,
        })
    }

    /// Re-serialize into the `{ "ParserConfig": {...} }` sentinel shape,
    /// stamping `last_updated` at commit time.
    pub fn to_sentinel_payload(&self, last_updated: OffsetDateTime) -> Value {
        let mut parser_meta = Map::new();
        if let Some(reload) = self.reload {
            parser_meta.insert(
                "reload".into(),
                Value::String(humantime::format_duration(reload).to_string()),
            );
        }
        parser_meta.insert(
            "last_updated".into(),
            Value::String(
                last_updated
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| last_updated.to_string()),
            ),
        );

        let mut parser_config = Map::new();
        parser_config.insert("version".into(), Value::from(CURRENT_VERSION));
        parser_config.insert(
            "proxies".into(),
            serde_json::to_value(&self.proxies).unwrap_or(Value::Array(vec![])),
        );
        parser_config.insert(
            "outbounds".into(),
            serde_json::to_value(&self.outbounds).unwrap_or(Value::Array(vec![])),
        );
        parser_config.insert("parser".into(), Value::Object(parser_meta));

        let mut top = Map::new();
        top.insert("ParserConfig".into(), Value::Object(parser_config));
        Value::Object(top)
    }

    pub fn is_due_for_reload(&self, now: OffsetDateTime) -> bool {
        match (self.reload, self.last_updated) {
            (Some(interval), Some(last)) => {
                let due_at = last + interval;
                now >= due_at
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_v2() -> Value {
        serde_json::json!({
            "ParserConfig": {
                "version": 2,
                "proxies": [],
                "outbounds": [],
                "parser": { "reload": "4h", "last_updated": "2026-01-01T00:00:00Z" }
            }
        })
    }

    #[test]
    fn parses_current_version() {
        let d = ParserDirective::from_sentinel_payload(&sample_v2()).unwrap();
        assert_eq!(d.version, CURRENT_VERSION);
        assert_eq!(d.reload, Some(Duration::from_secs(4 * 3600)));
        assert!(d.last_updated.is_some());
    }

    #[test]
    fn migrates_version_one_sibling_field() {
        let raw = serde_json::json!({
            "version": 1,
            "ParserConfig": { "proxies": [], "outbounds": [] }
        });
        let d = ParserDirective::from_sentinel_payload(&raw).unwrap();
        assert_eq!(d.version, CURRENT_VERSION);
        assert!(d.reload.is_none());
        assert!(d.last_updated.is_none());
    }

    #[test]
    fn rejects_future_version() {
        let raw = serde_json::json!({
            "ParserConfig": { "version": 99, "proxies": [], "outbounds": [] }
        });
        let err = ParserDirective::from_sentinel_payload(&raw).unwrap_err();
        assert!(matches!(err, DirectiveError::UnsupportedVersionTooNew { found: 99, .. }));
    }

    #[test]
    fn reload_string_is_trimmed_and_lowercased() {
        let raw = serde_json::json!({
            "ParserConfig": {
                "version": 2, "proxies": [], "outbounds": [],
                "parser": { "reload": "  30M  " }
            }
        });
        let d = ParserDirective::from_sentinel_payload(&raw).unwrap();
        assert_eq!(d.reload, Some(Duration::from_secs(30 * 60)));
    }
}
