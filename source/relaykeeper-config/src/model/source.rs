use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::FilterExpr;

fn default_mask() -> String {
    "{$tag}".to_string()
}

/// One entry of the authored directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySource {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default)]
    pub skip: FilterExpr,
    #[serde(default)]
    pub tag_prefix: String,
    #[serde(default)]
    pub tag_postfix: String,
    #[serde(default = "default_mask")]
    pub tag_mask: String,
    #[serde(default)]
    pub outbounds: Vec<OutboundSpec>,
}

impl Default for ProxySource {
    fn default() -> Self {
        Self {
            source: None,
            connections: Vec::new(),
            skip: FilterExpr::default(),
            tag_prefix: String::new(),
            tag_postfix: String::new(),
            tag_mask: default_mask(),
            outbounds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundType {
    Selector,
    Urltest,
}

/// A selector/group outbound specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundSpec {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: OutboundType,
    #[serde(default)]
    pub filters: FilterExpr,
    #[serde(default)]
    pub add_outbounds: Vec<String>,
    #[serde(default)]
    pub preferred_default: Option<FilterExpr>,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default)]
    pub comment: String,
}
