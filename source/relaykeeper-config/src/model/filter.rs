//! The filter engine's value types.
//!
//! `FilterExpr` parses directly out of directive JSON: an object is an AND
//! over its keys, a list of objects is an OR across items. Unknown keys fail
//! deserialization (fail-closed), matching Design Note "Dynamic-typed filter
//! values" — the set of projections is a closed enum, not an open string map.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::model::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Tag,
    Host,
    Server,
    Label,
    Scheme,
    Fragment,
    Comment,
}

/// A single pattern string, compiled on first use and cached for reuse
/// across Nodes, following the same `OnceLock<Regex>` idiom used for
/// per-string regex caching elsewhere in this codebase.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern {
    raw: String,
    kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Literal,
    NegLiteral,
    Regex,
    NegRegex,
}

impl TryFrom<String> for Pattern {
    type Error = std::convert::Infallible;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let kind = if let Some(body) = raw.strip_prefix('!') {
            if is_regex_literal(body) {
                PatternKind::NegRegex
            } else {
                PatternKind::NegLiteral
            }
        } else if is_regex_literal(&raw) {
            PatternKind::Regex
        } else {
            PatternKind::Literal
        };
        Ok(Pattern { raw, kind })
    }
}

fn is_regex_literal(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('/') && (s.ends_with("/i") || s.ends_with('/'))
}

/// Extracts the body and whether the case-insensitive flag was given.
fn regex_body(wrapped: &str) -> (&str, bool) {
    let inner = wrapped.strip_prefix('/').unwrap_or(wrapped);
    if let Some(body) = inner.strip_suffix("/i") {
        (body, true)
    } else if let Some(body) = inner.strip_suffix('/') {
        (body, false)
    } else {
        (inner, false)
    }
}

fn compiled(body: &str, case_insensitive: bool) -> Option<&'static Regex> {
    use std::collections::HashMap;
    use std::sync::Mutex;

    static CACHE: OnceLock<Mutex<HashMap<(String, bool), &'static Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let key = (body.to_string(), case_insensitive);

    let mut guard = cache.lock().expect("regex cache poisoned");
    if let Some(re) = guard.get(&key) {
        return Some(re);
    }

    let pattern = if case_insensitive {
        format!("(?i){body}")
    } else {
        body.to_string()
    };

    match Regex::new(&pattern) {
        Ok(re) => {
            let leaked: &'static Regex = Box::leak(Box::new(re));
            guard.insert(key, leaked);
            Some(leaked)
        }
        Err(e) => {
            tracing::error!(pattern = %body, error = %e, "filter regex failed to compile; pattern evaluates to false");
            None
        }
    }
}

impl Pattern {
    pub fn matches(&self, value: &str) -> bool {
        match self.kind {
            PatternKind::Literal => self.raw == value,
            PatternKind::NegLiteral => self.raw.strip_prefix('!').unwrap() != value,
            PatternKind::Regex => {
                let (body, ci) = regex_body(&self.raw);
                compiled(body, ci).map(|re| re.is_match(value)).unwrap_or(false)
            }
            PatternKind::NegRegex => {
                let (body, ci) = regex_body(self.raw.strip_prefix('!').unwrap());
                !compiled(body, ci).map(|re| re.is_match(value)).unwrap_or(true)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterExpr {
    Object(BTreeMap<FilterField, Pattern>),
    List(Vec<FilterExpr>),
}

impl Default for FilterExpr {
    fn default() -> Self {
        FilterExpr::Object(BTreeMap::new())
    }
}

impl FilterExpr {
    fn project<'a>(field: FilterField, node: &'a Node) -> &'a str {
        match field {
            FilterField::Tag => &node.tag,
            FilterField::Host => &node.host_hint,
            FilterField::Server => &node.server,
            FilterField::Label | FilterField::Fragment => &node.label,
            FilterField::Scheme => node.scheme.as_str(),
            FilterField::Comment => &node.comment,
        }
    }

    /// An absent/empty expression matches everything.
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            FilterExpr::Object(fields) => fields
                .iter()
                .all(|(field, pattern)| pattern.matches(Self::project(*field, node))),
            FilterExpr::List(items) => {
                if items.is_empty() {
                    true
                } else {
                    items.iter().any(|expr| expr.matches(node))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Scheme;

    fn node(tag: &str, scheme: Scheme) -> Node {
        let mut n = Node::new(scheme, "example.test", 443);
        n.tag = tag.to_string();
        n
    }

    #[test]
    fn empty_expr_matches_everything() {
        let expr = FilterExpr::default();
        assert!(expr.matches(&node("anything", Scheme::Vless)));
    }

    #[test]
    fn literal_and_negation() {
        let mut obj = BTreeMap::new();
        obj.insert(FilterField::Tag, Pattern::try_from("hello".to_string()).unwrap());
        let expr = FilterExpr::Object(obj);
        assert!(expr.matches(&node("hello", Scheme::Vless)));
        assert!(!expr.matches(&node("world", Scheme::Vless)));
    }

    #[test]
    fn or_across_list_items_case_insensitive_regex() {
        let mut a = BTreeMap::new();
        a.insert(FilterField::Tag, Pattern::try_from("/nl/i".to_string()).unwrap());
        let mut b = BTreeMap::new();
        b.insert(FilterField::Tag, Pattern::try_from("!/ru/i".to_string()).unwrap());
        let expr = FilterExpr::List(vec![FilterExpr::Object(a), FilterExpr::Object(b)]);

        assert!(expr.matches(&node("NL-node", Scheme::Vless)));
        assert!(expr.matches(&node("US-node", Scheme::Vless)));
        assert!(!expr.matches(&node("RU-node", Scheme::Vless)));
    }

    #[test]
    fn bad_regex_fails_closed() {
        let mut obj = BTreeMap::new();
        obj.insert(FilterField::Tag, Pattern::try_from("/[/i".to_string()).unwrap());
        let expr = FilterExpr::Object(obj);
        assert!(!expr.matches(&node("anything", Scheme::Vless)));
    }
}
