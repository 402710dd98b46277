//! Outbound Assembler: decode & dedup candidate URIs into Nodes, build the
//! selector/urltest registry, run a Kahn topological pass to compute
//! validity, and emit the ordered fragment list for the region.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};

use crate::decode;
use crate::error::AssemblerWarning;
use crate::model::{FilterExpr, Node, OutboundSpec, OutboundType, ProxySource};

/// One source's already-fetched candidate URI lines (fetched lines followed
/// by the source's literal `connections`).
pub struct SourceCandidates {
    pub source: ProxySource,
    pub lines: Vec<String>,
}

/// A single emittable JSON item for the region: a Node (with its leading
/// `// <label>` comment) or a selector/urltest object.
pub struct Fragment {
    pub comment: Option<String>,
    pub json: Value,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Local(usize),
    Global,
}

struct SpecEntry {
    spec: OutboundSpec,
    scope: Scope,
    filtered_node_idx: Vec<usize>,
    outbound_count: usize,
    is_valid: bool,
}

/// Run the full three-pass assembly and return the ordered fragment list.
/// Never fails as a whole; diagnostics are pushed onto `warnings` and the
/// caller is expected to log them.
pub fn assemble(sources: Vec<SourceCandidates>, global_outbounds: &[OutboundSpec], warnings: &mut Vec<AssemblerWarning>) -> Vec<Fragment> {
    let (nodes, source_spans) = decode_and_dedup(&sources, warnings);

    let mut entries: Vec<SpecEntry> = Vec::new();
    for (source_idx, candidates) in sources.iter().enumerate() {
        for spec in &candidates.source.outbounds {
            entries.push(build_entry(spec.clone(), Scope::Local(source_idx), &nodes, &source_spans));
        }
    }
    for spec in global_outbounds {
        entries.push(build_entry(spec.clone(), Scope::Global, &nodes, &source_spans));
    }

    run_topological_pass(&mut entries, warnings);

    emit(&nodes, &entries, warnings)
}

/// Step 1: apply tag templates, per-source skip filters, and global tag
/// dedup. Returns the working node set plus, per source, the half-open
/// index range of nodes contributed by that source (for local spec scope).
fn decode_and_dedup(sources: &[SourceCandidates], warnings: &mut Vec<AssemblerWarning>) -> (Vec<Node>, Vec<(usize, usize)>) {
    let mut nodes = Vec::new();
    let mut spans = Vec::with_capacity(sources.len());
    let mut seen_tags: HashSet<String> = HashSet::new();

    for candidates in sources {
        let start = nodes.len();
        for line in &candidates.lines {
            let mut node = match decode::decode_line(line) {
                Ok(Some(node)) => node,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(scheme = e.scheme, reason = %e.reason, "failed to decode subscription line; skipping");
                    continue;
                }
            };

            node.tag = apply_tag_template(&candidates.source, &node);

            if candidates.source.skip.matches(&node) {
                continue;
            }

            let original_tag = node.tag.clone();
            node.tag = dedup_tag(node.tag, &mut seen_tags);
            if node.tag != original_tag {
                warnings.push(AssemblerWarning::DuplicateTag { tag: original_tag });
            }
            nodes.push(node);
        }
        spans.push((start, nodes.len()));
    }

    (nodes, spans)
}

fn apply_tag_template(source: &ProxySource, node: &Node) -> String {
    let masked = source
        .tag_mask
        .replace("{$tag}", &node.tag)
        .replace("{$scheme}", node.scheme.as_str())
        .replace("{$server}", &node.server)
        .replace("{$port}", &node.port.to_string());
    format!("{}{}{}", source.tag_prefix, masked, source.tag_postfix)
}

fn dedup_tag(tag: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(tag.clone()) {
        return tag;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{tag}-{n}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Step 2: build one registry entry, scoping `filteredNodes` to the
/// outbound's own source (local) or the whole working set (global).
fn build_entry(spec: OutboundSpec, scope: Scope, nodes: &[Node], spans: &[(usize, usize)]) -> SpecEntry {
    let range = match scope {
        Scope::Local(idx) => spans[idx],
        Scope::Global => (0, nodes.len()),
    };

    let filtered_node_idx: Vec<usize> = (range.0..range.1).filter(|&i| spec.filters.matches(&nodes[i])).collect();
    let outbound_count = filtered_node_idx.len();

    SpecEntry { spec, scope, filtered_node_idx, outbound_count, is_valid: outbound_count > 0 }
}

/// Step 3: Kahn's algorithm over the "B depends on A" DAG implied by
/// `addOutbounds` spec references.
fn run_topological_pass(entries: &mut [SpecEntry], warnings: &mut Vec<AssemblerWarning>) {
    let tag_index: HashMap<String, usize> = entries.iter().enumerate().map(|(i, e)| (e.spec.tag.clone(), i)).collect();

    let mut in_degree = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];

    for (i, entry) in entries.iter().enumerate() {
        for add in &entry.spec.add_outbounds {
            if let Some(&dep_idx) = tag_index.get(add) {
                in_degree[i] += 1;
                dependents[dep_idx].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = vec![false; entries.len()];

    while let Some(i) = queue.pop_front() {
        let mut count = entries[i].filtered_node_idx.len();
        for add in entries[i].spec.add_outbounds.clone() {
            match tag_index.get(&add) {
                Some(&dep_idx) => {
                    if entries[dep_idx].is_valid {
                        count += 1;
                    }
                }
                None => count += 1,
            }
        }
        entries[i].outbound_count = count;
        entries[i].is_valid = count > 0;
        processed[i] = true;

        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    let unresolved: Vec<String> = entries
        .iter()
        .enumerate()
        .filter(|(i, _)| !processed[*i])
        .map(|(_, e)| e.spec.tag.clone())
        .collect();
    if !unresolved.is_empty() {
        warnings.push(AssemblerWarning::SelectorCycleDetected { tags: unresolved });
    }
    // Entries left unprocessed keep their pass-1 outbound_count/is_valid.
}

/// Step 4: serialize Nodes first (in decode order), then specs (local
/// before global, declaration order within each), skipping invalid or
/// empty selectors.
fn emit(nodes: &[Node], entries: &[SpecEntry], warnings: &mut Vec<AssemblerWarning>) -> Vec<Fragment> {
    let mut fragments: Vec<Fragment> = nodes
        .iter()
        .map(|n| Fragment { comment: Some(n.label.clone()).filter(|l| !l.is_empty()), json: n.to_outbound_json() })
        .collect();

    let tag_index: HashMap<&str, &SpecEntry> = entries.iter().map(|e| (e.spec.tag.as_str(), e)).collect();

    let mut ordered: Vec<&SpecEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| matches!(e.scope, Scope::Global) as u8);

    for entry in ordered {
        if !entry.is_valid {
            warnings.push(AssemblerWarning::SelectorEmptyOmitted { tag: entry.spec.tag.clone() });
            continue;
        }

        let mut outbound_tags: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for add in &entry.spec.add_outbounds {
            let keep = match tag_index.get(add.as_str()) {
                Some(dep) => dep.is_valid,
                None => true,
            };
            if !keep {
                continue;
            }
            if seen.insert(add.clone()) {
                outbound_tags.push(add.clone());
            } else {
                warnings.push(AssemblerWarning::DuplicateTag { tag: add.clone() });
            }
        }
        for &idx in &entry.filtered_node_idx {
            let tag = &nodes[idx].tag;
            if seen.insert(tag.clone()) {
                outbound_tags.push(tag.clone());
            } else {
                warnings.push(AssemblerWarning::DuplicateTag { tag: tag.clone() });
            }
        }

        if outbound_tags.is_empty() {
            warnings.push(AssemblerWarning::SelectorEmptyOmitted { tag: entry.spec.tag.clone() });
            continue;
        }

        let default_tag = entry
            .spec
            .preferred_default
            .as_ref()
            .and_then(|filter| entry.filtered_node_idx.iter().find(|&&idx| filter.matches(&nodes[idx])))
            .map(|&idx| nodes[idx].tag.clone());

        let mut obj = Map::new();
        obj.insert("tag".into(), Value::String(entry.spec.tag.clone()));
        obj.insert(
            "type".into(),
            Value::String(match entry.spec.kind {
                OutboundType::Selector => "selector".into(),
                OutboundType::Urltest => "urltest".into(),
            }),
        );
        if let Some(default_tag) = default_tag {
            obj.insert("default".into(), Value::String(default_tag));
        }
        obj.insert("outbounds".into(), Value::Array(outbound_tags.into_iter().map(Value::String).collect()));
        for (k, v) in &entry.spec.options {
            obj.insert(k.clone(), v.clone());
        }

        fragments.push(Fragment { comment: Some(entry.spec.comment.clone()).filter(|c| !c.is_empty()), json: Value::Object(obj) });
    }

    fragments
}

/// Render the fragment list into the literal text to splice between the
/// region markers. `trailing_comma` should reflect whether any content in
/// the surrounding `outbounds` array follows `@ParserEND`.
pub fn render_region(fragments: &[Fragment], trailing_comma: bool) -> String {
    if fragments.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n");
    for (i, fragment) in fragments.iter().enumerate() {
        if let Some(comment) = &fragment.comment {
            out.push_str(&format!("    // {comment}\n"));
        }
        out.push_str("    ");
        out.push_str(&fragment.json.to_string());
        let is_last = i + 1 == fragments.len();
        if !is_last || trailing_comma {
            out.push(',');
        }
        out.push('\n');
    }
    out
}
