use serde_json::{Map, Value, json};

use super::pairs::{PathFilePair, create_path_file_pairs};
use super::pattern::PathPattern;

const RETURN_FIELDS: &[&str] = &["name", "repo", "path", "actual_md5", "actual_sha1", "size", "type"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "$asc",
            SortOrder::Desc => "$desc",
        }
    }
}

/// Optional result shaping appended after the `include(...)` clause.
#[derive(Debug, Clone, Default)]
pub struct QueryModifiers {
    pub sort_by: Vec<String>,
    pub sort_order: SortOrder,
    pub offset: usize,
    pub limit: usize,
}

impl QueryModifiers {
    fn sorts_or_limits(&self) -> bool {
        !self.sort_by.is_empty() || self.limit > 0
    }
}

/// Normalize a pattern before it is split into pairs: a bare repository
/// gains `/`, a directory gains `*`, and capture parentheses are dropped.
pub fn prepare_search_pattern(pattern: &str, repository_exists: bool) -> String {
    let mut p = pattern.to_string();
    if repository_exists && !p.contains('/') {
        p.push('/');
    }
    if p.ends_with('/') {
        p.push('*');
    }
    p.replace(['(', ')'], "")
}

fn pair_clause(pair: &PathFilePair) -> Value {
    json!({ "$and": [ { "path": { "$match": pair.path }, "name": { "$match": pair.name } } ] })
}

/// Build the `items.find` body for one pattern.
pub fn build_query_body(pattern: &PathPattern) -> Value {
    let prepared = prepare_search_pattern(pattern.as_str(), true);
    let (repo, rest) = prepared.split_once('/').unwrap_or((prepared.as_str(), "*"));

    let pairs = create_path_file_pairs(rest, pattern.recursive());
    let include_root = !rest.contains('/');

    let mut body = Map::new();
    body.insert("repo".into(), json!(repo));
    for prop in &pattern.props().items {
        body.insert(format!("@{}", prop.key), json!({ "$match": prop.value }));
    }
    if pattern.include_dirs() {
        body.insert("type".into(), json!({ "$eq": "any" }));
    }
    if !(pairs.is_empty() || include_root) {
        body.insert("path".into(), json!({ "$ne": "." }));
    }

    let excludes = exclude_clauses(pattern.exclude_patterns(), pattern.recursive());
    if !excludes.is_empty() {
        body.insert("$and".into(), Value::Array(excludes));
    }

    let or: Vec<Value> = if pairs.is_empty() {
        vec![pair_clause(&PathFilePair::new(".", rest))]
    } else {
        pairs.iter().map(pair_clause).collect()
    };
    body.insert("$or".into(), Value::Array(or));
    Value::Object(body)
}

fn exclude_clauses(patterns: &[String], recursive: bool) -> Vec<Value> {
    patterns
        .iter()
        .flat_map(|p| create_path_file_pairs(&prepare_search_pattern(p, false), recursive))
        .map(|pair| {
            // A root-level exclusion also covers nested items in a flat search.
            let path = if !recursive && pair.path == "." { "*".to_string() } else { pair.path };
            json!({ "$or": [ { "path": { "$nmatch": path }, "name": { "$nmatch": pair.name } } ] })
        })
        .collect()
}

fn return_fields(modifiers: &QueryModifiers) -> Vec<String> {
    let mut fields: Vec<String> = RETURN_FIELDS.iter().map(|s| s.to_string()).collect();
    if modifiers.sorts_or_limits() {
        // the store rejects property includes together with sort/limit
        for f in &modifiers.sort_by {
            if !fields.contains(f) {
                fields.push(f.clone());
            }
        }
    } else {
        fields.push("property".to_string());
    }
    fields
}

fn quoted(fields: &[String]) -> String {
    fields.iter().map(|f| format!("\"{}\"", f)).collect::<Vec<_>>().join(",")
}

/// Full query text as POSTed to the search endpoint.
pub fn build_query(pattern: &PathPattern, modifiers: &QueryModifiers) -> String {
    let mut query = format!(
        "items.find({}).include({})",
        build_query_body(pattern),
        quoted(&return_fields(modifiers))
    );
    if !modifiers.sort_by.is_empty() {
        query.push_str(&format!(
            ".sort({{\"{}\":[{}]}})",
            modifiers.sort_order.as_str(),
            quoted(&modifiers.sort_by)
        ));
    }
    if modifiers.offset > 0 {
        query.push_str(&format!(".offset({})", modifiers.offset));
    }
    if modifiers.limit > 0 {
        query.push_str(&format!(".limit({})", modifiers.limit));
    }
    query
}
