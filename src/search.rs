use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::TransferError;
use crate::config::ServerDetails;
use crate::http::{Body, HttpClient, HttpRequest, Method, build_url};
use crate::parse::Property;
use crate::query::{PathPattern, QueryModifiers, build_query};

pub const SEARCH_ENDPOINT: &str = "api/search/aql";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    File,
    Folder,
}

/// One artifact (or folder) returned by a search. Never mutated after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub actual_md5: String,
    #[serde(default)]
    pub actual_sha1: String,
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
    #[serde(default, alias = "property")]
    pub properties: Vec<Property>,
}

impl ResultItem {
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// `repo/path/name`; items at the repository root have path `.`.
    /// Folders carry a trailing `/`.
    pub fn relative_path(&self) -> String {
        let mut url = self.repo.clone();
        if self.path != "." && !self.path.is_empty() {
            url.push('/');
            url.push_str(&self.path);
        }
        if !self.name.is_empty() {
            url.push('/');
            url.push_str(&self.name);
        }
        if self.is_folder() && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    /// Item path inside its repository (`path/name`, or `name` at the root).
    pub fn path_in_repo(&self) -> String {
        if self.path == "." || self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ResultItem>,
}

/// Parse a search response body.
pub fn parse_results(body: &[u8]) -> Result<Vec<ResultItem>> {
    let resp: SearchResponse =
        serde_json::from_slice(body).context("parsing search response")?;
    Ok(resp.results)
}

pub fn search(
    client: &dyn HttpClient,
    details: &ServerDetails,
    pattern: &PathPattern,
) -> Result<Vec<ResultItem>> {
    search_with(client, details, pattern, &QueryModifiers::default())
}

/// Compile `pattern`, run it against the search endpoint and parse the items.
/// A non-2xx answer is a fatal `QueryExecution` error carrying the body.
pub fn search_with(
    client: &dyn HttpClient,
    details: &ServerDetails,
    pattern: &PathPattern,
    modifiers: &QueryModifiers,
) -> Result<Vec<ResultItem>> {
    let query = build_query(pattern, modifiers);
    tracing::debug!("[search] query: {}", query);
    let url = build_url(details, SEARCH_ENDPOINT, &[])?;
    let req = HttpRequest::new(Method::Post, url)
        .header("Content-Type", "text/plain")
        .body(Body::Bytes(query.into_bytes()));
    let resp = client.send(&req)?;
    if !resp.is_success() {
        return Err(TransferError::QueryExecution(resp.status, resp.text()).into());
    }
    let items = parse_results(&resp.body)?;
    tracing::info!("[search] found {} items for {}", items.len(), pattern.as_str());
    Ok(items)
}

/// How nested matches collapse when directories are part of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFilter {
    /// Keep the outermost items; anything inside a matched folder is dropped.
    Top,
    /// Keep the deepest items; a folder is dropped when something below it matched.
    Bottom,
}

/// Whether `paths[index]` is an ancestor of an earlier entry. `paths` must be
/// sorted in reverse order so descendants precede their ancestors.
pub fn is_sub_path(paths: &[String], index: usize, separator: char) -> bool {
    let mut current = paths[index].clone();
    if !current.ends_with(separator) {
        current.push(separator);
    }
    paths[..index].iter().any(|p| p.starts_with(&current))
}

/// Collapse directory results by relative path, dropping repository roots.
pub fn reduce_dir_results(items: Vec<ResultItem>, filter: ChainFilter) -> Vec<ResultItem> {
    let mut by_path: BTreeMap<String, ResultItem> = BTreeMap::new();
    for item in items {
        if item.name == "." {
            continue;
        }
        by_path.insert(item.relative_path(), item);
    }
    match filter {
        ChainFilter::Top => {
            let folders: Vec<String> =
                by_path.iter().filter(|(_, v)| v.is_folder()).map(|(k, _)| k.clone()).collect();
            by_path
                .into_iter()
                .filter(|(k, _)| !folders.iter().any(|f| f != k && k.starts_with(f.as_str())))
                .map(|(_, v)| v)
                .collect()
        }
        ChainFilter::Bottom => {
            let mut keys: Vec<String> = by_path.keys().cloned().collect();
            keys.reverse();
            let keep: Vec<String> = (0..keys.len())
                .filter(|&i| i == 0 || !is_sub_path(&keys, i, '/'))
                .map(|i| keys[i].clone())
                .collect();
            keep.into_iter().filter_map(|k| by_path.remove(&k)).collect()
        }
    }
}
