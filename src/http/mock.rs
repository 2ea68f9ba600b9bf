//! In-memory repository service for tests.
//!
//! Keeps artifacts in a map keyed by `repo/path/name`, answers the same
//! endpoints the executors call and records every request. Search queries
//! are evaluated against the stored items with the store's semantics:
//! criteria in one object are AND-ed, except directly inside an `$or` list
//! where they are OR-ed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};

use super::{Body, HttpClient, HttpRequest, HttpResponse, Method};
use crate::config::ServerDetails;
use crate::query::wildcard::wildcard_match;
use crate::transfer::checksum::bytes_checksums;

pub const MOCK_BASE_URL: &str = "http://mock.local/artifactory/";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Repository-relative path with matrix parameters removed.
    pub path: String,
    pub matrix: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body_len: usize,
}

impl RecordedRequest {
    pub fn header(&self, key: &str) -> Option<&str> {
        super::find_header(&self.headers, key)
    }
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    folders: BTreeSet<String>,
    props: HashMap<String, Vec<(String, String)>>,
    requests: Vec<RecordedRequest>,
    accept_ranges: bool,
    failures: HashMap<String, u16>,
    search_failure: Option<(u16, String)>,
}

pub struct MockHttpClient {
    state: Mutex<State>,
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { accept_ranges: true, ..Default::default() }) }
    }

    pub fn details(&self) -> ServerDetails {
        ServerDetails {
            url: MOCK_BASE_URL.to_string(),
            user: Some("tester".into()),
            password: Some("secret".into()),
            access_token: None,
            retries: 1,
            retry_backoff: std::time::Duration::ZERO,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.lock().files.insert(path.trim_matches('/').to_string(), content.to_vec());
    }

    pub fn add_folder(&self, path: &str) {
        self.lock().folders.insert(path.trim_matches('/').to_string());
    }

    pub fn set_props(&self, path: &str, props: &[(&str, &str)]) {
        let list = props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.lock().props.insert(path.trim_matches('/').to_string(), list);
    }

    pub fn set_accept_ranges(&self, on: bool) {
        self.lock().accept_ranges = on;
    }

    /// Every non-search request touching `path` is answered with `status`.
    pub fn fail_path(&self, path: &str, status: u16) {
        self.lock().failures.insert(path.trim_matches('/').to_string(), status);
    }

    pub fn fail_search(&self, status: u16, body: &str) {
        self.lock().search_failure = Some((status, body.to_string()));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path.trim_matches('/')).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn props_of(&self, path: &str) -> Vec<(String, String)> {
        self.lock().props.get(path.trim_matches('/')).cloned().unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.lock().requests.iter().filter(|r| r.method == method).count()
    }
}

fn decode_path(p: &str) -> String {
    let bytes = p.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(b) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
        {
            out.push(b);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

struct Parsed {
    path: String,
    matrix: String,
    query: Vec<(String, String)>,
}

fn parse_url(url: &str) -> Result<Parsed> {
    let rel = url
        .strip_prefix(MOCK_BASE_URL)
        .ok_or_else(|| anyhow!("unexpected url {}", url))?;
    let (path_part, query) = match rel.split_once('?') {
        Some((p, q)) => (p, url::form_urlencoded::parse(q.as_bytes()).into_owned().collect()),
        None => (rel, Vec::new()),
    };
    let (path, matrix) = match path_part.split_once(';') {
        Some((p, m)) => (p, m.to_string()),
        None => (path_part, String::new()),
    };
    Ok(Parsed { path: decode_path(path), matrix, query })
}

fn matrix_props(matrix: &str) -> Vec<(String, String)> {
    matrix
        .split(';')
        .filter(|s| !s.is_empty())
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| {
            let decode = |s: &str| -> String {
                url::form_urlencoded::parse(format!("x={}", s).as_bytes())
                    .next()
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            };
            (decode(k), decode(v))
        })
        .collect()
}

fn split_key(key: &str) -> (String, String, String) {
    let mut parts = key.splitn(2, '/');
    let repo = parts.next().unwrap_or("").to_string();
    let rest = parts.next().unwrap_or("");
    match rest.rsplit_once('/') {
        Some((dir, name)) => (repo, dir.to_string(), name.to_string()),
        None => (repo, ".".to_string(), rest.to_string()),
    }
}

impl State {
    fn folder_keys(&self) -> BTreeSet<String> {
        let mut out = self.folders.clone();
        for key in self.files.keys() {
            let mut parts: Vec<&str> = key.split('/').collect();
            parts.pop();
            while parts.len() > 1 {
                out.insert(parts.join("/"));
                parts.pop();
            }
        }
        out.retain(|k| k.contains('/'));
        out
    }

    fn is_folder(&self, key: &str) -> bool {
        self.folder_keys().contains(key)
    }

    fn items(&self) -> Vec<Value> {
        let mut items = Vec::new();
        for (key, content) in &self.files {
            let (repo, path, name) = split_key(key);
            let sums = bytes_checksums(content);
            items.push(json!({
                "repo": repo, "path": path, "name": name, "type": "file",
                "size": content.len(), "actual_md5": sums.md5, "actual_sha1": sums.sha1,
                "properties": self.props_json(key),
            }));
        }
        for key in self.folder_keys() {
            let (repo, path, name) = split_key(&key);
            items.push(json!({
                "repo": repo, "path": path, "name": name, "type": "folder",
                "size": 0, "properties": self.props_json(&key),
            }));
        }
        items
    }

    fn props_json(&self, key: &str) -> Value {
        let list = self.props.get(key).cloned().unwrap_or_default();
        Value::Array(list.into_iter().map(|(k, v)| json!({ "key": k, "value": v })).collect())
    }

    fn search(&self, query: &str) -> HttpResponse {
        if let Some((status, body)) = &self.search_failure {
            return HttpResponse { status: *status, body: body.clone().into_bytes(), ..Default::default() };
        }
        let Some(body) = extract_find_body(query) else {
            return HttpResponse { status: 400, body: b"malformed query".to_vec(), ..Default::default() };
        };
        let any_type = body.get("type").is_some();
        let results: Vec<Value> = self
            .items()
            .into_iter()
            .filter(|item| any_type || item["type"] == "file")
            .filter(|item| eval_object(&body, item, Combine::And))
            .collect();
        let total = results.len();
        let out = json!({ "results": results, "range": { "start_pos": 0, "end_pos": total, "total": total } });
        HttpResponse { status: 200, body: out.to_string().into_bytes(), ..Default::default() }
    }

    fn transfer(&mut self, src: &str, to: &str, dry: bool, keep_source: bool) -> u16 {
        let src = src.trim_matches('/');
        // a destination ending in '/' receives the source inside it
        let to = if to.ends_with('/') {
            format!("{}{}", to, src.rsplit('/').next().unwrap_or(src))
        } else {
            to.to_string()
        };
        let to = to.as_str();
        if let Some(content) = self.files.get(src).cloned() {
            if !dry {
                self.files.insert(to.to_string(), content);
                if !keep_source {
                    self.files.remove(src);
                }
            }
            return 200;
        }
        if !self.is_folder(src) {
            return 404;
        }
        if dry {
            return 200;
        }
        let prefix = format!("{}/", src);
        let moved: Vec<(String, Vec<u8>)> = self
            .files
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (format!("{}/{}", to, &k[prefix.len()..]), v.clone()))
            .collect();
        if !keep_source {
            self.files.retain(|k, _| !k.starts_with(&prefix));
            self.folders.retain(|k| k != src && !k.starts_with(&prefix));
        }
        self.folders.insert(to.to_string());
        self.files.extend(moved);
        200
    }

    fn delete(&mut self, key: &str) -> u16 {
        if self.files.remove(key).is_some() {
            return 204;
        }
        if !self.is_folder(key) {
            return 404;
        }
        let prefix = format!("{}/", key);
        self.files.retain(|k, _| !k.starts_with(&prefix));
        self.folders.retain(|k| k != key && !k.starts_with(&prefix));
        204
    }

    fn put(&mut self, req: &HttpRequest, key: &str, matrix: &str) -> Result<u16> {
        if req.url.split(['?', ';']).next().is_some_and(|u| u.ends_with('/')) {
            self.folders.insert(key.to_string());
            return Ok(201);
        }
        let content = if req.header_value("X-Checksum-Deploy") == Some("true") {
            let wanted = req.header_value("X-Checksum-Sha1").unwrap_or("");
            let found = self.files.values().find(|c| bytes_checksums(c).sha1 == wanted).cloned();
            match found {
                Some(c) => c,
                None => return Ok(404),
            }
        } else {
            match &req.body {
                Body::Empty => Vec::new(),
                Body::Bytes(b) => b.clone(),
                Body::File(p) => std::fs::read(p)?,
            }
        };
        self.files.insert(key.to_string(), content);
        let props = matrix_props(matrix);
        if !props.is_empty() {
            self.props.insert(key.to_string(), props);
        }
        Ok(201)
    }

    fn get(&self, req: &HttpRequest, key: &str, head: bool) -> HttpResponse {
        let Some(content) = self.files.get(key) else {
            return HttpResponse::new(404);
        };
        let mut resp = HttpResponse::new(200);
        resp.headers.push(("Content-Length".into(), content.len().to_string()));
        if self.accept_ranges {
            resp.headers.push(("Accept-Ranges".into(), "bytes".into()));
        }
        if head {
            return resp;
        }
        if self.accept_ranges
            && let Some(range) = req.header_value("Range")
            && let Some((start, end)) = parse_range(range)
        {
            let end = end.min(content.len().saturating_sub(1));
            if start > end {
                return HttpResponse::new(416);
            }
            resp.status = 206;
            resp.body = content[start..=end].to_vec();
            return resp;
        }
        resp.body = content.clone();
        resp
    }
}

fn parse_range(v: &str) -> Option<(usize, usize)> {
    let (a, b) = v.strip_prefix("bytes=")?.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

fn extract_find_body(query: &str) -> Option<Map<String, Value>> {
    let start = query.find("items.find(")? + "items.find(".len();
    let mut stream = serde_json::Deserializer::from_str(&query[start..]).into_iter::<Value>();
    match stream.next()? {
        Ok(Value::Object(m)) => Some(m),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum Combine {
    And,
    Or,
}

fn eval_object(obj: &Map<String, Value>, item: &Value, combine: Combine) -> bool {
    let mut results = obj.iter().map(|(k, v)| eval_criterion(k, v, item));
    match combine {
        Combine::And => results.all(|r| r),
        Combine::Or => results.any(|r| r),
    }
}

fn eval_list(list: &Value, item: &Value, combine: Combine) -> bool {
    let Some(arr) = list.as_array() else { return false };
    let inner = |v: &Value| v.as_object().is_some_and(|o| eval_object(o, item, combine));
    match combine {
        Combine::And => arr.iter().all(inner),
        Combine::Or => arr.iter().any(inner),
    }
}

fn eval_criterion(key: &str, cond: &Value, item: &Value) -> bool {
    match key {
        "$or" => eval_list(cond, item, Combine::Or),
        "$and" => eval_list(cond, item, Combine::And),
        "type" => match cond.get("$eq").and_then(Value::as_str) {
            Some("any") => true,
            Some(t) => item["type"] == t,
            None => true,
        },
        _ if key.starts_with('@') => {
            let pattern = cond.get("$match").and_then(Value::as_str).unwrap_or("*");
            item["properties"].as_array().is_some_and(|props| {
                props.iter().any(|p| {
                    p["key"] == &key[1..]
                        && wildcard_match(pattern, p["value"].as_str().unwrap_or(""))
                })
            })
        }
        field => {
            let actual = item[field].as_str().unwrap_or("");
            match cond {
                Value::String(s) => actual == s.as_str(),
                Value::Object(ops) => ops.iter().all(|(op, v)| {
                    let v = v.as_str().unwrap_or("");
                    match op.as_str() {
                        "$eq" => actual == v,
                        "$ne" => actual != v,
                        "$match" => wildcard_match(v, actual),
                        "$nmatch" => !wildcard_match(v, actual),
                        _ => false,
                    }
                }),
                _ => false,
            }
        }
    }
}

impl HttpClient for MockHttpClient {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let parsed = parse_url(&req.url)?;
        let body_len = match &req.body {
            Body::Empty => 0,
            Body::Bytes(b) => b.len(),
            Body::File(p) => std::fs::metadata(p).map(|m| m.len() as usize).unwrap_or(0),
        };
        let mut st = self.lock();
        st.requests.push(RecordedRequest {
            method: req.method,
            path: parsed.path.clone(),
            matrix: parsed.matrix.clone(),
            query: parsed.query.clone(),
            headers: req.headers.clone(),
            body_len,
        });

        if req.method == Method::Post && parsed.path == "api/search/aql" {
            let text = match &req.body {
                Body::Bytes(b) => String::from_utf8_lossy(b).to_string(),
                _ => String::new(),
            };
            return Ok(st.search(&text));
        }

        let key = parsed.path.trim_matches('/').to_string();
        let failure_key = key
            .strip_prefix("api/move/")
            .or_else(|| key.strip_prefix("api/copy/"))
            .unwrap_or(&key)
            .to_string();
        if let Some(status) = st.failures.get(&failure_key) {
            return Ok(HttpResponse::new(*status));
        }

        let q = |name: &str| {
            parsed.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        };
        let status = match req.method {
            Method::Post => {
                let (src, keep) = if let Some(s) = key.strip_prefix("api/move/") {
                    (s.to_string(), false)
                } else if let Some(s) = key.strip_prefix("api/copy/") {
                    (s.to_string(), true)
                } else {
                    return Ok(HttpResponse::new(404));
                };
                let Some(to) = q("to") else {
                    return Ok(HttpResponse::new(400));
                };
                let dry = q("dry").as_deref() == Some("1");
                st.transfer(&src, &to, dry, keep)
            }
            Method::Put => st.put(req, &key, &parsed.matrix)?,
            Method::Delete => st.delete(&key),
            Method::Get => return Ok(st.get(req, &key, false)),
            Method::Head => return Ok(st.get(req, &key, true)),
        };
        Ok(HttpResponse::new(status))
    }

    fn download_to(&self, req: &HttpRequest, out: &mut dyn Write) -> Result<HttpResponse> {
        let mut resp = self.send(req)?;
        if resp.is_success() {
            out.write_all(&resp.body)?;
            resp.body.clear();
        }
        Ok(resp)
    }
}
