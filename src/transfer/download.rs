//! Download executor.
//!
//! Every matched artifact becomes one task. Files already present locally
//! with matching MD5 and SHA1 are skipped. Large files on a server that
//! accepts byte ranges are fetched as `split_count` concurrent ranges and
//! stitched together; everything else streams into its own temporary
//! sibling that is renamed into place once complete.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Sender;
use regex::Regex;
use tempfile::NamedTempFile;

use super::checksum::is_local_fresh;
use super::helpers::{display_path, part_file, persist_part, split_dir_file};
use super::scheduler::BoundedRunner;
use super::{TransferContext, TransferSummary, failure_channel, finish};
use crate::TransferError;
use crate::config::ServerDetails;
use crate::http::{HttpClient, HttpRequest, Method, build_url};
use crate::query::PathPattern;
use crate::query::wildcard::{apply_placeholders, remote_path_to_regexp};
use crate::search::{ResultItem, search};

pub const DEFAULT_SPLIT_COUNT: usize = 3;
pub const DEFAULT_MIN_SPLIT_KB: i64 = 5120;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub pattern: PathPattern,
    /// Local destination. A trailing `/` (or empty) names a directory;
    /// `{n}` placeholders take capture groups from the pattern.
    pub target: String,
    pub split_count: usize,
    /// Minimum size in KiB for a split download; negative disables splitting.
    pub min_split_kb: i64,
    pub dry_run: bool,
}

impl DownloadOptions {
    pub fn new(pattern: PathPattern, target: &str) -> Self {
        Self {
            pattern,
            target: target.to_string(),
            split_count: DEFAULT_SPLIT_COUNT,
            min_split_kb: DEFAULT_MIN_SPLIT_KB,
            dry_run: false,
        }
    }

    fn wants_split(&self, size: u64) -> bool {
        if self.split_count == 0 || self.min_split_kb < 0 || size == 0 {
            return false;
        }
        size >= (self.min_split_kb as u64).saturating_mul(1024)
    }
}

/// Local directory and file name for an artifact.
///
/// The target is split at its last `/`; a non-empty file part renames the
/// artifact. Unless `flat`, the artifact's directory inside the repository
/// is kept below the target directory.
pub fn local_path_and_file(name: &str, item_path: &str, target: &str, flat: bool) -> (PathBuf, String) {
    let (dir, file) = split_dir_file(target);
    let mut local = PathBuf::from(dir);
    if !flat && item_path != "." && !item_path.is_empty() {
        local = local.join(item_path);
    }
    let file_name = if file.is_empty() { name.to_string() } else { file.to_string() };
    (local, file_name)
}

/// `[start, end)` byte ranges; the last one absorbs the remainder.
pub fn split_ranges(size: u64, count: usize) -> Vec<(u64, u64)> {
    let count = count.max(1) as u64;
    let chunk = size / count;
    (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = if i == count - 1 { size } else { start + chunk };
            (start, end)
        })
        .filter(|(start, end)| start < end)
        .collect()
}

struct DownloadItem {
    client: Arc<dyn HttpClient>,
    details: ServerDetails,
    item: ResultItem,
    placeholders: Arc<Regex>,
    opts: Arc<DownloadOptions>,
    failure_tx: Sender<TransferError>,
}

enum Fetched {
    Done,
    Rejected(u16, String),
}

impl DownloadItem {
    fn remote_path(&self) -> String {
        format!("{}/{}", self.item.repo, self.item.path_in_repo())
    }

    fn run(self, worker_id: usize) -> Result<bool> {
        let remote = self.remote_path();
        let url = build_url(&self.details, &remote, &[])?;
        let target = apply_placeholders(&self.placeholders, &remote, &self.opts.target);
        let (local_dir, file_name) =
            local_path_and_file(&self.item.name, &self.item.path, &target, self.opts.pattern.flat());
        let dest = local_dir.join(&file_name);

        if self.opts.dry_run {
            tracing::info!("[Dry run] [download] worker_id={} {} -> {}", worker_id, remote, display_path(&dest));
            return Ok(true);
        }
        if self.item.is_folder() {
            std::fs::create_dir_all(&dest)
                .with_context(|| format!("create directory {}", dest.display()))?;
            tracing::debug!("[download] worker_id={} created {}", worker_id, display_path(&dest));
            return Ok(true);
        }
        if is_local_fresh(&dest, &self.item.actual_md5, &self.item.actual_sha1)? {
            tracing::info!("[download] worker_id={} {} is up to date, skipped", worker_id, display_path(&dest));
            return Ok(true);
        }
        std::fs::create_dir_all(&local_dir)
            .with_context(|| format!("create directory {}", local_dir.display()))?;

        let fetched = if self.opts.wants_split(self.item.size) && self.accepts_ranges(&url)? {
            self.fetch_split(&url, &dest, worker_id)?
        } else {
            self.fetch_whole(&url, &dest)?
        };
        match fetched {
            Fetched::Done => {
                tracing::info!(
                    "[download] worker_id={} {} -> {} ({})",
                    worker_id,
                    remote,
                    display_path(&dest),
                    crate::util::human_bytes(self.item.size)
                );
                Ok(true)
            }
            Fetched::Rejected(status, body) => {
                tracing::warn!("[download] worker_id={} {} failed with status {}", worker_id, remote, status);
                let _ = self
                    .failure_tx
                    .send(TransferError::PerItem(remote, format!("status {}: {}", status, body)));
                Ok(false)
            }
        }
    }

    fn accepts_ranges(&self, url: &str) -> Result<bool> {
        let resp = self.client.send(&HttpRequest::new(Method::Head, url))?;
        Ok(resp.is_success()
            && resp.header("Accept-Ranges").is_some_and(|v| v.eq_ignore_ascii_case("bytes")))
    }

    fn fetch_whole(&self, url: &str, dest: &Path) -> Result<Fetched> {
        let part = part_file(dest, None)?;
        let fetched = write_response(self.client.as_ref(), &HttpRequest::new(Method::Get, url), part.as_file())?;
        if let Fetched::Done = fetched {
            persist_part(part, dest)?;
        }
        Ok(fetched)
    }

    fn fetch_split(&self, url: &str, dest: &Path, worker_id: usize) -> Result<Fetched> {
        let ranges = split_ranges(self.item.size, self.opts.split_count);
        tracing::debug!(
            "[download] worker_id={} splitting {} into {} ranges",
            worker_id,
            display_path(dest),
            ranges.len()
        );
        let parts = (0..ranges.len())
            .map(|i| part_file(dest, Some(i)))
            .collect::<Result<Vec<NamedTempFile>>>()?;
        let client = self.client.as_ref();

        let results: Vec<Result<Fetched>> = std::thread::scope(|s| {
            let handles: Vec<_> = ranges
                .iter()
                .zip(&parts)
                .map(|(&(start, end), part)| {
                    s.spawn(move || -> Result<Fetched> {
                        let req = HttpRequest::new(Method::Get, url)
                            .header("Range", format!("bytes={}-{}", start, end - 1));
                        let fetched = write_response(client, &req, part.as_file())?;
                        if let Fetched::Done = fetched {
                            let len = part.as_file().metadata()?.len();
                            if len != end - start {
                                return Err(anyhow!(
                                    "range {}-{} returned {} bytes",
                                    start,
                                    end - 1,
                                    len
                                ));
                            }
                        }
                        Ok(fetched)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("range worker panicked"))))
                .collect()
        });

        let mut rejected = None;
        let mut error = None;
        for r in results {
            match r {
                Ok(Fetched::Done) => {}
                Ok(rej @ Fetched::Rejected(..)) => {
                    rejected.get_or_insert(rej);
                }
                Err(e) => {
                    error.get_or_insert(e);
                }
            }
        }
        match (error, rejected) {
            (Some(e), _) => Err(e),
            (None, Some(rej)) => Ok(rej),
            (None, None) => concat_parts(&parts, dest).map(|_| Fetched::Done),
        }
    }
}

/// Stream a GET into `file`. On a non-2xx answer the caller drops the file.
fn write_response(client: &dyn HttpClient, req: &HttpRequest, file: &File) -> Result<Fetched> {
    let mut out = BufWriter::new(file);
    let resp = client.download_to(req, &mut out)?;
    if !resp.is_success() {
        return Ok(Fetched::Rejected(resp.status, resp.text()));
    }
    out.flush().context("flush downloaded data")?;
    Ok(Fetched::Done)
}

fn concat_parts(parts: &[NamedTempFile], dest: &Path) -> Result<()> {
    let joined = part_file(dest, None)?;
    {
        let mut out = BufWriter::new(joined.as_file());
        for p in parts {
            let mut input = File::open(p.path()).with_context(|| format!("open {}", p.path().display()))?;
            std::io::copy(&mut input, &mut out)?;
        }
        out.flush()?;
    }
    persist_part(joined, dest)
}

/// Download everything `opts.pattern` matches into `opts.target`.
///
/// A failing search (or a pattern that cannot be turned into a placeholder
/// regex) is returned as an error before any file is touched.
pub fn download_files(ctx: &TransferContext, opts: &DownloadOptions) -> Result<TransferSummary> {
    let placeholders = Regex::new(&remote_path_to_regexp(opts.pattern.as_str())).map_err(|e| {
        TransferError::PatternSyntax(format!("pattern '{}': {}", opts.pattern.as_str(), e))
    })?;
    let items: Vec<ResultItem> = search(ctx.client.as_ref(), &ctx.details, &opts.pattern)?
        .into_iter()
        .filter(|i| i.name != ".")
        .collect();
    ctx.grow(items.len() as u64);

    let placeholders = Arc::new(placeholders);
    let shared_opts = Arc::new(opts.clone());
    let (failure_tx, failure_rx) = failure_channel();
    let runner = BoundedRunner::new(ctx.threads);
    let outcome = runner.run_with(|producer| {
        for item in items {
            let task = DownloadItem {
                client: ctx.client.clone(),
                details: ctx.details.clone(),
                item,
                placeholders: placeholders.clone(),
                opts: shared_opts.clone(),
                failure_tx: failure_tx.clone(),
            };
            producer.add_task(ctx.tracked(move |worker_id| task.run(worker_id)))?;
        }
        Ok(())
    });
    drop(failure_tx);
    finish(outcome, failure_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockHttpClient;
    use crate::query::PatternOptions;

    fn pattern(p: &str, flat: bool) -> PathPattern {
        PathPattern::parse(p, &PatternOptions { recursive: true, flat, ..Default::default() }).unwrap()
    }

    fn target_dir(dir: &Path) -> String {
        format!("{}/", dir.display())
    }

    #[test]
    fn local_paths() {
        assert_eq!(
            local_path_and_file("a.txt", "x/y", "out/", false),
            (PathBuf::from("out/x/y"), "a.txt".to_string())
        );
        assert_eq!(local_path_and_file("a.txt", "x/y", "out/", true), (PathBuf::from("out/"), "a.txt".to_string()));
        assert_eq!(local_path_and_file("a.txt", ".", "out/b.txt", false), (PathBuf::from("out/"), "b.txt".to_string()));
        assert_eq!(local_path_and_file("a.txt", ".", "", true), (PathBuf::from(""), "a.txt".to_string()));
    }

    #[test]
    fn ranges_cover_the_file() {
        assert_eq!(split_ranges(10, 3), vec![(0, 3), (3, 6), (6, 10)]);
        assert_eq!(split_ranges(100, 3), vec![(0, 33), (33, 66), (66, 100)]);
        assert_eq!(split_ranges(2, 3), vec![(0, 2)]);
        assert_eq!(split_ranges(9, 0), vec![(0, 9)]);
        assert!(split_ranges(0, 3).is_empty());
    }

    #[test]
    fn split_threshold() {
        let mut o = DownloadOptions::new(pattern("repo/a", true), "");
        o.min_split_kb = 1;
        assert!(o.wants_split(1024));
        assert!(!o.wants_split(1023));
        o.min_split_kb = -1;
        assert!(!o.wants_split(1 << 30));
        o.min_split_kb = 0;
        o.split_count = 0;
        assert!(!o.wants_split(10));
    }

    #[test]
    fn downloads_preserving_layout_and_skips_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/x/a.txt", b"alpha");
        mock.add_file("repo/b.txt", b"beta");
        let ctx = TransferContext::new(mock.clone(), mock.details(), 2);
        let opts = DownloadOptions::new(pattern("repo/*.txt", false), &target_dir(dir.path()));

        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!((s.succeeded, s.failed), (2, 0));
        assert_eq!(std::fs::read(dir.path().join("x/a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"beta");
        let gets = mock.count(Method::Get);
        assert_eq!(gets, 2);

        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!(s.succeeded, 2);
        assert_eq!(mock.count(Method::Get), gets);
    }

    #[test]
    fn split_download_reassembles() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/big.bin", &content);
        let ctx = TransferContext::new(mock.clone(), mock.details(), 1);
        let mut opts = DownloadOptions::new(pattern("repo/big.bin", true), &target_dir(dir.path()));
        opts.min_split_kb = 1;

        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!(s.succeeded, 1);
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), content);
        let ranged = mock.requests().iter().filter(|r| r.header("Range").is_some()).count();
        assert_eq!(ranged, 3);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".ap.part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    /// Delivers each body in two halves with a pause between them, so
    /// concurrent downloads overlap on disk.
    struct SlowBodies(Arc<MockHttpClient>);

    impl HttpClient for SlowBodies {
        fn send(&self, req: &HttpRequest) -> Result<crate::http::HttpResponse> {
            self.0.send(req)
        }

        fn download_to(&self, req: &HttpRequest, out: &mut dyn Write) -> Result<crate::http::HttpResponse> {
            let mut body = Vec::new();
            let resp = self.0.download_to(req, &mut body)?;
            let (head, tail) = body.split_at(body.len() / 2);
            out.write_all(head)?;
            std::thread::sleep(std::time::Duration::from_millis(200));
            out.write_all(tail)?;
            Ok(resp)
        }
    }

    #[test]
    fn flat_downloads_sharing_a_name_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/v1/app.jar", b"first build");
        mock.add_file("repo/v2/app.jar", b"second build");
        let ctx = TransferContext::new(Arc::new(SlowBodies(mock.clone())), mock.details(), 2);
        let mut opts = DownloadOptions::new(pattern("repo/*/app.jar", true), &target_dir(dir.path()));
        opts.split_count = 0;

        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!((s.succeeded, s.failed), (2, 0));
        assert!(s.error.is_none());
        let got = std::fs::read(dir.path().join("app.jar")).unwrap();
        assert!(got == b"first build" || got == b"second build");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn no_range_support_falls_back_to_single_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/big.bin", &[7u8; 4096]);
        mock.set_accept_ranges(false);
        let ctx = TransferContext::new(mock.clone(), mock.details(), 1);
        let mut opts = DownloadOptions::new(pattern("repo/big.bin", true), &target_dir(dir.path()));
        opts.min_split_kb = 1;
        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!(s.succeeded, 1);
        assert!(mock.requests().iter().all(|r| r.header("Range").is_none()));
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap().len(), 4096);
    }

    #[test]
    fn placeholders_rename_and_failures_count() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/v1/app.jar", b"1");
        mock.add_file("repo/v2/app.jar", b"2");
        mock.fail_path("repo/v2/app.jar", 500);
        let ctx = TransferContext::new(mock.clone(), mock.details(), 2);
        let target = format!("{}/{{1}}/renamed.jar", dir.path().display());
        let opts = DownloadOptions::new(pattern("repo/(*)/app.jar", true), &target);
        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!((s.succeeded, s.failed), (1, 1));
        assert_eq!(std::fs::read(dir.path().join("v1/renamed.jar")).unwrap(), b"1");
        assert!(!dir.path().join("v2/renamed.jar").exists());
        assert_eq!(s.failures.len(), 1);
    }

    #[test]
    fn dry_run_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/x/a.bin", b"a");
        mock.add_file("repo/x/b.bin", b"b");
        let ctx = TransferContext::new(mock.clone(), mock.details(), 2);
        let mut opts = DownloadOptions::new(pattern("repo/x/*", false), &target_dir(dir.path()));
        opts.dry_run = true;
        let s = download_files(&ctx, &opts).unwrap();
        assert_eq!((s.succeeded, s.failed), (2, 0));
        assert_eq!(mock.count(Method::Get), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn include_dirs_creates_empty_folders() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_folder("repo/lib/empty");
        mock.add_file("repo/lib/a.jar", b"a");
        let ctx = TransferContext::new(mock.clone(), mock.details(), 2);
        let with_dirs = PathPattern::parse(
            "repo/*",
            &PatternOptions { recursive: true, include_dirs: true, ..Default::default() },
        )
        .unwrap();
        let s = download_files(&ctx, &DownloadOptions::new(with_dirs, &target_dir(dir.path()))).unwrap();
        assert_eq!(s.failed, 0);
        assert!(dir.path().join("lib/empty").is_dir());
        assert_eq!(std::fs::read(dir.path().join("lib/a.jar")).unwrap(), b"a");
    }

    #[test]
    fn failed_search_is_fatal() {
        let mock = Arc::new(MockHttpClient::new());
        mock.fail_search(400, "bad query");
        let ctx = TransferContext::new(mock.clone(), mock.details(), 1);
        let opts = DownloadOptions::new(pattern("repo/*", true), "out/");
        let err = download_files(&ctx, &opts).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::QueryExecution(400, _))));
    }
}
