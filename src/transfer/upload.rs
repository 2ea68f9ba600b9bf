use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Sender;

use super::checksum::{Checksums, file_checksums};
use super::enumeration::{LocalCandidate, LocalPattern, enumerate_local};
use super::helpers::display_path;
use super::scheduler::BoundedRunner;
use super::{TransferContext, TransferSummary, failure_channel, finish};
use crate::TransferError;
use crate::config::ServerDetails;
use crate::http::{Body, HttpClient, HttpRequest, Method, build_url};
use crate::parse::{Properties, parse_debian, parse_properties};

pub const DEFAULT_MIN_CHECKSUM_DEPLOY_KB: u64 = 10;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub source: LocalPattern,
    /// `k1=v1;k2=v2` attached to every uploaded artifact.
    pub props: Option<String>,
    /// `distribution/component/architecture`.
    pub deb: Option<String>,
    pub dry_run: bool,
    /// Files at least this large first try a checksum deploy.
    pub min_checksum_deploy_kb: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            source: LocalPattern::default(),
            props: None,
            deb: None,
            dry_run: false,
            min_checksum_deploy_kb: DEFAULT_MIN_CHECKSUM_DEPLOY_KB,
        }
    }
}

impl UploadOptions {
    /// Matrix suffix for every target; parse errors are fatal before any upload.
    fn matrix_params(&self) -> Result<String> {
        let mut props = Properties::default();
        if let Some(p) = &self.props {
            props.extend(parse_properties(p)?);
        }
        if let Some(d) = &self.deb {
            props.extend(parse_debian(d)?);
        }
        Ok(props.to_encoded_string())
    }
}

struct UploadItem {
    client: Arc<dyn HttpClient>,
    details: ServerDetails,
    candidate: LocalCandidate,
    matrix: String,
    dry_run: bool,
    min_checksum_bytes: u64,
    failure_tx: Sender<TransferError>,
}

fn checksum_headers(req: HttpRequest, sums: &Checksums) -> HttpRequest {
    req.header("X-Checksum-Sha1", sums.sha1.as_str())
        .header("X-Checksum-Md5", sums.md5.as_str())
        .header("X-Checksum-Sha256", sums.sha256.as_str())
        .header("X-Checksum", sums.sha256.as_str())
}

fn deployed(status: u16) -> bool {
    status == 200 || status == 201
}

impl UploadItem {
    fn target_url(&self) -> Result<String> {
        let target = if self.matrix.is_empty() {
            self.candidate.target_path.clone()
        } else {
            format!("{};{}", self.candidate.target_path, self.matrix)
        };
        build_url(&self.details, &target, &[])
    }

    fn run(self, worker_id: usize) -> Result<bool> {
        let target = &self.candidate.target_path;
        let local = &self.candidate.local_path;
        if self.dry_run {
            tracing::info!("[Dry run] [upload] worker_id={} {} -> {}", worker_id, display_path(local), target);
            return Ok(true);
        }
        let url = self.target_url()?;
        let sums = file_checksums(local)?;

        if self.candidate.size >= self.min_checksum_bytes && self.try_checksum_deploy(&url, &sums)? {
            tracing::info!(
                "[upload] worker_id={} checksum deployed {} -> {}",
                worker_id,
                display_path(local),
                target
            );
            return Ok(true);
        }

        let req = checksum_headers(HttpRequest::new(Method::Put, url), &sums)
            .body(Body::File(local.to_path_buf()));
        let resp = self.client.send(&req)?;
        if deployed(resp.status) {
            tracing::info!(
                "[upload] worker_id={} uploaded {} -> {} ({})",
                worker_id,
                display_path(local),
                target,
                crate::util::human_bytes(self.candidate.size)
            );
            return Ok(true);
        }
        tracing::warn!("[upload] worker_id={} {} failed with status {}", worker_id, target, resp.status);
        self.report(target, format!("status {}: {}", resp.status, resp.text()));
        Ok(false)
    }

    /// The store links existing content by checksum; anything but 200/201
    /// falls back to a full upload.
    fn try_checksum_deploy(&self, url: &str, sums: &Checksums) -> Result<bool> {
        let req = checksum_headers(HttpRequest::new(Method::Put, url), sums)
            .header("X-Checksum-Deploy", "true");
        let resp = self.client.send(&req)?;
        tracing::debug!("[upload] checksum deploy of {} answered {}", self.candidate.target_path, resp.status);
        Ok(deployed(resp.status))
    }

    fn report(&self, path: &str, msg: String) {
        let _ = self.failure_tx.send(TransferError::PerItem(path.to_string(), msg));
    }
}

/// Upload every local file matched by `opts.source`.
///
/// Files are handed to the runner while the walk is still in progress. A
/// missing root, a bad pattern or malformed properties fail the call before
/// anything is sent.
pub fn upload_files(ctx: &TransferContext, opts: &UploadOptions) -> Result<TransferSummary> {
    let matrix = opts.matrix_params()?;
    let min_checksum_bytes = opts.min_checksum_deploy_kb.saturating_mul(1024);
    let (failure_tx, failure_rx) = failure_channel();

    let runner = BoundedRunner::new(ctx.threads);
    tracing::debug!("[upload] {} workers for {}", runner.threads(), opts.source.pattern);
    let outcome = runner.run_with(|producer| {
        let produced = enumerate_local(&opts.source, &mut |candidate| {
            ctx.grow(1);
            let item = UploadItem {
                client: ctx.client.clone(),
                details: ctx.details.clone(),
                candidate,
                matrix: matrix.clone(),
                dry_run: opts.dry_run,
                min_checksum_bytes,
                failure_tx: failure_tx.clone(),
            };
            producer.add_task(ctx.tracked(move |worker_id| item.run(worker_id)))
        })?;
        tracing::debug!("[upload] enumerated {} files", produced);
        Ok(())
    });
    drop(failure_tx);
    finish(outcome, failure_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockHttpClient;
    use std::path::Path;

    fn ctx(mock: &Arc<MockHttpClient>) -> TransferContext {
        TransferContext::new(mock.clone(), mock.details(), 2)
    }

    fn source(dir: &Path, pattern: &str, target: &str) -> LocalPattern {
        LocalPattern {
            pattern: format!("{}/{}", dir.display(), pattern),
            target: target.to_string(),
            recursive: true,
            flat: true,
            ..Default::default()
        }
    }

    #[test]
    fn uploads_with_props_and_checksum_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let mock = Arc::new(MockHttpClient::new());
        let opts = UploadOptions {
            source: source(dir.path(), "*.txt", "repo/dir/"),
            props: Some("build=7;os=linux".into()),
            deb: Some("bionic/main/amd64".into()),
            ..Default::default()
        };
        let s = upload_files(&ctx(&mock), &opts).unwrap();
        assert_eq!((s.succeeded, s.failed), (1, 0));
        assert_eq!(mock.file("repo/dir/a.txt").unwrap(), b"alpha");
        let props = mock.props_of("repo/dir/a.txt");
        assert!(props.contains(&("build".into(), "7".into())));
        assert!(props.contains(&("deb.component".into(), "main".into())));
        let put = mock.requests().into_iter().find(|r| r.method == Method::Put).unwrap();
        assert_eq!(put.header("X-Checksum-Sha1").map(str::len), Some(40));
        assert_eq!(put.header("X-Checksum-Md5").map(str::len), Some(32));
        assert_eq!(put.header("X-Checksum").map(str::len), Some(64));
        assert_eq!(put.header("X-Checksum"), put.header("X-Checksum-Sha256"));
        // below the checksum-deploy threshold
        assert!(put.header("X-Checksum-Deploy").is_none());
    }

    #[test]
    fn bad_props_and_deb_are_fatal_before_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let mock = Arc::new(MockHttpClient::new());
        let mut opts = UploadOptions { source: source(dir.path(), "*.txt", "repo/"), ..Default::default() };
        opts.props = Some("novalue".into());
        let err = upload_files(&ctx(&mock), &opts).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::PatternSyntax(_))));
        opts.props = None;
        opts.deb = Some("a/b".into());
        let err = upload_files(&ctx(&mock), &opts).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::Config(_))));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn dry_run_counts_without_requests() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["a.txt", "b.txt"] {
            std::fs::write(dir.path().join(n), n).unwrap();
        }
        let mock = Arc::new(MockHttpClient::new());
        let opts = UploadOptions {
            source: source(dir.path(), "*.txt", "repo/"),
            dry_run: true,
            ..Default::default()
        };
        let s = upload_files(&ctx(&mock), &opts).unwrap();
        assert_eq!(s.succeeded, 2);
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn rejected_item_is_counted_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["a.txt", "b.txt"] {
            std::fs::write(dir.path().join(n), n).unwrap();
        }
        let mock = Arc::new(MockHttpClient::new());
        mock.fail_path("repo/b.txt", 403);
        let opts = UploadOptions { source: source(dir.path(), "*.txt", "repo"), ..Default::default() };
        let s = upload_files(&ctx(&mock), &opts).unwrap();
        assert_eq!((s.succeeded, s.failed), (1, 1));
        assert!(s.error.is_none());
        assert_eq!(s.failures.len(), 1);
        assert!(matches!(&s.failures[0], TransferError::PerItem(p, _) if p == "repo/b.txt"));
    }

    #[test]
    fn missing_root_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        let opts = UploadOptions { source: source(dir.path(), "nope/*.txt", "repo/"), ..Default::default() };
        let err = upload_files(&ctx(&mock), &opts).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::PathNotFound(_))));
    }
}
