use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Sender;
use regex::Regex;

use super::helpers::split_dir_file;
use super::scheduler::BoundedRunner;
use super::{TransferContext, TransferSummary, failure_channel, finish};
use crate::TransferError;
use crate::config::ServerDetails;
use crate::http::{HttpClient, HttpRequest, Method, build_url};
use crate::query::PathPattern;
use crate::query::wildcard::{apply_placeholders, remote_path_to_regexp, trim_path};
use crate::search::{ChainFilter, ResultItem, reduce_dir_results, search};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    Move,
    Copy,
}

impl MoveType {
    fn endpoint(self) -> &'static str {
        match self {
            MoveType::Move => "move",
            MoveType::Copy => "copy",
        }
    }

    /// Past tense and gerund used in summaries: ("Moved", "moving").
    pub fn verbs(self) -> (&'static str, &'static str) {
        match self {
            MoveType::Move => ("Moved", "moving"),
            MoveType::Copy => ("Copied", "copying"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoveCopyOptions {
    pub pattern: PathPattern,
    /// Destination template; `{n}` placeholders take capture groups from
    /// the pattern and a trailing `/` keeps the source name.
    pub target: String,
    pub kind: MoveType,
    pub dry_run: bool,
}

/// One server-side move or copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveJob {
    pub source: String,
    pub dest: String,
    /// Folder destinations are created before the call.
    pub create_dest: bool,
}

/// Destination for a literal source: a directory target keeps the file name.
pub fn literal_destination(source: &str, target: &str) -> String {
    if target.ends_with('/') && !source.ends_with('/') {
        let (_, name) = split_dir_file(source);
        format!("{}{}", target, name)
    } else {
        target.to_string()
    }
}

/// Destination for a searched item. Unless `flat`, the item's directory
/// inside its repository is inserted between the target directory and the
/// target file name.
pub fn item_destination(item: &ResultItem, target: &str, flat: bool, placeholders: &Regex) -> MoveJob {
    let mut dest = target.to_string();
    if !flat {
        dest = if dest.contains('/') {
            let (dir, file) = split_dir_file(&dest);
            trim_path(&format!("{}/{}/{}", dir.trim_end_matches('/'), item.path, file))
        } else {
            trim_path(&format!("{}/{}/", dest, item.path))
        };
    }
    let source = item.relative_path();
    let mut dest = apply_placeholders(placeholders, &source, &dest);
    let mut create_dest = false;
    if dest.ends_with('/') {
        if item.is_folder() {
            create_dest = true;
        } else {
            dest.push_str(&item.name);
        }
    }
    MoveJob { source, dest, create_dest }
}

struct MoveItem {
    client: Arc<dyn HttpClient>,
    details: ServerDetails,
    job: MoveJob,
    kind: MoveType,
    dry_run: bool,
    failure_tx: Sender<TransferError>,
}

impl MoveItem {
    fn run(self, worker_id: usize) -> Result<bool> {
        let (_, gerund) = self.kind.verbs();
        let prefix = if self.dry_run { "[Dry run] " } else { "" };
        if self.job.create_dest {
            self.create_path(worker_id)?;
        }
        let api = format!("api/{}/{}", self.kind.endpoint(), self.job.source);
        let mut params = vec![("to", self.job.dest.as_str())];
        if self.dry_run {
            params.push(("dry", "1"));
        }
        let url = build_url(&self.details, &api, &params)?;
        tracing::info!(
            "{}[{}] worker_id={} {} artifact: {} to: {}",
            prefix,
            self.kind.endpoint(),
            worker_id,
            gerund,
            self.job.source,
            self.job.dest
        );
        let resp = self.client.send(&HttpRequest::new(Method::Post, url))?;
        if resp.status == 200 {
            return Ok(true);
        }
        tracing::error!("[{}] {} answered {}: {}", self.kind.endpoint(), self.job.source, resp.status, resp.text());
        let _ = self.failure_tx.send(TransferError::PerItem(
            self.job.source.clone(),
            format!("status {}: {}", resp.status, resp.text()),
        ));
        Ok(false)
    }

    fn create_path(&self, worker_id: usize) -> Result<()> {
        if self.dry_run {
            tracing::info!("[Dry run] [{}] worker_id={} create path: {}", self.kind.endpoint(), worker_id, self.job.dest);
            return Ok(());
        }
        let url = build_url(&self.details, &self.job.dest, &[])?;
        let resp = self.client.send(&HttpRequest::new(Method::Put, url))?;
        if resp.status != 201 && resp.status != 200 {
            tracing::warn!("[{}] creating {} answered {}", self.kind.endpoint(), self.job.dest, resp.status);
        }
        Ok(())
    }
}

/// Resolve the jobs without running them: literal patterns map straight to
/// one job, anything else is searched (directories included) and reduced.
pub fn plan_jobs(client: &dyn HttpClient, details: &ServerDetails, opts: &MoveCopyOptions) -> Result<Vec<MoveJob>> {
    let p = &opts.pattern;
    if !p.is_wildcard() && p.props().is_empty() && p.exclude_patterns().is_empty() {
        return Ok(vec![MoveJob {
            source: p.as_str().to_string(),
            dest: literal_destination(p.as_str(), &opts.target),
            create_dest: false,
        }]);
    }
    let placeholders = Regex::new(&remote_path_to_regexp(p.as_str()))
        .map_err(|e| TransferError::PatternSyntax(format!("pattern '{}': {}", p.as_str(), e)))?;
    let items = search(client, details, &p.with_dirs())?;
    let filter = if p.flat() { ChainFilter::Bottom } else { ChainFilter::Top };
    let items = reduce_dir_results(items, filter);
    tracing::info!("[{}] {} items to process", opts.kind.endpoint(), items.len());
    Ok(items.iter().map(|i| item_destination(i, &opts.target, p.flat(), &placeholders)).collect())
}

/// Move or copy everything `opts.pattern` resolves to. Success is HTTP 200.
pub fn move_copy(ctx: &TransferContext, opts: &MoveCopyOptions) -> Result<TransferSummary> {
    let jobs = plan_jobs(ctx.client.as_ref(), &ctx.details, opts)?;
    ctx.grow(jobs.len() as u64);
    let (failure_tx, failure_rx) = failure_channel();
    let runner = BoundedRunner::new(ctx.threads);
    let outcome = runner.run_with(|producer| {
        for job in jobs {
            let item = MoveItem {
                client: ctx.client.clone(),
                details: ctx.details.clone(),
                job,
                kind: opts.kind,
                dry_run: opts.dry_run,
                failure_tx: failure_tx.clone(),
            };
            producer.add_task(ctx.tracked(move |worker_id| item.run(worker_id)))?;
        }
        Ok(())
    });
    drop(failure_tx);
    finish(outcome, failure_rx)
}
