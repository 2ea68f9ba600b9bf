use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::TransferError;

/// Try to enable ANSI escape sequence support on Windows consoles.
/// Returns true if enabling succeeded (or platform likely already supports ANSI), false otherwise.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Install the global tracing subscriber.
///
/// With `verbose` everything at debug level goes to a daily-rolled file under
/// `log_dir`; otherwise only warnings reach stderr. `RUST_LOG` overrides the
/// level in both cases. The returned guard must live until exit so buffered
/// file lines are flushed.
pub fn init_logging(
    verbose: bool,
    log_dir: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), level)));

    match (verbose, log_dir) {
        (true, Some(dir)) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "ap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false).with_thread_ids(true))
                .try_init()
                .map_err(|e| TransferError::Config(format!("logging init: {}", e)))?;
            Ok(Some(guard))
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .try_init()
                .map_err(|e| TransferError::Config(format!("logging init: {}", e)))?;
            Ok(None)
        }
    }
}

/// Item-count progress bar. Hidden when stdout is not wanted (quiet mode).
pub fn init_progress(total: u64, action: &str, hidden: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if hidden {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }
    let _ = try_enable_ansi_on_windows();
    let style = ProgressStyle::with_template(
        "{prefix:>10} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(action.to_string());
    pb
}

/// Print the one-line outcome summary, e.g.
/// "Uploaded 8 artifacts. Failed uploading 2 artifacts."
pub fn print_summary(done_verb: &str, fail_verb: &str, succeeded: usize, failed: usize) {
    println!("{}", summary_line(done_verb, fail_verb, succeeded, failed, true));
}

pub fn summary_line(
    done_verb: &str,
    fail_verb: &str,
    succeeded: usize,
    failed: usize,
    color: bool,
) -> String {
    let ok = format!("{} {} artifacts.", done_verb, succeeded);
    if failed == 0 {
        return if color { ok.green().to_string() } else { ok };
    }
    let bad = format!("Failed {} {} artifacts.", fail_verb, failed);
    if color { format!("{} {}", ok, bad.red()) } else { format!("{} {}", ok, bad) }
}

/// `~/.artpilot/logs/failures-<UTC timestamp>.jsonl`.
pub fn failures_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("failures-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%SZ")))
}

/// Append failures as JSON lines; each line carries the variant, a message
/// and the variant's fields. Best effort: I/O problems are logged, not raised.
pub fn write_failures_jsonl(path: &Path, failures: &[TransferError]) {
    if failures.is_empty() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let mut f = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("cannot open failure log {}: {}", path.display(), e);
            return;
        }
    };
    let ts = Utc::now().to_rfc3339();
    for err in failures {
        let mut obj = serde_json::json!({
            "ts": ts,
            "variant": err.variant(),
            "message": err.to_string(),
        });
        match err {
            TransferError::PerItem(p, m) => {
                obj["path"] = p.clone().into();
                obj["error"] = m.clone().into();
            }
            TransferError::QueryExecution(status, body) => {
                obj["status"] = (*status).into();
                obj["body"] = body.clone().into();
            }
            TransferError::PathNotFound(p) => obj["path"] = p.clone().into(),
            _ => {}
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Run `op` up to `max_attempts` times (at least once); the n-th retry
/// waits `n * backoff`.
pub fn retry_operation<F, T>(max_attempts: usize, backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(e);
                }
                let wait = backoff.saturating_mul(attempt as u32);
                tracing::debug!("[retry] attempt {}/{} failed: {:#}; waiting {:?}", attempt, attempts, e, wait);
                std::thread::sleep(wait);
            }
        }
    }
}
