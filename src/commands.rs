use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use indicatif::ProgressBar;
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use owo_colors::OwoColorize;

use crate::cli::{Cli, Commands, MoveCopyArgs, RemoteSelection, SortOrderArg};
use crate::config::{Config, Overrides};
use crate::http::{HttpClient, ReqwestClient};
use crate::query::{PathPattern, PatternOptions, QueryModifiers, SortOrder};
use crate::search::{ResultItem, search_with};
use crate::transfer::delete::{Confirm, DeleteOptions, delete_files};
use crate::transfer::download::{DownloadOptions, download_files};
use crate::transfer::enumeration::LocalPattern;
use crate::transfer::movecopy::{MoveCopyOptions, MoveType, move_copy};
use crate::transfer::upload::{UploadOptions, upload_files};
use crate::transfer::{TransferContext, TransferSummary};
use crate::util::{failures_log_path, init_logging, init_progress, print_summary, write_failures_jsonl};
use crate::{ExitStatus, TransferError};

/// Prompts on stdin after listing every path.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, paths: &[String]) -> bool {
        for p in paths {
            println!("  {}", p);
        }
        print!("Are you sure you want to delete the above paths? (y/n): ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn log_dir() -> Option<PathBuf> {
    Config::storage_dir().ok().map(|d| d.join("logs"))
}

fn overrides(cli: &Cli) -> Overrides {
    Overrides {
        url: cli.url.clone(),
        user: cli.user.clone(),
        password: cli.password.clone(),
        access_token: cli.access_token.clone(),
        threads: cli.threads,
        retries: cli.retries,
    }
}

/// CLI flag > `ARTPILOT_*` env > config file > defaults.
pub fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env()?;
    config.apply_overrides(&overrides(cli));
    Ok(config)
}

fn pattern_options(select: &RemoteSelection, flat: bool, include_dirs: bool) -> PatternOptions {
    PatternOptions {
        recursive: select.recursive,
        is_regex: false,
        flat,
        include_dirs,
        props: select.props.clone(),
        exclude_patterns: select.exclude_patterns.clone(),
    }
}

/// Entry point used by `main`: set up logging, resolve the configuration
/// and run the chosen command.
pub fn run(cli: Cli) -> Result<ExitStatus> {
    let logs = log_dir();
    let _guard = init_logging(cli.verbose, logs.as_deref())?;
    let config = resolve_config(&cli)?;

    if let Commands::Set {} = cli.command {
        return handle_set(&cli, &config);
    }
    let details = config.server_details()?;
    let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(details.clone())?);
    let ctx = TransferContext::new(client, details, config.threads);
    tracing::debug!("[cli] {:?}", cli.command);
    execute(cli.command, &ctx, &config, &mut StdinConfirm, logs.as_deref())
}

/// Run one command against an already built context.
pub fn execute(
    command: Commands,
    ctx: &TransferContext,
    config: &Config,
    confirm: &mut dyn Confirm,
    logs: Option<&std::path::Path>,
) -> Result<ExitStatus> {
    let ctx = &match progress_label(&command) {
        Some(label) => ctx.clone().with_progress(init_progress(0, label, cfg!(test))),
        None => ctx.clone(),
    };
    match command {
        Commands::Search { pattern, select, include_dirs, sort_by, sort_order, offset, limit, table } => {
            let pattern = PathPattern::parse(&pattern, &pattern_options(&select, false, include_dirs))?;
            let modifiers = QueryModifiers {
                sort_by,
                sort_order: match sort_order {
                    SortOrderArg::Asc => SortOrder::Asc,
                    SortOrderArg::Desc => SortOrder::Desc,
                },
                offset,
                limit,
            };
            let items = search_with(ctx.client.as_ref(), &ctx.details, &pattern, &modifiers)?;
            if table {
                show_table(&items)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
            Ok(ExitStatus::Success)
        }
        Commands::Upload {
            source,
            target,
            recursive,
            flat,
            regexp,
            props,
            deb,
            exclude_patterns,
            min_checksum_deploy_kb,
            dry_run,
        } => {
            let opts = UploadOptions {
                source: LocalPattern { pattern: source, target, recursive, flat, is_regex: regexp, exclude_patterns },
                props,
                deb,
                dry_run,
                min_checksum_deploy_kb: min_checksum_deploy_kb.unwrap_or(config.min_checksum_deploy_kb),
            };
            let summary = upload_files(ctx, &opts);
            report(summary, ctx, "Uploaded", "uploading", logs)
        }
        Commands::Download {
            pattern,
            target,
            select,
            flat,
            include_dirs,
            split_count,
            min_split_kb,
            dry_run,
        } => {
            let pattern = PathPattern::parse(&pattern, &pattern_options(&select, flat, include_dirs))?;
            let mut opts = DownloadOptions::new(pattern, &target);
            opts.split_count = split_count.unwrap_or(config.split_count);
            opts.min_split_kb = min_split_kb.unwrap_or(config.min_split_kb);
            opts.dry_run = dry_run;
            let summary = download_files(ctx, &opts);
            report(summary, ctx, "Downloaded", "downloading", logs)
        }
        Commands::Move(args) => handle_move_copy(ctx, args, MoveType::Move, logs),
        Commands::Copy(args) => handle_move_copy(ctx, args, MoveType::Copy, logs),
        Commands::Delete { pattern, select, quiet, dry_run } => {
            let pattern = PathPattern::parse(&pattern, &pattern_options(&select, false, true))?;
            let opts = DeleteOptions { pattern, quiet, dry_run };
            let summary = match &ctx.progress {
                Some(pb) => delete_files(ctx, &opts, &mut Suspended { inner: confirm, progress: pb })?,
                None => delete_files(ctx, &opts, confirm)?,
            };
            if let Some(pb) = &ctx.progress
                && (summary.nothing_to_delete() || summary.declined)
            {
                pb.finish_and_clear();
            }
            if summary.nothing_to_delete() {
                println!("Nothing to delete.");
                return Ok(ExitStatus::Success);
            }
            if summary.declined {
                println!("Aborted, nothing was deleted.");
                return Ok(ExitStatus::Success);
            }
            report(Ok(summary.transfer), ctx, "Deleted", "deleting", logs)
        }
        Commands::Set {} => Err(TransferError::Config("set does not take a server context".into()).into()),
    }
}

fn handle_move_copy(
    ctx: &TransferContext,
    args: MoveCopyArgs,
    kind: MoveType,
    logs: Option<&std::path::Path>,
) -> Result<ExitStatus> {
    let pattern = PathPattern::parse(&args.source, &pattern_options(&args.select, args.flat, false))?;
    let opts = MoveCopyOptions { pattern, target: args.target, kind, dry_run: args.dry_run };
    let (done, doing) = kind.verbs();
    let summary = move_copy(ctx, &opts);
    report(summary, ctx, done, doing, logs)
}

fn handle_set(cli: &Cli, config: &Config) -> Result<ExitStatus> {
    let path = match &cli.config {
        Some(p) => p.clone(),
        None => Config::default_path()?,
    };
    config.save(&path)?;
    println!("{} {}", "Saved configuration to".green(), path.display());
    Ok(ExitStatus::Success)
}

/// Label of the item progress bar, for commands that transfer items.
fn progress_label(command: &Commands) -> Option<&'static str> {
    match command {
        Commands::Upload { .. } => Some("upload"),
        Commands::Download { .. } => Some("download"),
        Commands::Move(_) => Some("move"),
        Commands::Copy(_) => Some("copy"),
        Commands::Delete { .. } => Some("delete"),
        Commands::Search { .. } | Commands::Set {} => None,
    }
}

/// Hides the progress bar while the delete prompt waits for an answer.
struct Suspended<'a> {
    inner: &'a mut dyn Confirm,
    progress: &'a ProgressBar,
}

impl Confirm for Suspended<'_> {
    fn confirm(&mut self, paths: &[String]) -> bool {
        let inner = &mut self.inner;
        self.progress.suspend(|| inner.confirm(paths))
    }
}

/// Print the summary line, log per-item failures and map to an exit status.
fn report(
    summary: Result<TransferSummary>,
    ctx: &TransferContext,
    done: &str,
    doing: &str,
    logs: Option<&std::path::Path>,
) -> Result<ExitStatus> {
    if let Some(pb) = &ctx.progress {
        pb.finish_and_clear();
    }
    let summary = summary?;
    print_summary(done, doing, summary.succeeded, summary.failed);
    if !summary.failures.is_empty()
        && let Some(dir) = logs
    {
        let path = failures_log_path(dir);
        write_failures_jsonl(&path, &summary.failures);
        eprintln!("Failures written to {}", path.display());
    }
    if let Some(err) = &summary.error {
        eprintln!("{} {:#}", "error:".red(), err);
    }
    Ok(summary.exit_status())
}

fn show_table(items: &[ResultItem]) -> Result<()> {
    if items.is_empty() {
        println!("No artifacts found.");
        return Ok(());
    }
    let title = vec![
        "Path".cell().bold(true),
        "Type".cell().bold(true),
        "Size".cell().bold(true),
        "SHA1".cell().bold(true),
    ];
    let rows: Vec<Vec<CellStruct>> = items
        .iter()
        .map(|i| {
            vec![
                i.relative_path().cell(),
                if i.is_folder() { "folder" } else { "file" }.cell(),
                crate::util::human_bytes(i.size).cell().justify(Justify::Right),
                i.actual_sha1.clone().cell(),
            ]
        })
        .collect();
    print_stdout(rows.table().title(title))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockHttpClient;
    use crate::transfer::delete::FixedAnswer;
    use clap::Parser;

    fn context(mock: &Arc<MockHttpClient>) -> TransferContext {
        TransferContext::new(mock.clone(), mock.details(), 2)
    }

    fn command(args: &[&str]) -> Commands {
        let mut full = vec!["ap"];
        full.extend_from_slice(args);
        Cli::parse_from(full).command
    }

    #[test]
    fn delete_statuses() {
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/a.txt", b"a");
        mock.add_file("repo/b.txt", b"b");
        mock.fail_path("repo/b.txt", 500);
        let ctx = context(&mock);
        let cfg = Config::default();

        let st = execute(command(&["del", "repo/none*"]), &ctx, &cfg, &mut FixedAnswer(true), None).unwrap();
        assert_eq!(st, ExitStatus::Success);
        let st = execute(command(&["del", "repo/*.txt"]), &ctx, &cfg, &mut FixedAnswer(false), None).unwrap();
        assert_eq!(st, ExitStatus::Success);
        assert_eq!(mock.file_paths().len(), 2);
        let st = execute(command(&["del", "repo/*.txt", "-q"]), &ctx, &cfg, &mut FixedAnswer(false), None).unwrap();
        assert_eq!(st, ExitStatus::PartialFailure);
    }

    #[test]
    fn failures_are_logged_and_total_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/a.txt", b"a");
        mock.fail_path("repo/a.txt", 404);
        let ctx = context(&mock);
        let st = execute(
            command(&["cp", "repo/*.txt", "other/"]),
            &ctx,
            &Config::default(),
            &mut FixedAnswer(true),
            Some(dir.path()),
        )
        .unwrap();
        assert_eq!(st, ExitStatus::TotalFailure);
        let logs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn every_item_command_gets_a_progress_bar() {
        for args in [
            &["u", "build/*", "repo/"][..],
            &["dl", "repo/*"],
            &["mv", "repo/a", "other/"],
            &["cp", "repo/a", "other/"],
            &["del", "repo/a"],
        ] {
            assert!(progress_label(&command(args)).is_some(), "{:?}", args);
        }
        assert!(progress_label(&command(&["search", "repo/*"])).is_none());
    }

    #[test]
    fn move_advances_the_progress_bar_per_item() {
        let mock = Arc::new(MockHttpClient::new());
        mock.add_file("repo/a.txt", b"a");
        mock.add_file("repo/b.txt", b"b");
        let pb = init_progress(0, "move", true);
        let ctx = context(&mock).with_progress(pb.clone());
        let (done, doing) = MoveType::Move.verbs();
        let args = match command(&["mv", "repo/*.txt", "other/", "--flat"]) {
            Commands::Move(a) => a,
            other => panic!("unexpected {:?}", other),
        };
        let pattern = PathPattern::parse(&args.source, &pattern_options(&args.select, args.flat, false)).unwrap();
        let opts = MoveCopyOptions { pattern, target: args.target, kind: MoveType::Move, dry_run: false };
        let st = report(move_copy(&ctx, &opts), &ctx, done, doing, None).unwrap();
        assert_eq!(st, ExitStatus::Success);
        assert_eq!(pb.length(), Some(2));
        assert_eq!(pb.position(), 2);
    }

    #[test]
    fn search_failure_is_an_error() {
        let mock = Arc::new(MockHttpClient::new());
        mock.fail_search(500, "{\"errors\":[\"boom\"]}");
        let err = execute(command(&["search", "repo/*"]), &context(&mock), &Config::default(), &mut FixedAnswer(true), None)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::QueryExecution(500, _))));
    }
}
