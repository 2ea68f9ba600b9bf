use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(long, global = true, help = "Repository service base URL")]
    pub url: Option<String>,
    #[clap(long, global = true)]
    pub user: Option<String>,
    #[clap(long, global = true)]
    pub password: Option<String>,
    #[clap(long = "access-token", global = true, help = "Bearer token, used instead of user/password")]
    pub access_token: Option<String>,
    #[clap(long, global = true, help = "Config file (default ~/.artpilot/config.json)")]
    pub config: Option<PathBuf>,
    #[clap(short, long, global = true, help = "Write debug logs to ~/.artpilot/logs")]
    pub verbose: bool,
    #[clap(long, global = true, help = "Number of worker threads (default 3)")]
    pub threads: Option<usize>,
    #[clap(long, global = true, help = "Attempts per HTTP request (default 3)")]
    pub retries: Option<usize>,
    #[clap(subcommand)]
    pub command: Commands,
}

/// Selection flags shared by every remote-pattern command.
#[derive(Args, Debug, Clone)]
pub struct RemoteSelection {
    #[clap(long, default_value_t = true, action = ArgAction::Set, help = "Descend into sub-directories")]
    pub recursive: bool,
    #[clap(long, help = "Only artifacts carrying these properties, e.g. \"a=1;b=2\"")]
    pub props: Option<String>,
    #[clap(long = "exclude", help = "Skip paths matching this pattern (repeatable)")]
    pub exclude_patterns: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrderArg {
    Asc,
    Desc,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Search artifacts matching a pattern", display_order = 1)]
    Search {
        pattern: String,
        #[clap(flatten)]
        select: RemoteSelection,
        #[clap(long = "include-dirs", help = "Include folders in the results")]
        include_dirs: bool,
        #[clap(long = "sort-by", help = "Sort by this field (repeatable)")]
        sort_by: Vec<String>,
        #[clap(long = "sort-order", value_enum, default_value = "asc")]
        sort_order: SortOrderArg,
        #[clap(long, default_value_t = 0)]
        offset: usize,
        #[clap(long, default_value_t = 0, help = "Maximum number of results (0 = all)")]
        limit: usize,
        #[clap(long, help = "Print a table instead of JSON")]
        table: bool,
    },
    #[clap(about = "Upload local files", visible_alias = "u", display_order = 2)]
    Upload {
        #[clap(help = "Local path or pattern, e.g. \"build/*.jar\"")]
        source: String,
        #[clap(help = "Target path in the repository, e.g. \"libs-local/app/\"")]
        target: String,
        #[clap(long, default_value_t = true, action = ArgAction::Set)]
        recursive: bool,
        #[clap(long, default_value_t = true, action = ArgAction::Set, help = "Drop the local directory layout")]
        flat: bool,
        #[clap(long, help = "Treat the source as a regular expression")]
        regexp: bool,
        #[clap(long, help = "Properties attached to uploaded artifacts")]
        props: Option<String>,
        #[clap(long, help = "Debian distribution/component/architecture")]
        deb: Option<String>,
        #[clap(long = "exclude")]
        exclude_patterns: Vec<String>,
        #[clap(long = "min-checksum-deploy-kb")]
        min_checksum_deploy_kb: Option<u64>,
        #[clap(long = "dry-run")]
        dry_run: bool,
    },
    #[clap(about = "Download artifacts", visible_alias = "dl", display_order = 3)]
    Download {
        pattern: String,
        #[clap(default_value = "", help = "Local target; a trailing / names a directory")]
        target: String,
        #[clap(flatten)]
        select: RemoteSelection,
        #[clap(long)]
        flat: bool,
        #[clap(long = "include-dirs", help = "Create matched folders locally")]
        include_dirs: bool,
        #[clap(long = "split-count")]
        split_count: Option<usize>,
        #[clap(long = "min-split-kb", allow_hyphen_values = true)]
        min_split_kb: Option<i64>,
        #[clap(long = "dry-run")]
        dry_run: bool,
    },
    #[clap(about = "Move artifacts inside the repository service", visible_alias = "mv", display_order = 4)]
    Move(MoveCopyArgs),
    #[clap(about = "Copy artifacts inside the repository service", visible_alias = "cp", display_order = 5)]
    Copy(MoveCopyArgs),
    #[clap(about = "Delete artifacts", visible_alias = "del", display_order = 6)]
    Delete {
        pattern: String,
        #[clap(flatten)]
        select: RemoteSelection,
        #[clap(short, long, help = "Do not ask for confirmation")]
        quiet: bool,
        #[clap(long = "dry-run")]
        dry_run: bool,
    },
    #[clap(about = "Save the global options as defaults", name = "set", display_order = 7)]
    Set {},
}

#[derive(Args, Debug)]
pub struct MoveCopyArgs {
    pub source: String,
    #[clap(help = "Destination; {1}.. take capture groups from the source")]
    pub target: String,
    #[clap(flatten)]
    pub select: RemoteSelection,
    #[clap(long)]
    pub flat: bool,
    #[clap(long = "dry-run")]
    pub dry_run: bool,
}
