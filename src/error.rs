/// Repository-wide structured errors for search and transfer operations.
///
/// Operations return `anyhow::Result`; callers that care about the class of
/// a failure recover it with `downcast_ref::<TransferError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Malformed path pattern or property string.
    PatternSyntax(String),
    /// Invalid option value (e.g. a debian triplet without three tokens).
    Config(String),
    /// Local root of an upload pattern does not exist.
    PathNotFound(String),
    /// Search request answered with a non-2xx status; carries status and body.
    QueryExecution(u16, String),
    /// One item failed; counted, never fatal for siblings.
    PerItem(String, String),
    /// Producer tried to add a task after the runner was cancelled.
    RunnerStopped,
    /// Transport-level failure (connection, I/O while streaming).
    Http(String),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TransferError::*;
        match self {
            PatternSyntax(s) => write!(f, "invalid pattern syntax: {}", s),
            Config(s) => write!(f, "invalid configuration: {}", s),
            PathNotFound(p) => write!(f, "path does not exist: {}", p),
            QueryExecution(status, body) => {
                write!(f, "search query failed with status {}:\n{}", status, body)
            }
            PerItem(path, msg) => write!(f, "transfer failed for {}: {}", path, msg),
            RunnerStopped => write!(f, "runner stopped"),
            Http(s) => write!(f, "http transport error: {}", s),
        }
    }
}

impl std::error::Error for TransferError {}

impl TransferError {
    /// Whether this error aborts the whole invocation rather than a single item.
    /// Fatal errors are raised before or instead of per-item work.
    pub fn is_fatal(&self) -> bool {
        use TransferError::*;
        match self {
            PatternSyntax(_) | Config(_) | PathNotFound(_) | QueryExecution(_, _) => true,
            PerItem(_, _) | RunnerStopped | Http(_) => false,
        }
    }

    /// Stable variant name used in the JSON-lines failure log.
    pub fn variant(&self) -> &'static str {
        use TransferError::*;
        match self {
            PatternSyntax(_) => "PatternSyntax",
            Config(_) => "Config",
            PathNotFound(_) => "PathNotFound",
            QueryExecution(_, _) => "QueryExecution",
            PerItem(_, _) => "PerItem",
            RunnerStopped => "RunnerStopped",
            Http(_) => "Http",
        }
    }
}

/// Three-way process exit status reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    TotalFailure,
    PartialFailure,
}

impl ExitStatus {
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => ExitStatus::Success,
            (0, _) => ExitStatus::TotalFailure,
            _ => ExitStatus::PartialFailure,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::TotalFailure => 1,
            ExitStatus::PartialFailure => 2,
        }
    }
}
