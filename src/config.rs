use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::TransferError;

pub const ENV_PREFIX: &str = "ARTPILOT_";

/// Persisted defaults, stored as pretty JSON at `~/.artpilot/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub threads: usize,
    pub split_count: usize,
    /// Files smaller than this (KiB) are downloaded in one stream. Negative disables splitting.
    pub min_split_kb: i64,
    pub min_checksum_deploy_kb: u64,
    pub retries: usize,
    /// Base wait between HTTP attempts; the n-th retry waits n times this.
    pub retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            password: None,
            access_token: None,
            threads: 3,
            split_count: 3,
            min_split_kb: 5120,
            min_checksum_deploy_kb: 10,
            retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

/// Values given explicitly on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub threads: Option<usize>,
    pub retries: Option<usize>,
}

/// Resolved connection details for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetails {
    /// Base URL, always ending with `/`.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub retries: usize,
    pub retry_backoff: Duration,
}

impl ServerDetails {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: normalize_base_url(url)?,
            user: None,
            password: None,
            access_token: None,
            retries: 1,
            retry_backoff: Duration::ZERO,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    url::Url::parse(trimmed)
        .map_err(|e| TransferError::Config(format!("invalid url '{}': {}", trimmed, e)))?;
    let mut s = trimmed.to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    Ok(s)
}

pub(crate) trait StorageObject {
    fn pretty_json(&self) -> Result<String>;
    fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()>;
    fn read_from<T: Default + DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T>;
}

impl<T: Serialize> StorageObject for T {
    fn pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, self.pretty_json()?)
            .with_context(|| format!("writing {}", path.display()))
    }

    fn read_from<R: Default + DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<R> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(R::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str::<R>(&raw)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)).into())
    }
}

impl Config {
    /// `~/.artpilot`, home of the config file and the log directory.
    pub fn storage_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".".to_owned() + env!("CARGO_PKG_NAME")))
            .ok_or_else(|| TransferError::Config("cannot find user's home dir".into()).into())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::storage_dir()?.join("config.json"))
    }

    /// Read the config file; a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        Self::read_from(&path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.save_to(path)
    }

    /// Layer `ARTPILOT_*` variables over the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|k| std::env::var(k).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        if let Some(v) = get("URL") {
            self.url = Some(v);
        }
        if let Some(v) = get("USER") {
            self.user = Some(v);
        }
        if let Some(v) = get("PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = get("ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = get("THREADS") {
            self.threads = parse_number("THREADS", &v)?;
        }
        if let Some(v) = get("SPLIT_COUNT") {
            self.split_count = parse_number("SPLIT_COUNT", &v)?;
        }
        if let Some(v) = get("MIN_SPLIT_KB") {
            self.min_split_kb = parse_number("MIN_SPLIT_KB", &v)?;
        }
        if let Some(v) = get("MIN_CHECKSUM_DEPLOY_KB") {
            self.min_checksum_deploy_kb = parse_number("MIN_CHECKSUM_DEPLOY_KB", &v)?;
        }
        if let Some(v) = get("RETRIES") {
            self.retries = parse_number("RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parse_number("RETRY_BACKOFF_MS", &v)?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(v) = &o.url {
            self.url = Some(v.clone());
        }
        if let Some(v) = &o.user {
            self.user = Some(v.clone());
        }
        if let Some(v) = &o.password {
            self.password = Some(v.clone());
        }
        if let Some(v) = &o.access_token {
            self.access_token = Some(v.clone());
        }
        if let Some(v) = o.threads {
            self.threads = v;
        }
        if let Some(v) = o.retries {
            self.retries = v;
        }
    }

    /// Resolve connection details; a URL is mandatory.
    pub fn server_details(&self) -> Result<ServerDetails> {
        let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Err(TransferError::Config(
                "no server url configured (use --url or ARTPILOT_URL)".into(),
            )
            .into());
        };
        Ok(ServerDetails {
            url: normalize_base_url(url)?,
            user: self.user.clone(),
            password: self.password.clone(),
            access_token: self.access_token.clone(),
            retries: self.retries.max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        TransferError::Config(format!("{}{} must be a number, got '{}'", ENV_PREFIX, name, raw))
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(Some(&dir.path().join("none.json"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.threads, 3);
        assert_eq!(cfg.min_checksum_deploy_kb, 10);
    }

    #[test]
    fn save_and_reload_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"url":"http://h/artifactory","threads":8}"#).unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.threads, 8);
        assert_eq!(cfg.split_count, 3);

        let out = dir.path().join("out.json");
        cfg.save(&out).unwrap();
        assert_eq!(Config::load(Some(&out)).unwrap(), cfg);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::Config(_))));
    }

    #[test]
    fn precedence_flag_over_env_over_file() {
        let mut cfg = Config { url: Some("http://file/".into()), threads: 4, ..Default::default() };
        let env: HashMap<&str, &str> =
            [("ARTPILOT_URL", "http://env"), ("ARTPILOT_THREADS", "6")].into_iter().collect();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.threads, 6);
        assert_eq!(cfg.url.as_deref(), Some("http://env"));

        cfg.apply_overrides(&Overrides { threads: Some(10), ..Default::default() });
        assert_eq!(cfg.threads, 10);
        let details = cfg.server_details().unwrap();
        assert_eq!(details.url, "http://env/");
        assert_eq!(details.retry_backoff, Duration::from_millis(200));
    }

    #[test]
    fn env_covers_checksum_threshold_and_backoff() {
        let mut cfg = Config { url: Some("http://h/".into()), ..Default::default() };
        let env: HashMap<&str, &str> = [
            ("ARTPILOT_MIN_CHECKSUM_DEPLOY_KB", "64"),
            ("ARTPILOT_RETRY_BACKOFF_MS", "0"),
            ("ARTPILOT_MIN_SPLIT_KB", "-1"),
        ]
        .into_iter()
        .collect();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.min_checksum_deploy_kb, 64);
        assert_eq!(cfg.min_split_kb, -1);
        assert_eq!(cfg.server_details().unwrap().retry_backoff, Duration::ZERO);

        let err = cfg
            .apply_env_from(|k| (k == "ARTPILOT_MIN_CHECKSUM_DEPLOY_KB").then(|| "-5".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("ARTPILOT_MIN_CHECKSUM_DEPLOY_KB"));
    }

    #[test]
    fn bad_env_number_and_missing_url() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_from(|k| (k == "ARTPILOT_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("ARTPILOT_RETRIES"));
        assert!(cfg.server_details().is_err());
        cfg.url = Some("not a url".into());
        assert!(cfg.server_details().is_err());
    }
}
