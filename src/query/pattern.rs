use anyhow::Result;

use crate::TransferError;
use crate::parse::{Properties, parse_properties};

/// Flags that accompany a pattern on the command line.
#[derive(Debug, Clone, Default)]
pub struct PatternOptions {
    pub recursive: bool,
    pub is_regex: bool,
    pub flat: bool,
    pub include_dirs: bool,
    pub props: Option<String>,
    pub exclude_patterns: Vec<String>,
}

/// A remote path pattern: `repo/path/with/*wildcards*`.
///
/// The repository is always the first `/`-separated token. A pattern without
/// any `/` names a whole repository and is normalized to `pattern + "/"`.
/// Built once per invocation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    repository: String,
    path: String,
    is_regex: bool,
    recursive: bool,
    flat: bool,
    include_dirs: bool,
    props: Properties,
    exclude_patterns: Vec<String>,
}

impl PathPattern {
    pub fn parse(pattern: &str, opts: &PatternOptions) -> Result<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(TransferError::PatternSyntax("empty pattern".to_string()).into());
        }
        let mut normalized = trimmed.to_string();
        if !normalized.contains('/') {
            normalized.push('/');
        }
        let (repository, path) = match crate::parse::split_repo_path(&normalized) {
            Some((r, p)) => (r.to_string(), p.to_string()),
            None => {
                return Err(TransferError::PatternSyntax(format!(
                    "pattern '{}' does not start with a repository",
                    pattern
                ))
                .into());
            }
        };
        let props = match &opts.props {
            Some(s) => parse_properties(s)?,
            None => Properties::default(),
        };
        Ok(Self {
            pattern: normalized,
            repository,
            path,
            is_regex: opts.is_regex,
            recursive: opts.recursive,
            flat: opts.flat,
            include_dirs: opts.include_dirs,
            props,
            exclude_patterns: opts.exclude_patterns.clone(),
        })
    }

    /// A copy of this pattern with directories included in search results.
    pub fn with_dirs(&self) -> Self {
        Self { include_dirs: true, ..self.clone() }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_regex(&self) -> bool {
        self.is_regex
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn flat(&self) -> bool {
        self.flat
    }

    pub fn include_dirs(&self) -> bool {
        self.include_dirs
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }

    /// Whether this pattern names more than one literal artifact.
    pub fn is_wildcard(&self) -> bool {
        is_wildcard_pattern(&self.pattern)
    }
}

/// A pattern is a wildcard when it contains `*`, ends with `/` (whole
/// directory) or names only a repository.
pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains('*') || pattern.ends_with('/') || !pattern.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_first_token() {
        let p = PathPattern::parse("libs-release/org/acme/*.jar", &PatternOptions::default())
            .unwrap();
        assert_eq!(p.repository(), "libs-release");
        assert_eq!(p.path(), "org/acme/*.jar");
        assert!(p.is_wildcard());
    }

    #[test]
    fn bare_repository_is_normalized() {
        let p = PathPattern::parse("repo-local", &PatternOptions::default()).unwrap();
        assert_eq!(p.as_str(), "repo-local/");
        assert_eq!(p.repository(), "repo-local");
        assert_eq!(p.path(), "");
        assert!(p.is_wildcard());
    }

    #[test]
    fn literal_path_is_not_wildcard() {
        let p = PathPattern::parse("repo/a/b.txt", &PatternOptions::default()).unwrap();
        assert!(!p.is_wildcard());
    }

    #[test]
    fn rejects_missing_repository_and_bad_props() {
        assert!(PathPattern::parse("", &PatternOptions::default()).is_err());
        assert!(PathPattern::parse("/a/b", &PatternOptions::default()).is_err());
        let opts = PatternOptions { props: Some("nokey".into()), ..Default::default() };
        let err = PathPattern::parse("repo/a", &opts).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransferError>(),
            Some(TransferError::PatternSyntax(_))
        ));
    }
}
