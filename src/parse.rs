use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// One `key=value` property. Keys may repeat (multimap semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Ordered property list parsed from `k1=v1;k2=v2,v3`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub items: Vec<Property>,
}

impl Properties {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, key: &str, value: &str) {
        self.items.push(Property { key: key.to_string(), value: value.to_string() });
    }

    pub fn extend(&mut self, other: Properties) {
        self.items.extend(other.items);
    }

    /// Matrix-parameter form (`k=v;k2=a,b`), each key and value URL-encoded.
    /// Commas separating multiple values are kept literal.
    pub fn to_encoded_string(&self) -> String {
        self.items
            .iter()
            .map(|p| {
                let values: Vec<String> = p.value.split(',').map(encode_component).collect();
                format!("{}={}", encode_component(&p.key), values.join(","))
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Split `input` on `sep`, honouring `\` as an escape for the separator.
pub fn split_with_escape(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            if c != sep && c != '\\' {
                current.push('\\');
            }
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}

/// Parse a property filter string such as `build=12;os=linux,mac`.
/// Empty input yields no properties; a segment without `=` or with an empty
/// key is a `PatternSyntax` error.
pub fn parse_properties(input: &str) -> Result<Properties> {
    let mut props = Properties::default();
    if input.trim().is_empty() {
        return Ok(props);
    }
    for segment in split_with_escape(input, ';') {
        if segment.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = segment.split_once('=') else {
            return Err(TransferError::PatternSyntax(format!(
                "property '{}' must be in key=value form",
                segment
            ))
            .into());
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(
                TransferError::PatternSyntax(format!("property '{}' has an empty key", segment))
                    .into(),
            );
        }
        props.push(key, value.trim());
    }
    Ok(props)
}

/// Parse a `distribution/component/architecture` triplet into debian properties.
pub fn parse_debian(input: &str) -> Result<Properties> {
    let tokens: Vec<&str> = input.split('/').collect();
    if tokens.len() != 3 || tokens.iter().any(|t| t.trim().is_empty()) {
        return Err(TransferError::Config(format!(
            "deb value '{}' must be distribution/component/architecture",
            input
        ))
        .into());
    }
    let mut props = Properties::default();
    for (key, value) in ["deb.distribution", "deb.component", "deb.architecture"].iter().zip(tokens)
    {
        props.push(key, value.trim());
    }
    Ok(props)
}

/// Split `repo/some/path` into the repository and the remainder.
pub fn split_repo_path(input: &str) -> Option<(&str, &str)> {
    let (repo, rest) = input.split_once('/')?;
    if repo.is_empty() {
        return None;
    }
    Some((repo, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_properties() {
        let p = parse_properties("a=1;b=x,y; c = z ").unwrap();
        assert_eq!(p.items.len(), 3);
        assert_eq!(p.items[1], Property { key: "b".into(), value: "x,y".into() });
        assert_eq!(p.items[2], Property { key: "c".into(), value: "z".into() });
    }

    #[test]
    fn escaped_separator_stays_in_value() {
        let p = parse_properties("a=1\\;2;b=3").unwrap();
        assert_eq!(p.items[0].value, "1;2");
        assert_eq!(p.items[1].key, "b");
    }

    #[test]
    fn malformed_property_is_syntax_error() {
        let err = parse_properties("a=1;broken").unwrap_err();
        let te = err.downcast_ref::<TransferError>().expect("typed error");
        assert!(matches!(te, TransferError::PatternSyntax(_)));

        let err = parse_properties("=v").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransferError>(),
            Some(TransferError::PatternSyntax(_))
        ));
    }

    #[test]
    fn empty_value_is_allowed() {
        let p = parse_properties("flag=").unwrap();
        assert_eq!(p.items[0].value, "");
    }

    #[test]
    fn debian_triplet() {
        let p = parse_debian("bionic/main/amd64").unwrap();
        assert_eq!(p.to_encoded_string(), "deb.distribution=bionic;deb.component=main;deb.architecture=amd64");
        for bad in ["bionic/main", "a/b/c/d", "a//c", ""] {
            let err = parse_debian(bad).unwrap_err();
            assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::Config(_))));
        }
    }

    #[test]
    fn encoded_string_escapes_but_keeps_value_commas() {
        let p = parse_properties("k=a b,c&d").unwrap();
        assert_eq!(p.to_encoded_string(), "k=a+b,c%26d");
    }

    #[test]
    fn repo_path_split() {
        assert_eq!(split_repo_path("repo/a/b"), Some(("repo", "a/b")));
        assert_eq!(split_repo_path("repo/"), Some(("repo", "")));
        assert_eq!(split_repo_path("repo"), None);
        assert_eq!(split_repo_path("/a"), None);
    }
}
