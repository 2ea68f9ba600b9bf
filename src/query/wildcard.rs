//! Wildcard helpers shared by the remote and local sides of a transfer.
//!
//! Remote patterns are matched by the store itself; the local side turns the
//! same wildcard syntax into an anchored regex and substitutes capture groups
//! into destination templates.

use regex::Regex;

/// Recursive `*`/`?` matcher. `*` also matches `/`, like the store's `$match`.
pub fn wildcard_match(pat: &str, text: &str) -> bool {
    let p: Vec<char> = pat.chars().collect();
    let t: Vec<char> = text.chars().collect();
    fn helper(p: &[char], t: &[char]) -> bool {
        if p.is_empty() {
            return t.is_empty();
        }
        if p[0] == '*' {
            // collapse runs of '*' so "**" does not explode the search
            let rest = {
                let mut i = 0;
                while i < p.len() && p[i] == '*' {
                    i += 1;
                }
                &p[i..]
            };
            if rest.is_empty() {
                return true;
            }
            (0..=t.len()).any(|skip| helper(rest, &t[skip..]))
        } else if !t.is_empty() && (p[0] == '?' || p[0] == t[0]) {
            helper(&p[1..], &t[1..])
        } else {
            false
        }
    }
    helper(&p, &t)
}

const ESCAPED: &[char] = &['.', '^', '$', '+', '?', '[', ']', '{', '}', '|'];

/// Convert a wildcard path into an anchored regex. `(` and `)` are kept so
/// callers can mark capture groups for `{n}` placeholders. `?` stays a
/// literal character, as it is in local file names.
pub fn path_to_regexp(path: &str) -> String {
    wildcard_regexp(path, false)
}

/// Like [`path_to_regexp`] for remote patterns, where `?` matches exactly
/// one character just as it does in the store's `$match`.
pub fn remote_path_to_regexp(path: &str) -> String {
    wildcard_regexp(path, true)
}

fn wildcard_regexp(path: &str, single_char_wildcard: bool) -> String {
    let mut out = String::with_capacity(path.len() + 8);
    out.push('^');
    for c in path.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' if single_char_wildcard => out.push('.'),
            c => {
                if ESCAPED.contains(&c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    if path.ends_with('/') || path.ends_with('\\') {
        out.push_str(".*");
    }
    out.push('$');
    out
}

/// Produce the regex a local walk is matched against.
pub fn prepare_local_pattern(path: &str, is_regex: bool) -> String {
    if path == "./" || path == ".\\" {
        return "^.*$".to_string();
    }
    let stripped = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix(".\\"))
        .unwrap_or(path);
    if is_regex { stripped.to_string() } else { path_to_regexp(stripped) }
}

/// Longest leading directory of `path` that contains no pattern syntax.
/// Sections with `*` (or `(` in regex mode) end the root; `~` expands to
/// the home directory; an empty result means the current directory.
pub fn root_path(path: &str, is_regex: bool) -> String {
    let mut sep = '/';
    let mut sections: Vec<&str> = path.split(sep).collect();
    if sections.len() == 1 {
        sep = '\\';
        sections = path.split(sep).collect();
    }
    let meta = if is_regex { '(' } else { '*' };

    let mut root = String::new();
    for section in &sections {
        if section.is_empty() {
            continue;
        }
        if section.contains(meta) {
            break;
        }
        if !root.is_empty() {
            root.push(sep);
        }
        if *section == "~" {
            root.push_str(&home_dir_string());
        } else {
            root.push_str(section);
        }
    }
    if sections.first().is_some_and(|s| s.is_empty()) {
        root.insert(0, sep);
    }
    if root.is_empty() { ".".to_string() } else { root }
}

/// Replace `{i}` in `template` with capture group `i` of `re` matched
/// against `text`. A non-matching text leaves the template unchanged.
pub fn apply_placeholders(re: &Regex, text: &str, template: &str) -> String {
    let Some(caps) = re.captures(text) else {
        return template.to_string();
    };
    let mut out = template.to_string();
    for i in 1..caps.len() {
        let group = caps.get(i).map(|m| m.as_str()).unwrap_or("").replace('\\', "/");
        out = out.replace(&format!("{{{}}}", i), &group);
    }
    out
}

/// Canonical remote-relative form of a local path: forward slashes, no
/// doubled separators and no `./` or `../` segments.
pub fn trim_path(path: &str) -> String {
    path.replace('\\', "/").replace("//", "/").replace("../", "").replace("./", "")
}

/// Expand a leading `~` to the user's home directory.
pub fn replace_tilde(path: &str) -> String {
    if path.len() > 1 && path.starts_with('~') {
        return format!("{}{}", home_dir_string(), &path[1..]);
    }
    path.to_string()
}

fn home_dir_string() -> String {
    dirs::home_dir().map(|h| h.to_string_lossy().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_basics() {
        assert!(wildcard_match("*.txt", "a.txt"));
        assert!(wildcard_match("a*b*", "a/x/b/c"));
        assert!(wildcard_match("f?le", "file"));
        assert!(!wildcard_match("*.txt", "a.jar"));
        assert!(wildcard_match("**", ""));
        assert!(!wildcard_match("a", ""));
    }

    #[test]
    fn regexp_conversion() {
        assert_eq!(path_to_regexp("testdata/a*.txt"), "^testdata/a.*\\.txt$");
        assert_eq!(path_to_regexp("dir/"), "^dir/.*$");
        assert_eq!(path_to_regexp("(a)*+"), "^(a).*\\+$");
        assert_eq!(path_to_regexp("a?.txt"), "^a\\?\\.txt$");
        assert_eq!(remote_path_to_regexp("repo/v?/(*).jar"), "^repo/v./(.*)\\.jar$");
    }

    #[test]
    fn remote_question_mark_feeds_placeholders() {
        let re = Regex::new(&remote_path_to_regexp("repo/v?/(*).jar")).unwrap();
        assert_eq!(apply_placeholders(&re, "repo/v1/core.jar", "other/{1}-v1.jar"), "other/core-v1.jar");
        assert!(!re.is_match("repo/v10/core.jar"));
    }

    #[test]
    fn local_pattern_preparation() {
        assert_eq!(prepare_local_pattern("./", false), "^.*$");
        assert_eq!(prepare_local_pattern("./dir/*.bin", false), "^dir/.*\\.bin$");
        assert_eq!(prepare_local_pattern("./dir/(.*)\\.bin", true), "dir/(.*)\\.bin");
    }

    #[test]
    fn root_path_stops_at_wildcard_section() {
        assert_eq!(root_path("testdata/a*.txt", false), "testdata");
        assert_eq!(root_path("a/b/c*/d", false), "a/b");
        assert_eq!(root_path("/abs/dir/*", false), "/abs/dir");
        assert_eq!(root_path("*.txt", false), ".");
        assert_eq!(root_path("a/(.*)/x", true), "a");
        assert_eq!(root_path("a/b*/x", true), "a/b*/x");
        assert_eq!(root_path("a\\b\\*.txt", false), "a\\b");
    }

    #[test]
    fn placeholders_from_capture_groups() {
        let re = Regex::new(&path_to_regexp("build/(*)/(*).jar")).unwrap();
        assert_eq!(
            apply_placeholders(&re, "build/lib/core.jar", "repo/{1}/v/{2}.jar"),
            "repo/lib/v/core.jar"
        );
        assert_eq!(apply_placeholders(&re, "other/x", "repo/{1}/"), "repo/{1}/");
    }

    #[test]
    fn trim_path_canonicalizes() {
        assert_eq!(trim_path("./a\\b//c"), "a/b/c");
        assert_eq!(trim_path("../../x/y"), "x/y");
    }

    #[test]
    fn tilde_expansion_keeps_plain_paths() {
        assert_eq!(replace_tilde("/tmp/x"), "/tmp/x");
        assert_eq!(replace_tilde("~"), "~");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(replace_tilde("~/x"), format!("{}/x", home.to_string_lossy()));
        }
    }
}
