use super::wildcard::wildcard_match;

/// One (directory, filename) decomposition of a pattern.
///
/// The store indexes an item's directory and file name separately, so a
/// wildcard that may span directory levels is expressed as several pairs
/// OR-ed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilePair {
    pub path: String,
    pub name: String,
}

impl PathFilePair {
    pub fn new(path: &str, name: &str) -> Self {
        Self { path: path.to_string(), name: name.to_string() }
    }

    /// Evaluate this pair the way the store evaluates `$match` clauses.
    pub fn matches(&self, item_path: &str, item_name: &str) -> bool {
        wildcard_match(&self.path, item_path) && wildcard_match(&self.name, item_name)
    }
}

/// Decompose the repository-relative part of a prepared pattern into pairs.
///
/// Every item the pattern matches is matched by at least one pair. With
/// `recursive == false` only the literal split at the last `/` is emitted.
pub fn create_path_file_pairs(pattern: &str, recursive: bool) -> Vec<PathFilePair> {
    let default_path = if recursive { "*" } else { "." };
    if pattern == "*" {
        return vec![PathFilePair::new(default_path, "*")];
    }

    let mut pairs = Vec::new();
    let (mut path, name) = match pattern.rfind('/') {
        Some(idx) => {
            let (p, n) = (&pattern[..idx], &pattern[idx + 1..]);
            pairs.push(PathFilePair::new(p, n));
            (p.to_string(), n)
        }
        None => {
            pairs.push(PathFilePair::new(".", pattern));
            (String::new(), pattern)
        }
    };
    if !recursive {
        return pairs;
    }
    if name == "*" {
        path.push_str("/*");
        pairs.push(PathFilePair::new(&path, "*"));
        return pairs;
    }

    // For a name `s0*s1*...*sn`, split point i moves `s0*..*si*` into the
    // directory clause and leaves `*s(i+1)*..*sn` as the file name.
    let sections: Vec<&str> = name.split('*').collect();
    if !path.is_empty() && !path.ends_with('/') {
        path.push('/');
    }
    for i in 0..sections.len().saturating_sub(1) {
        let dir_part = format!("{}*", sections[..=i].join("*"));
        let mut file_part = format!("*{}", sections[i + 1..].join("*"));
        if file_part == "*" || file_part.is_empty() {
            file_part = "*".to_string();
        }
        pairs.push(PathFilePair::new(&format!("{}{}", path, dir_part), &file_part));
    }
    pairs
}
