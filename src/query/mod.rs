// query module: path patterns and their compilation into remote queries or local regexes
mod builder;
mod pairs;
mod pattern;
pub mod wildcard;

pub use builder::{QueryModifiers, SortOrder, build_query, build_query_body, prepare_search_pattern};
pub use pairs::{PathFilePair, create_path_file_pairs};
pub use pattern::{PathPattern, PatternOptions, is_wildcard_pattern};
