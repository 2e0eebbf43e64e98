//! Row layout shared by the index file and the describe output.
//!
//! Both formats carry 13 `|`-separated fields, but they disagree on where the
//! dependency and `www` columns live:
//!
//! ```text
//! index:    name-version|portdir|local_prefix|comment|descr_file|maintainer|categories|build_depends|run_deps|www|extract_deps|patch_deps|fetch_deps
//! describe: name-version|portdir|local_prefix|comment|descr_file|maintainer|categories|extract_deps|patch_deps|fetch_deps|build_depends|run_deps|www
//! ```
//!
//! Code that moves a value between the two layouts must go through the named
//! positions below, never through a shared numeric index past `6`.

use std::path::{Component, Path};

pub const FIELD_SEPARATOR: &str = "|";
pub const FIELD_COUNT: usize = 13;
pub const DEPENDENCY_SEPARATOR: &str = " ";

/// Positions in the index file layout.
pub mod index_field {
    pub const NAME_VERSION: usize = 0;
    pub const PORTDIR: usize = 1;
    pub const LOCAL_PREFIX: usize = 2;
    pub const COMMENT: usize = 3;
    pub const DESCR_FILE: usize = 4;
    pub const MAINTAINER: usize = 5;
    pub const CATEGORIES: usize = 6;
    pub const BUILD_DEPENDS: usize = 7;
    pub const RUN_DEPENDS: usize = 8;
    pub const WWW: usize = 9;
    pub const EXTRACT_DEPENDS: usize = 10;
    pub const PATCH_DEPENDS: usize = 11;
    pub const FETCH_DEPENDS: usize = 12;

    pub const DEPENDENCIES: [usize; 5] = [
        BUILD_DEPENDS,
        RUN_DEPENDS,
        EXTRACT_DEPENDS,
        PATCH_DEPENDS,
        FETCH_DEPENDS,
    ];
}

/// Positions in the describe command output layout.
pub mod describe_field {
    pub const NAME_VERSION: usize = 0;
    pub const PORTDIR: usize = 1;
    pub const LOCAL_PREFIX: usize = 2;
    pub const COMMENT: usize = 3;
    pub const DESCR_FILE: usize = 4;
    pub const MAINTAINER: usize = 5;
    pub const CATEGORIES: usize = 6;
    pub const EXTRACT_DEPENDS: usize = 7;
    pub const PATCH_DEPENDS: usize = 8;
    pub const FETCH_DEPENDS: usize = 9;
    pub const BUILD_DEPENDS: usize = 10;
    pub const RUN_DEPENDS: usize = 11;
    pub const WWW: usize = 12;
}

/// Split one record into exactly [`FIELD_COUNT`] fields.
///
/// Returns the number of fields found when the line is too short. Fields past
/// the thirteenth are dropped.
pub fn split_record(line: &str) -> std::result::Result<Vec<String>, usize> {
    let mut fields: Vec<String> = line.split(FIELD_SEPARATOR).map(str::to_string).collect();
    if fields.len() < FIELD_COUNT {
        return Err(fields.len());
    }
    fields.truncate(FIELD_COUNT);
    Ok(fields)
}

pub fn join_record(fields: &[String]) -> String {
    fields.join(FIELD_SEPARATOR)
}

/// Name-version with the version removed: everything through the last `-`.
pub fn strip_version(name_version: &str) -> &str {
    match name_version.rfind('-') {
        Some(pos) => &name_version[..=pos],
        None => name_version,
    }
}

/// Replace the first occurrence of `search` only. An empty `search` matches at
/// the start of `source`.
pub fn replace_first(source: &str, search: &str, replacement: &str) -> String {
    match source.find(search) {
        Some(pos) => {
            let mut out = String::with_capacity(source.len() + replacement.len());
            out.push_str(&source[..pos]);
            out.push_str(replacement);
            out.push_str(&source[pos + search.len()..]);
            out
        }
        None => source.to_string(),
    }
}

/// `category/name` key of a port directory: its last two path components.
pub fn origin_key(path: impl AsRef<Path>) -> String {
    let names: Vec<_> = path
        .as_ref()
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect();
    let start = names.len().saturating_sub(2);
    names[start..].join("/")
}
