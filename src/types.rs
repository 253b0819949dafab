//! Shared value types passed between the cache, the navigation resolver
//! and the dispatcher.

use std::fmt;

/// Prefix every cache key starts with.
const ID_PREFIX: &str = "id-";

/// Character that stands in for a path separator inside a [`DirectoryId`].
pub const ID_SEPARATOR: char = '-';

/// Filesystem-safe cache key derived from a directory path relative to the
/// gallery root.
///
/// `Travel/Japan` becomes `id-Travel-Japan`; the gallery root itself is `id-`.
/// Two paths whose segments already contain `-` can collide (`a-b` and `a/b`
/// both map to `id-a-b`). Nothing reverse-maps an id, so a collision only
/// means the two directories share one cache record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectoryId(String);

impl DirectoryId {
    pub fn from_relative(relative: &str) -> Self {
        let normalized = normalize_relative(relative);
        let mut key = String::with_capacity(ID_PREFIX.len() + normalized.len());
        key.push_str(ID_PREFIX);
        key.extend(
            normalized
                .chars()
                .map(|c| if c == '/' { ID_SEPARATOR } else { c }),
        );
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a `/`-separated relative path.
///
/// Empty, `.` and `..` segments are dropped, so the result never starts or
/// ends with a separator and can never climb out of the directory it is
/// joined onto. Only the platform's path separators split segments: on Unix
/// `a\b` is one name, on Windows it is two.
///
/// - `/Travel//Japan/` → `Travel/Japan`
/// - `../etc` → `etc`
/// - `/` → ``
pub fn normalize_relative(path: &str) -> String {
    path.split(std::path::is_separator)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Where a page sits in an index and which directory boundaries surround it.
///
/// Page numbers are 1-based; `0` in either boundary means "no such
/// directory". An out-of-range page produces `path == None` with both
/// boundaries at `0`; this is a normal result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Navigation {
    /// Index line for the page (`/dir/image.png`), if the page exists.
    pub path: Option<String>,
    /// First page of the directory segment before the page's segment.
    pub previous_dir: usize,
    /// First page of the directory segment after the page's segment.
    pub next_dir: usize,
    /// Number of pages in the index the page was resolved against.
    pub tally: usize,
}
