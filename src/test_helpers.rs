//! Shared test utilities for the scudder test suite.
//!
//! Galleries are built on the fly in temp directories instead of being
//! copied from fixtures, so each test spells out exactly the tree it needs.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = gallery(&["a/1.png", "a/2.png", "b/3.jpg"]);
//! let (_cache_dir, cache) = cache_for(&tmp);
//! let id = DirectoryId::from_relative("");
//! assert!(cache.ensure_index(&id, "", false));
//! assert_eq!(index_lines(&cache, &id), ["/a/1.png", "/a/2.png", "/b/3.jpg"]);
//! ```

use std::fs;
use tempfile::TempDir;

use crate::cache::IndexCache;
use crate::types::DirectoryId;

// =========================================================================
// Fixture setup
// =========================================================================

/// Create a gallery containing `files` (relative, `/`-separated).
///
/// Parent directories are created as needed. A path ending in `/` creates
/// an empty directory. File contents are the file's own relative path, so
/// byte-serving tests can tell files apart.
pub fn gallery(files: &[&str]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for file in files {
        let path = tmp.path().join(file);
        if file.ends_with('/') {
            fs::create_dir_all(&path).unwrap();
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, file.as_bytes()).unwrap();
    }
    tmp
}

/// An [`IndexCache`] over `gallery` with its own throwaway cache root.
///
/// Keep the returned `TempDir` alive for as long as the cache is used.
pub fn cache_for(gallery: &TempDir) -> (TempDir, IndexCache) {
    let cache_dir = TempDir::new().unwrap();
    let cache = IndexCache::new(gallery.path(), cache_dir.path());
    (cache_dir, cache)
}

/// Build (or reuse) the index for `relative` and return its id.
pub fn indexed(cache: &IndexCache, relative: &str) -> DirectoryId {
    let id = DirectoryId::from_relative(relative);
    assert!(
        cache.ensure_index(&id, relative, false),
        "indexing '{relative}' failed"
    );
    id
}

// =========================================================================
// Cache inspection
// =========================================================================

/// Raw lines of the on-disk index file for `id`.
pub fn index_lines(cache: &IndexCache, id: &DirectoryId) -> Vec<String> {
    fs::read_to_string(cache.index_path(id))
        .unwrap_or_else(|e| panic!("index for '{id}' unreadable: {e}"))
        .lines()
        .map(str::to_string)
        .collect()
}
