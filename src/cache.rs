//! Index cache for directory navigation.
//!
//! Walking a deep gallery is the slow part of serving a page, so the
//! flattened image list produced by [`index::enumerate`](crate::index::enumerate)
//! is written to disk once per directory and reused by every later request,
//! including requests after a server restart.
//!
//! # Design
//!
//! ## Cache keys
//!
//! Records are keyed by [`DirectoryId`], derived from the requested path
//! relative to the gallery root. Nothing tracks modification times: a record
//! lives until it is rebuilt by an explicit refresh or removed from outside
//! (e.g. a reboot clearing a tmpfs cache root).
//!
//! ## Storage
//!
//! ```text
//! <cache_dir>/
//! ├── indices/
//! │   └── id-Travel-Japan     # one "/relative/path.png" per line
//! └── tallies/
//!     └── id-Travel-Japan     # line count, e.g. "42\n"
//! ```
//!
//! Both files are plain text so a record can be inspected with `cat`. A
//! record is valid when both files exist. Lookups scan the index file
//! forward; no offset table is kept.
//!
//! ## Concurrency
//!
//! Every id gets a build slot: a reader/writer lock around a generation
//! counter. Building holds the write side; [`IndexCache::with_reader`] holds
//! the read side, so within one process no reader sees a half-written
//! record. A caller that had to wait for someone else's build reuses it
//! instead of walking the tree again, even when both asked for a refresh.
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! second process sharing the cache root sees either the old or the new
//! file, never a torn one.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::index;
use crate::types::{DirectoryId, normalize_relative};

const INDEX_DIR: &str = "indices";
const TALLY_DIR: &str = "tallies";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Directory not found: {0}")]
    MissingDirectory(PathBuf),
}

/// What [`IndexCache::try_ensure_index`] did to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// An existing record was kept.
    Reused,
    /// The directory was walked and the record (re)written.
    Built { tally: usize },
}

/// Per-id build slot. The value is the number of completed builds.
#[derive(Debug, Default)]
struct BuildSlot {
    generation: RwLock<u64>,
}

/// On-disk index records for one gallery root.
#[derive(Debug)]
pub struct IndexCache {
    root: PathBuf,
    cache_dir: PathBuf,
    slots: Mutex<HashMap<DirectoryId, Arc<BuildSlot>>>,
}

impl IndexCache {
    pub fn new(root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: cache_dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn index_path(&self, id: &DirectoryId) -> PathBuf {
        self.cache_dir.join(INDEX_DIR).join(id.as_str())
    }

    pub fn tally_path(&self, id: &DirectoryId) -> PathBuf {
        self.cache_dir.join(TALLY_DIR).join(id.as_str())
    }

    /// Make sure a record for `id` exists, building it from `subdirectory`
    /// if it is missing or `force_refresh` is set.
    ///
    /// Returns whether the record is usable. Failures (missing directory,
    /// unwritable cache) are logged and reported as `false`.
    pub fn ensure_index(&self, id: &DirectoryId, subdirectory: &str, force_refresh: bool) -> bool {
        match self.try_ensure_index(id, subdirectory, force_refresh) {
            Ok(_) => true,
            Err(CacheError::MissingDirectory(dir)) => {
                debug!(id = %id, dir = %dir.display(), "not indexing missing directory");
                false
            }
            Err(e) => {
                warn!(id = %id, error = %e, "failed to write index");
                false
            }
        }
    }

    /// Like [`ensure_index`](Self::ensure_index), but reports what happened.
    pub fn try_ensure_index(
        &self,
        id: &DirectoryId,
        subdirectory: &str,
        force_refresh: bool,
    ) -> Result<BuildOutcome, CacheError> {
        let target = self.root.join(normalize_relative(subdirectory));
        if !target.is_dir() {
            return Err(CacheError::MissingDirectory(target));
        }
        self.ensure_structure()?;

        let slot = self.slot(id);
        let seen = *slot
            .generation
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut generation = slot
            .generation
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if self.is_cached(id) && (!force_refresh || *generation != seen) {
            debug!(id = %id, "reusing index");
            return Ok(BuildOutcome::Reused);
        }

        let tally = self.build(id, subdirectory)?;
        *generation += 1;
        Ok(BuildOutcome::Built { tally })
    }

    /// Run `f` against the record for `id` while no build can replace it.
    pub fn with_reader<T>(&self, id: &DirectoryId, f: impl FnOnce(&IndexReader) -> T) -> T {
        let slot = self.slot(id);
        let _guard = slot
            .generation
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&IndexReader {
            index_path: self.index_path(id),
            tally_path: self.tally_path(id),
        })
    }

    /// Number of images indexed for `id`; 0 when nothing is cached.
    pub fn tally(&self, id: &DirectoryId) -> usize {
        self.with_reader(id, |reader| reader.tally())
    }

    /// Index line for 1-based `page`, or `None` when out of range.
    pub fn entry(&self, id: &DirectoryId, page: usize) -> Option<String> {
        self.with_reader(id, |reader| reader.entry(page))
    }

    fn is_cached(&self, id: &DirectoryId) -> bool {
        self.index_path(id).is_file() && self.tally_path(id).is_file()
    }

    fn ensure_structure(&self) -> io::Result<()> {
        fs::create_dir_all(self.cache_dir.join(INDEX_DIR))?;
        fs::create_dir_all(self.cache_dir.join(TALLY_DIR))
    }

    fn slot(&self, id: &DirectoryId) -> Arc<BuildSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.clone()).or_default())
    }

    /// Walk the directory and write both files. Caller holds the write lock.
    fn build(&self, id: &DirectoryId, subdirectory: &str) -> Result<usize, CacheError> {
        let started = Instant::now();
        let images = index::enumerate(&self.root, subdirectory);

        let mut body = String::new();
        let mut tally = 0usize;
        for image in &images {
            match index_line(image) {
                Some(line) => {
                    body.push_str(&line);
                    body.push('\n');
                    tally += 1;
                }
                None => warn!(path = %image.display(), "image name cannot be indexed, skipping"),
            }
        }

        // Index first: a record only counts once its tally file exists.
        write_atomic(&self.index_path(id), body.as_bytes())?;
        write_atomic(&self.tally_path(id), format!("{tally}\n").as_bytes())?;

        info!(
            id = %id,
            tally,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index built"
        );
        Ok(tally)
    }
}

/// Read access to one record, handed out by [`IndexCache::with_reader`].
#[derive(Debug)]
pub struct IndexReader {
    index_path: PathBuf,
    tally_path: PathBuf,
}

impl IndexReader {
    /// Cached tally; a missing or unparsable tally file reads as 0.
    pub fn tally(&self) -> usize {
        fs::read_to_string(&self.tally_path)
            .ok()
            .and_then(|content| content.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Lines of the index file, or `None` if it cannot be opened.
    ///
    /// Iteration stops at the first read error.
    pub fn lines(&self) -> Option<impl Iterator<Item = String>> {
        let file = File::open(&self.index_path).ok()?;
        Some(BufReader::new(file).lines().map_while(Result::ok))
    }

    /// Index line for 1-based `page`.
    ///
    /// Pages outside `1..=tally` return `None` without opening the index.
    pub fn entry(&self, page: usize) -> Option<String> {
        if page < 1 || page > self.tally() {
            return None;
        }
        self.lines()?.nth(page - 1)
    }
}

/// Render a gallery-relative path as an index line: `/`-separated, exactly
/// one leading `/`, no repeated separators.
///
/// Returns `None` for paths that cannot round-trip through a line-based file
/// (empty, or containing a newline).
pub fn index_line(relative: &Path) -> Option<String> {
    let mut line = String::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            line.push('/');
            line.push_str(&part.to_string_lossy());
        }
    }
    if line.is_empty() || line.contains(['\n', '\r']) {
        return None;
    }
    Some(line)
}

/// Write `bytes` to a temporary sibling of `path`, flush, then rename over
/// `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("cache file has no parent directory"))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.tmp.{}", std::process::id()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    // =========================================================================
    // Building
    // =========================================================================

    #[test]
    fn build_writes_index_and_tally() {
        let tmp = gallery(&["a/1.png", "a/2.png", "b/3.jpg"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");

        assert_eq!(index_lines(&cache, &id), ["/a/1.png", "/a/2.png", "/b/3.jpg"]);
        assert_eq!(fs::read_to_string(cache.tally_path(&id)).unwrap(), "3\n");
    }

    #[test]
    fn tally_matches_index_length() {
        let tmp = gallery(&["x.gif", "a/1.png", "a/b/2.png", "c/3.jpeg", "c/d/e/4.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");

        assert_eq!(cache.tally(&id), index_lines(&cache, &id).len());
        assert_eq!(cache.tally(&id), 5);
    }

    #[test]
    fn subdirectory_index_uses_root_relative_lines() {
        let tmp = gallery(&["top.png", "travel/japan/1.png", "travel/2.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "travel");

        assert_eq!(id.as_str(), "id-travel");
        assert_eq!(
            index_lines(&cache, &id),
            ["/travel/2.png", "/travel/japan/1.png"]
        );
    }

    #[test]
    fn empty_directory_builds_empty_record() {
        let tmp = gallery(&["empty/"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "empty");

        assert_eq!(cache.tally(&id), 0);
        assert!(index_lines(&cache, &id).is_empty());
    }

    #[test]
    fn missing_directory_is_invalid() {
        let tmp = gallery(&["a/1.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = DirectoryId::from_relative("nope");

        assert!(!cache.ensure_index(&id, "nope", false));
        assert!(matches!(
            cache.try_ensure_index(&id, "nope", false),
            Err(CacheError::MissingDirectory(_))
        ));
        assert!(!cache.index_path(&id).exists());
    }

    #[test]
    fn structure_created_on_demand() {
        let tmp = gallery(&["1.png"]);
        let cache_root = TempDir::new().unwrap();
        let cache = IndexCache::new(tmp.path(), cache_root.path().join("deep/nested"));
        let id = indexed(&cache, "");

        assert!(cache.index_path(&id).is_file());
        assert!(cache.tally_path(&id).is_file());
    }

    // =========================================================================
    // Reuse and refresh
    // =========================================================================

    #[test]
    fn existing_record_reused_byte_identical() {
        let tmp = gallery(&["a/1.png", "a/2.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");
        let index_before = fs::read(cache.index_path(&id)).unwrap();
        let tally_before = fs::read(cache.tally_path(&id)).unwrap();

        // New image is not picked up without a refresh.
        fs::write(tmp.path().join("a/3.png"), "new").unwrap();
        assert_eq!(
            cache.try_ensure_index(&id, "", false).unwrap(),
            BuildOutcome::Reused
        );

        assert_eq!(fs::read(cache.index_path(&id)).unwrap(), index_before);
        assert_eq!(fs::read(cache.tally_path(&id)).unwrap(), tally_before);
    }

    #[test]
    fn refresh_rebuilds() {
        let tmp = gallery(&["a/1.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");
        fs::write(tmp.path().join("a/2.png"), "new").unwrap();

        assert_eq!(
            cache.try_ensure_index(&id, "", true).unwrap(),
            BuildOutcome::Built { tally: 2 }
        );
        assert_eq!(index_lines(&cache, &id), ["/a/1.png", "/a/2.png"]);
    }

    #[test]
    fn missing_tally_triggers_rebuild() {
        let tmp = gallery(&["1.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");
        fs::remove_file(cache.tally_path(&id)).unwrap();

        assert_eq!(cache.tally(&id), 0);
        assert_eq!(
            cache.try_ensure_index(&id, "", false).unwrap(),
            BuildOutcome::Built { tally: 1 }
        );
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    #[test]
    fn entry_in_range() {
        let tmp = gallery(&["a/1.png", "a/2.png", "b/3.jpg"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");

        for page in 1..=cache.tally(&id) {
            assert!(cache.entry(&id, page).is_some(), "page {page} empty");
        }
        assert_eq!(cache.entry(&id, 3).as_deref(), Some("/b/3.jpg"));
    }

    #[test]
    fn entry_out_of_range() {
        let tmp = gallery(&["a/1.png", "a/2.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");

        assert_eq!(cache.entry(&id, 0), None);
        assert_eq!(cache.entry(&id, 3), None);
        assert_eq!(cache.entry(&id, usize::MAX), None);
    }

    #[test]
    fn uncached_id_reads_as_empty() {
        let tmp = gallery(&["1.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = DirectoryId::from_relative("never-built");

        assert_eq!(cache.tally(&id), 0);
        assert_eq!(cache.entry(&id, 1), None);
    }

    #[test]
    fn corrupt_tally_reads_as_zero() {
        let tmp = gallery(&["1.png"]);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");
        fs::write(cache.tally_path(&id), "not a number").unwrap();

        assert_eq!(cache.tally(&id), 0);
        assert_eq!(cache.entry(&id, 1), None);
    }

    // =========================================================================
    // Index line normalization
    // =========================================================================

    #[test]
    fn index_line_has_single_leading_separator() {
        assert_eq!(
            index_line(Path::new("a//b/c.png")).as_deref(),
            Some("/a/b/c.png")
        );
        assert_eq!(index_line(Path::new("c.png")).as_deref(), Some("/c.png"));
    }

    #[test]
    fn index_line_rejects_newlines() {
        assert_eq!(index_line(Path::new("a/bad\nname.png")), None);
        assert_eq!(index_line(Path::new("")), None);
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[test]
    fn concurrent_first_builds_walk_once() {
        let files: Vec<String> = (0..40)
            .map(|i| format!("dir{}/{i:03}.png", i % 4))
            .collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let tmp = gallery(&refs);
        let (_dir, cache) = cache_for(&tmp);
        let id = DirectoryId::from_relative("");

        let threads = 8;
        let barrier = Barrier::new(threads);
        let outcomes: Vec<BuildOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let outcome = cache.try_ensure_index(&id, "", false).unwrap();
                        // Every caller sees a complete record once it returns.
                        assert_eq!(cache.tally(&id), 40);
                        assert_eq!(cache.entry(&id, 40).as_deref(), Some("/dir3/039.png"));
                        outcome
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let builds = outcomes
            .iter()
            .filter(|o| matches!(o, BuildOutcome::Built { .. }))
            .count();
        assert_eq!(builds, 1);
        assert_eq!(index_lines(&cache, &id).len(), 40);
    }

    #[test]
    fn readers_never_see_partial_record_during_refresh() {
        let files: Vec<String> = (0..200).map(|i| format!("d/{i:04}.png")).collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let tmp = gallery(&refs);
        let (_dir, cache) = cache_for(&tmp);
        let id = indexed(&cache, "");

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..10 {
                    cache.try_ensure_index(&id, "", true).unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..50 {
                        cache.with_reader(&id, |reader| {
                            let tally = reader.tally();
                            let lines = reader.lines().map(|l| l.count()).unwrap_or(0);
                            assert_eq!(tally, 200);
                            assert_eq!(lines, tally);
                        });
                    }
                });
            }
        });
    }
}
