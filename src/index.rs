//! Directory indexer.
//!
//! Flattens a directory tree into the ordered list of images that the cache
//! stores and the viewer pages through.
//!
//! ## Ordering
//!
//! The walk is breadth-first from the requested directory:
//!
//! ```text
//! gallery/                  page
//! ├── A.jpg                   1   /A.jpg
//! ├── b.png                   2   /b.png   (names compare case-insensitively)
//! ├── cats/
//! │   ├── 1.gif               3   /cats/1.gif
//! │   └── kittens/
//! │       └── 1.png           5   /cats/kittens/1.png
//! └── dogs/
//!     └── 1.jpeg              4   /dogs/1.jpeg
//! ```
//!
//! A directory's own images come first, in name order. Its subdirectories
//! join the back of one queue shared by the whole walk, so every directory at
//! depth `n` is emitted before any directory at depth `n + 1`. Because images
//! of one directory are always contiguous, the navigation resolver can treat
//! "same containing directory" as "same segment".
//!
//! ## Symbolic links
//!
//! Links are followed. Every directory is canonicalized before it is read
//! and skipped if that canonical path was already visited, which stops
//! link cycles and keeps a directory reachable through two links from being
//! indexed twice.
//!
//! ## Failures
//!
//! Nothing here fails the walk. Unreadable directories and dangling links are
//! logged and skipped, and the walk carries on with the rest of the queue.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::types::normalize_relative;

/// Extensions (lowercase, without the dot) recognised as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// Case-insensitive suffix check against [`IMAGE_EXTENSIONS`].
pub fn is_image_name(name: &str) -> bool {
    let name = name.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| {
        name.strip_suffix(ext)
            .is_some_and(|stem| stem.ends_with('.'))
    })
}

/// Enumerate every image under `root/subdirectory`, breadth-first.
///
/// Returned paths are relative to `root` (not to `subdirectory`), so they
/// can be served directly from the gallery root.
pub fn enumerate(root: &Path, subdirectory: &str) -> Vec<PathBuf> {
    let start = root.join(normalize_relative(subdirectory));
    let mut pending: VecDeque<(PathBuf, usize)> = VecDeque::from([(start, 0)]);
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut images = Vec::new();

    while let Some((dir, depth)) = pending.pop_front() {
        let identity = match dir.canonicalize() {
            Ok(identity) => identity,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unresolvable directory");
                continue;
            }
        };
        if !visited.insert(identity) {
            debug!(dir = %dir.display(), "directory already indexed, skipping");
            continue;
        }

        let entries = match list_sorted(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries {
            let file_type = entry.file_type();
            if file_type.is_dir() {
                pending.push_back((entry.into_path(), depth + 1));
            } else if file_type.is_file() && is_image_name(&entry.file_name().to_string_lossy()) {
                match entry.path().strip_prefix(root) {
                    Ok(relative) => images.push(relative.to_path_buf()),
                    Err(_) => debug!(path = %entry.path().display(), "image outside gallery root"),
                }
            }
        }
        debug!(dir = %dir.display(), depth, found = images.len(), "directory indexed");
    }

    images
}

/// Direct children of `dir`, sorted case-insensitively by name.
///
/// Symbolic links are resolved, so a link to a directory reports
/// `is_dir()`. Entries that cannot be stat'ed (dangling links) are dropped;
/// failing to open `dir` itself is an error.
pub(crate) fn list_sorted(dir: &Path) -> Result<Vec<DirEntry>, walkdir::Error> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by(|a, b| {
            let a = a.file_name().to_string_lossy();
            let b = b.file_name().to_string_lossy();
            a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(&b))
        });

    for entry in walker {
        match entry {
            Ok(entry) => entries.push(entry),
            // Depth 0 is `dir` itself: the listing as a whole failed.
            Err(e) if e.depth() == 0 => return Err(e),
            Err(e) => debug!(error = %e, "skipping unreadable entry"),
        }
    }
    Ok(entries)
}
