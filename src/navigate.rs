//! Page navigation over a cached index.
//!
//! An index is a flat list of images, but its lines come in runs that share
//! a containing directory ("segments"). Besides the image for a page, the
//! viewer offers jumps to the first page of the previous and next segment.
//!
//! ```text
//! page  line                 segment
//!  1    /a/1.png             ┐ /a      previous for pages 3-4
//!  2    /a/2.png             ┘
//!  3    /b/1.png             ┐ /b      next for pages 1-2, previous for 5
//!  4    /b/2.png             ┘
//!  5    /c/1.png             ─ /c      next for pages 3-4
//! ```
//!
//! Everything for one page comes out of a single forward read of the index
//! file, stopping as soon as the segment after the page begins.

use rand::Rng;

use crate::cache::{IndexCache, IndexReader};
use crate::types::{DirectoryId, Navigation};

/// Resolve `page` (1-based) against the cached index for `id`.
///
/// Out-of-range pages, including every page of an uncached or empty index,
/// give an empty [`Navigation`].
pub fn resolve(cache: &IndexCache, id: &DirectoryId, page: usize) -> Navigation {
    cache.with_reader(id, |reader| resolve_with(reader, page))
}

fn resolve_with(reader: &IndexReader, page: usize) -> Navigation {
    let tally = reader.tally();
    if page < 1 || page > tally {
        return Navigation {
            tally,
            ..Navigation::default()
        };
    }
    let Some(lines) = reader.lines() else {
        return Navigation {
            tally,
            ..Navigation::default()
        };
    };
    Navigation {
        tally,
        ..scan(lines.take(tally), page)
    }
}

/// Single pass over index `lines` that finds `page` and the boundaries of
/// the segments around it.
///
/// If `lines` runs out before `page`, the result is empty.
pub fn scan<I, S>(lines: I, page: usize) -> Navigation
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut nav = Navigation::default();
    let mut current_dir: Option<String> = None;
    let mut segment_start = 0;
    let mut previous_start = 0;

    for (offset, line) in lines.into_iter().enumerate() {
        let number = offset + 1;
        let line = line.as_ref();
        let dir = containing_dir(line);
        let new_segment = current_dir.as_deref() != Some(dir);

        if number > page {
            if new_segment {
                nav.next_dir = number;
                break;
            }
            continue;
        }

        if new_segment {
            previous_start = segment_start;
            segment_start = number;
            current_dir = Some(dir.to_string());
        }
        if number == page {
            nav.path = Some(line.to_string());
            nav.previous_dir = previous_start;
        }
    }

    if nav.path.is_none() {
        return Navigation::default();
    }
    nav
}

/// Uniformly random page in `1..=tally`, or 0 when nothing is indexed.
///
/// 0 is never a real page; callers must treat it as "nothing to show".
pub fn random_page(cache: &IndexCache, id: &DirectoryId) -> usize {
    random_page_in(cache.tally(id), &mut rand::rng())
}

fn random_page_in(tally: usize, rng: &mut impl Rng) -> usize {
    if tally == 0 {
        return 0;
    }
    rng.random_range(1..=tally)
}

/// Directory part of an index line: `/a/b/c.png` → `/a/b`, `/c.png` → ``.
fn containing_dir(line: &str) -> &str {
    line.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}
