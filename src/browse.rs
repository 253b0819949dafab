//! One-level directory listings for the browse pages.
//!
//! Unlike the indexer this never descends: it reports a directory's direct
//! subdirectories and how many images sit directly inside it.

use std::io;
use std::path::Path;

use crate::index::{is_image_name, list_sorted};
use crate::types::normalize_relative;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdirectory {
    /// Entry name as shown in the listing.
    pub name: String,
    /// Path relative to the gallery root, `/`-separated, no leading `/`.
    pub relative: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub subdirectories: Vec<Subdirectory>,
    pub image_count: usize,
}

/// List `root/relative`, subdirectories sorted case-insensitively.
pub fn list(root: &Path, relative: &str) -> io::Result<Listing> {
    let relative = normalize_relative(relative);
    let mut listing = Listing::default();

    for entry in list_sorted(&root.join(&relative)).map_err(io::Error::from)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().is_dir() {
            let relative = if relative.is_empty() {
                name.clone()
            } else {
                format!("{relative}/{name}")
            };
            listing.subdirectories.push(Subdirectory { name, relative });
        } else if entry.file_type().is_file() && is_image_name(&name) {
            listing.image_count += 1;
        }
    }
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    fn names(listing: &Listing) -> Vec<&str> {
        listing
            .subdirectories
            .iter()
            .map(|s| s.name.as_str())
            .collect()
    }

    #[test]
    fn lists_direct_children_only() {
        let tmp = gallery(&["1.png", "2.jpg", "notes.txt", "b/x.png", "A/deep/y.png"]);
        let listing = list(tmp.path(), "").unwrap();

        assert_eq!(names(&listing), vec!["A", "b"]);
        assert_eq!(listing.image_count, 2);
    }

    #[test]
    fn nested_relative_paths() {
        let tmp = gallery(&["travel/japan/1.png", "travel/italy/", "travel/cover.gif"]);
        let listing = list(tmp.path(), "/travel/").unwrap();

        assert_eq!(
            listing.subdirectories,
            vec![
                Subdirectory {
                    name: "italy".into(),
                    relative: "travel/italy".into()
                },
                Subdirectory {
                    name: "japan".into(),
                    relative: "travel/japan".into()
                },
            ]
        );
        assert_eq!(listing.image_count, 1);
    }

    #[test]
    fn missing_directory_is_error() {
        let tmp = gallery(&[]);
        assert!(list(tmp.path(), "absent").is_err());
    }
}
