//! # Scudder
//!
//! Share a directory tree of images over HTTP. Every directory can be browsed,
//! or paged through one image at a time across itself and all of its
//! subdirectories, with links that jump to the previous or next directory.
//!
//! # Architecture
//!
//! ```text
//! request ─► server ─► access filter
//!               │
//!               ├─ browse/  ─► browse  (one-level listing)
//!               ├─ view     ─► cache ─► index (walk, on first view)
//!               │                └────► navigate (page + boundaries)
//!               ├─ random   ─► cache ─► navigate::random_page
//!               └─ image/   ─► file bytes
//! ```
//!
//! The index of a directory is the sorted list of every image under it. It is
//! built once, written to the cache as plain text, and reused until someone
//! asks for a refresh, so page numbers are stable between visits.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`index`] | Breadth-first image enumeration with symlink-cycle protection |
//! | [`cache`] | On-disk index and tally records, single-flight builds, page lookups |
//! | [`navigate`] | Page resolution with previous/next directory boundaries; random pages |
//! | [`access`] | Allow/deny rules over addresses, hostnames and CIDR networks |
//! | [`browse`] | Direct subdirectories and image count of one directory |
//! | [`render`] | Maud HTML for browse, view and message pages |
//! | [`server`] | tokio accept loop, access check, axum routes, idle timeouts |
//! | [`config`] | `scudder.toml` loading over stock defaults, validation |
//! | [`types`] | `DirectoryId`, `Navigation`, relative-path normalization |
//! | [`output`] | Operator console output: banner, access rules, index results |
//!
//! # Design Decisions
//!
//! ## Plain-Text Indices
//!
//! An index is one `/dir/image.png` line per image and a tally file holding
//! the count. Page lookups scan forward to the requested line. That is linear
//! in the page number, but the files can be read, diffed and deleted by hand,
//! and a missing or truncated file simply reads as "nothing indexed".
//!
//! ## One Build Per Directory
//!
//! Concurrent first views of a large directory would otherwise each walk it.
//! Every [`types::DirectoryId`] has a build slot: builders take it
//! exclusively, readers share it, and a builder that waited behind another
//! build for the same id reuses that result instead of walking again.
//!
//! ## Bounded Connections
//!
//! A semaphore caps open connections at `max_connections`. The accept loop
//! waits for a free permit before it accepts, so a burst of clients queues
//! in the listen backlog instead of exhausting file descriptors, and a
//! client that goes quiet mid-request or mid-response is timed out.

pub mod access;
pub mod browse;
pub mod cache;
pub mod config;
pub mod index;
pub mod navigate;
pub mod output;
pub mod render;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
