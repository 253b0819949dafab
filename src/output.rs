//! Operator console output.
//!
//! Logs go through `tracing`; this module covers the handful of lines an
//! operator reads directly: the startup banner, the access rules in effect,
//! and the result of the `index` command.
//!
//! # Output Format
//!
//! ## Serve
//!
//! ```text
//! Allowing network: 10.0.0.0/24
//! Denying address: fileserver (10.0.0.5)
//! Skipped rule: Unable to resolve: nosuchhost
//! Sharing images in /srv/gallery on 0.0.0.0:8080 (32 connections)
//! ```
//!
//! ## Index
//!
//! ```text
//! id-travel-japan (built, 42 images)
//!     Source: travel/japan/
//!     Index: /home/me/.cache/scudder/indices/id-travel-japan
//!     Tally: /home/me/.cache/scudder/tallies/id-travel-japan
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use std::net::SocketAddr;
use std::path::Path;

use crate::access::{AccessFilter, AccessRule, Policy, RuleError, Target};
use crate::cache::{BuildOutcome, IndexCache};
use crate::types::DirectoryId;

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

// ============================================================================
// Serve
// ============================================================================

/// `Allowing address: fileserver (10.0.0.5)`; the parenthesised form only
/// when the rule text differs from what it resolved to.
fn rule_line(rule: &AccessRule) -> String {
    let verb = match rule.policy {
        Policy::Allow => "Allowing",
        Policy::Deny => "Denying",
    };
    let kind = match rule.target {
        Target::Address(_) => "address",
        Target::Network(_) => "network",
    };
    let target = rule.target.to_string();
    if rule.source == target {
        format!("{verb} {kind}: {target}")
    } else {
        format!("{verb} {kind}: {} ({target})", rule.source)
    }
}

/// One line per rule in effect, then one per rule that was dropped.
pub fn format_rules(filter: &AccessFilter, failures: &[RuleError]) -> Vec<String> {
    filter
        .rules()
        .iter()
        .map(rule_line)
        .chain(failures.iter().map(|e| format!("Skipped rule: {e}")))
        .collect()
}

pub fn format_banner(gallery: &Path, addr: SocketAddr, connections: usize) -> Vec<String> {
    vec![format!(
        "Sharing images in {} on {addr} ({})",
        gallery.display(),
        plural(connections, "connection")
    )]
}

pub fn print_rules(filter: &AccessFilter, failures: &[RuleError]) {
    for line in format_rules(filter, failures) {
        println!("{}", line);
    }
}

pub fn print_banner(gallery: &Path, addr: SocketAddr, connections: usize) {
    for line in format_banner(gallery, addr, connections) {
        println!("{}", line);
    }
}

// ============================================================================
// Index
// ============================================================================

/// Result of one `index` run: which record, what happened, where it lives.
pub fn format_index_output(
    cache: &IndexCache,
    id: &DirectoryId,
    relative: &str,
    outcome: BuildOutcome,
) -> Vec<String> {
    let status = match outcome {
        BuildOutcome::Reused => format!("cached, {}", plural(cache.tally(id), "image")),
        BuildOutcome::Built { tally } => format!("built, {}", plural(tally, "image")),
    };
    let source = if relative.is_empty() {
        "./".to_string()
    } else {
        format!("{relative}/")
    };
    vec![
        format!("{id} ({status})"),
        format!("{}Source: {source}", indent(1)),
        format!("{}Index: {}", indent(1), cache.index_path(id).display()),
        format!("{}Tally: {}", indent(1), cache.tally_path(id).display()),
    ]
}

pub fn print_index_output(
    cache: &IndexCache,
    id: &DirectoryId,
    relative: &str,
    outcome: BuildOutcome,
) {
    for line in format_index_output(cache, id, relative, outcome) {
        println!("{}", line);
    }
}
