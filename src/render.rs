//! HTML pages served by the dispatcher.
//!
//! Uses [maud](https://maud.lambda.xyz/) like the rest of the project's
//! templating: compile-time checked markup with automatic escaping. Pages are
//! deliberately plain. One inline stylesheet, and a few lines of script for
//! keyboard navigation on the view page:
//!
//! | Key | Link          |
//! |-----|---------------|
//! | `n` | next page     |
//! | `p` | previous page |
//! | `b` | next dir      |
//! | `i` | previous dir  |
//! | `m` | random        |

use maud::{DOCTYPE, Markup, PreEscaped, html};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;

use crate::browse::Listing;
use crate::types::Navigation;

/// Characters left unescaped in hrefs; `/` survives so paths stay readable.
const URL_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const STYLE: &str = r#"
body { margin: 25px auto; max-width: 1024px; font-family: sans-serif; }
#frame { border: 2px dashed #3050c0; padding: 15px; }
.breadcrumbs { list-style: none; padding: 0; }
.breadcrumbs li { display: inline; }
.nav a { margin-right: 0.75em; }
.image { text-align: center; }
.image img { max-width: 100%; }
"#;

const KEYBOARD_NAV: &str = r#"
document.addEventListener("keypress", function (event) {
  var targets = { n: "next_link", p: "prev_link", b: "next_dir", i: "prev_dir", m: "random_link" };
  var name = targets[event.key];
  if (!name) { return; }
  var links = document.getElementsByClassName(name);
  if (links.length > 0) { window.location = links[0].href; }
});
"#;

// ============================================================================
// Links
// ============================================================================

fn encode(value: &str) -> String {
    utf8_percent_encode(value, URL_SAFE).to_string()
}

pub fn browse_href(relative: &str) -> String {
    if relative.is_empty() {
        "/browse/".to_string()
    } else {
        format!("/browse/{}/", encode(relative))
    }
}

pub fn view_href(relative: &str, page: usize) -> String {
    format!("/view?path={}&page={page}", encode(relative))
}

pub fn random_href(relative: &str, origin: usize) -> String {
    format!("/random?path={}&origin={origin}", encode(relative))
}

/// Where the view page lands after a random pick.
pub fn random_view_href(relative: &str, page: usize) -> String {
    format!("{}&source=random", view_href(relative, page))
}

/// Image source for an index line (`/a/b.png` → `/image/a/b.png`).
pub fn image_src(line: &str) -> String {
    format!("/image{}", encode(line))
}

// ============================================================================
// Shared layout
// ============================================================================

fn base_document(title: &str, head_script: Option<&str>, crumbs: Markup, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                title { (title) }
                style { (PreEscaped(STYLE)) }
                @if let Some(script) = head_script {
                    script { (PreEscaped(script)) }
                }
            }
            body {
                div #frame {
                    ul .breadcrumbs { (crumbs) }
                    (content)
                }
            }
        }
    }
}

/// `Root / travel / japan` with a View and Refresh link for the last level.
fn breadcrumbs(relative: &str) -> Markup {
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    html! {
        @if segments.is_empty() {
            li { " / Root" }
        } @else {
            li { " / " a href=(browse_href("")) { "Root" } }
        }
        @for (i, segment) in segments.iter().enumerate() {
            @if i + 1 == segments.len() {
                li { " / " (segment) }
            } @else {
                li { " / " a href=(browse_href(&segments[..=i].join("/"))) { (segment) } }
            }
        }
        li { " (" a href=(format!("/view?path={}", encode(relative))) { "View" } ")" }
        li { " (" a href=(format!("/view?path={}&action=refresh", encode(relative))) { "Refresh" } ")" }
    }
}

// ============================================================================
// Pages
// ============================================================================

/// Listing of one directory's subdirectories.
pub fn browse_page(relative: &str, real_path: &Path, listing: &Listing) -> Markup {
    let content = html! {
        p .title {
            (if relative.is_empty() { "." } else { relative })
            " (" (listing.image_count) " direct images)"
        }
        ul {
            @for sub in &listing.subdirectories {
                li {
                    a href=(browse_href(&sub.relative)) { (sub.name) }
                    " (" a href=(view_href(&sub.relative, 1)) { "View" } ")"
                }
            }
        }
    };
    base_document(
        &format!("Image Directory: {}", real_path.display()),
        None,
        breadcrumbs(relative),
        content,
    )
}

/// Everything the view page shows for one page of a directory.
#[derive(Debug)]
pub struct ViewPage<'a> {
    /// Directory being paged through, relative to the gallery root.
    pub relative: &'a str,
    pub page: usize,
    pub nav: &'a Navigation,
    /// The page was reached through the random route.
    pub from_random: bool,
}

fn nav_bar(view: &ViewPage<'_>) -> Markup {
    let ViewPage {
        relative, page, nav, ..
    } = *view;
    let mut links: Vec<(&str, String, &str)> = Vec::new();
    if page > 1 {
        links.push(("prev_link", view_href(relative, page - 1), "PREVIOUS"));
    }
    if nav.previous_dir > 0 {
        links.push(("prev_dir", view_href(relative, nav.previous_dir), "LAST DIR"));
    }
    links.push(("random_link", random_href(relative, page), "RANDOM"));
    if nav.next_dir > 0 {
        links.push(("next_dir", view_href(relative, nav.next_dir), "NEXT DIR"));
    }
    if page < nav.tally {
        links.push(("next_link", view_href(relative, page + 1), "NEXT"));
    }
    html! {
        div .nav {
            @for (class, href, label) in &links {
                a class=(class) href=(href) { (label) }
            }
            strong { "(" (page) " / " (nav.tally) ")" }
        }
    }
}

/// One image with paging and directory-jump links.
pub fn view_page(view: &ViewPage<'_>) -> Markup {
    let Some(line) = view.nav.path.as_deref() else {
        return message_page(
            "Nothing to show",
            &format!("No image at page {} of {}.", view.page, view.nav.tally),
        );
    };

    let image = html! { img src=(image_src(line)); };
    let target = if view.from_random {
        Some(random_href(view.relative, view.page))
    } else if view.page < view.nav.tally {
        Some(view_href(view.relative, view.page + 1))
    } else {
        None
    };

    let (dir, name) = line.rsplit_once('/').unwrap_or(("", line));
    let content = html! {
        (nav_bar(view))
        div .image {
            @if let Some(href) = target {
                a href=(href) { (image) }
            } @else {
                (image)
            }
        }
        (nav_bar(view))
        p { "Viewing: " strong { "." (line) } }
    };
    base_document(
        &format!("Image: {name} (.{dir}/)"),
        Some(KEYBOARD_NAV),
        breadcrumbs(view.relative),
        content,
    )
}

/// Plain page for "not found" and similar outcomes.
pub fn message_page(title: &str, message: &str) -> Markup {
    base_document(
        title,
        None,
        breadcrumbs(""),
        html! { p { (message) } },
    )
}
