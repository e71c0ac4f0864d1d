//! Anchor-based record extraction and dedup.
//!
//! Runs over a serialized DOM snapshot rather than the live page, so the
//! heuristics are pure and testable against fixtures. The page structure is
//! a hostile, versioned external dependency: anything that fails to parse is
//! skipped, and a page that matches nothing yields an empty list, never an
//! error.

use std::collections::HashSet;
use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::core::types::GroupRecord;

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    /// CSS selector matching candidate group anchors.
    pub anchor_selector: String,
    /// Base for resolving relative hrefs.
    pub base_url: String,
    /// Path-segment ids that are navigation chrome (exact, case-insensitive).
    pub id_denylist: Vec<String>,
    /// Label substrings that mark navigational chrome (case-insensitive).
    pub name_denylist: Vec<String>,
}

fn group_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/groups/([^/?#]+)").expect("valid group id pattern"))
}

/// Canonical form of an anchor target: absolute, query and fragment stripped.
fn canonicalize(href: &str, base: &Url) -> Option<Url> {
    let mut url = base.join(href).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}

/// The anchor's own direct text-node content, if any.
fn direct_text(anchor: &ElementRef<'_>) -> Option<String> {
    for child in anchor.children() {
        if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First non-empty nested label element (span/div) under the anchor.
fn nested_label_text(anchor: &ElementRef<'_>) -> Option<String> {
    static LABEL: OnceLock<Selector> = OnceLock::new();
    let selector = LABEL.get_or_init(|| Selector::parse("span, div").expect("valid label selector"));
    for label in anchor.select(selector) {
        let text: String = label.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// Best-effort secondary descriptive text: a text block mentioning members,
/// distinct from the resolved name.
fn member_count_text(anchor: &ElementRef<'_>, name: &str) -> Option<String> {
    anchor
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != name)
        .find(|t| t.to_ascii_lowercase().contains("member"))
        .map(str::to_string)
}

/// Turn a fully materialized page's anchors into a clean, deduplicated
/// record list, preserving document order.
pub fn extract_groups(html: &str, settings: &ExtractSettings) -> Vec<GroupRecord> {
    let selector = match Selector::parse(&settings.anchor_selector) {
        Ok(s) => s,
        Err(e) => {
            debug!(
                "anchor selector {:?} did not parse: {e} — extraction yields nothing",
                settings.anchor_selector
            );
            return Vec::new();
        }
    };
    let base = match Url::parse(&settings.base_url) {
        Ok(u) => u,
        Err(e) => {
            debug!("base url {:?} did not parse: {e}", settings.base_url);
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();
    let mut records: Vec<GroupRecord> = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(canonical) = canonicalize(href, &base) else {
            continue;
        };
        let canonical = canonical.to_string();

        let Some(id) = group_id_pattern()
            .captures(&canonical)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };

        if settings
            .id_denylist
            .iter()
            .any(|d| d.eq_ignore_ascii_case(&id))
        {
            continue;
        }

        // Name heuristics, in order: direct text node, nested label, the id.
        let name = direct_text(&anchor)
            .or_else(|| nested_label_text(&anchor))
            .unwrap_or_else(|| id.clone());

        // First anchor seen for a canonical URL wins; later duplicates are
        // dropped silently.
        if !seen.insert(canonical.clone()) {
            continue;
        }

        let member_count = member_count_text(&anchor, &name);
        records.push(GroupRecord {
            id,
            name,
            url: canonical,
            member_count,
        });
    }

    // Second pass: an id can look valid while the label is clearly chrome.
    let matcher = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&settings.name_denylist);
    match matcher {
        Ok(matcher) if !settings.name_denylist.is_empty() => records
            .into_iter()
            .filter(|r| !matcher.is_match(&r.name))
            .collect(),
        _ => records,
    }
}
