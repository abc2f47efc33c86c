use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static SELF_CLOSING_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<ref[^>]*/>").expect("self-closing ref pattern"));
static PAIRED_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<ref(?:[^>]*[^>/])?>.*?</ref>").expect("paired ref pattern")
});
static INLINE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("inline whitespace pattern"));
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s\]<>"'|{}]+(?:\([^\s)]*\))?"#).expect("url pattern")
});

/// Outcome of comparing the reference sets of two revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceDiff {
    pub is_reference_only: bool,
    pub has_removals: bool,
    /// References present in the child but not in the parent, in order of appearance.
    pub added_or_modified: Vec<String>,
}

/// Self-closing refs first, then paired `<ref …>…</ref>` spans.
pub fn extract_references(text: &str) -> Vec<String> {
    SELF_CLOSING_REF
        .find_iter(text)
        .chain(PAIRED_REF.find_iter(text))
        .map(|found| found.as_str().to_string())
        .collect()
}

pub fn strip_references(text: &str) -> String {
    let without_self_closing = SELF_CLOSING_REF.replace_all(text, "");
    PAIRED_REF.replace_all(&without_self_closing, "").into_owned()
}

fn normalize_inline_whitespace(text: &str) -> String {
    INLINE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// An edit is reference-only when the prose outside references is unchanged
/// and at least one reference was added or modified. Removing references
/// alone never qualifies.
pub fn diff_references(parent: &str, child: &str) -> ReferenceDiff {
    if child.is_empty() {
        return ReferenceDiff::default();
    }
    if normalize_inline_whitespace(&strip_references(parent))
        != normalize_inline_whitespace(&strip_references(child))
    {
        return ReferenceDiff::default();
    }

    let parent_refs = extract_references(parent).into_iter().collect::<BTreeSet<_>>();
    let child_refs = extract_references(child);
    if parent_refs.is_empty() && child_refs.is_empty() {
        return ReferenceDiff::default();
    }
    let child_set = child_refs.iter().cloned().collect::<BTreeSet<_>>();
    let has_removals = parent_refs.iter().any(|reference| !child_set.contains(reference));

    let mut seen = BTreeSet::new();
    let added_or_modified = child_refs
        .into_iter()
        .filter(|reference| !parent_refs.contains(reference))
        .filter(|reference| seen.insert(reference.clone()))
        .collect::<Vec<_>>();

    ReferenceDiff {
        is_reference_only: !added_or_modified.is_empty(),
        has_removals,
        added_or_modified,
    }
}

pub fn extract_urls(references: &[String]) -> Vec<String> {
    references
        .iter()
        .flat_map(|reference| URL.find_iter(reference))
        .map(|found| {
            found
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', '}'])
                .to_string()
        })
        .collect()
}

/// Lower-cased authority of the URL with a leading `www.` removed.
pub fn domain_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let domain = authority
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(authority);
    if domain.is_empty() { None } else { Some(domain) }
}

/// Unique domains of every URL inside the given references, in first-seen order.
pub fn reference_domains(references: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    extract_urls(references)
        .iter()
        .filter_map(|url| domain_from_url(url))
        .filter(|domain| seen.insert(domain.clone()))
        .collect()
}
