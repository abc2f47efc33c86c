use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use similar::{Algorithm, DiffTag, TextDiff};

/// Additions shorter than this after normalization carry too little text to compare.
pub const MIN_ADDITION_CHARS: usize = 20;
/// Matching runs shorter than this are treated as coincidental.
pub const MIN_MATCH_BLOCK_CHARS: usize = 4;

struct NormalizePatterns {
    paired_ref: Regex,
    self_closing_ref: Regex,
    template: Regex,
    comment: Regex,
    category_link: Regex,
    file_link: Regex,
    piped_link: Regex,
    plain_link: Regex,
    emphasis: Regex,
    whitespace: Regex,
}

static PATTERNS: LazyLock<NormalizePatterns> = LazyLock::new(|| NormalizePatterns {
    paired_ref: Regex::new(r"(?is)<ref[^>]*>.*?</ref>").expect("paired ref pattern"),
    self_closing_ref: Regex::new(r"(?i)<ref[^>]*/>").expect("self-closing ref pattern"),
    template: Regex::new(r"\{\{[^{}]*\}\}").expect("template pattern"),
    comment: Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"),
    category_link: Regex::new(r"(?i)\[\[Category:[^\]]+\]\]").expect("category pattern"),
    file_link: Regex::new(r"(?is)\[\[(?:File|Image):[^\]]+\]\]").expect("file pattern"),
    piped_link: Regex::new(r"\[\[[^\]|]+\|([^\]]+)\]\]").expect("piped link pattern"),
    plain_link: Regex::new(r"\[\[([^\]]+)\]\]").expect("plain link pattern"),
    emphasis: Regex::new(r"'{2,}").expect("emphasis pattern"),
    whitespace: Regex::new(r"\s+").expect("whitespace pattern"),
});

/// Reduce wikitext to its readable prose for similarity comparison.
pub fn normalize_wikitext(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let patterns = &*PATTERNS;
    let text = patterns.paired_ref.replace_all(text, "");
    let text = patterns.self_closing_ref.replace_all(&text, "");
    // Two passes unwrap one level of nested templates.
    let text = patterns.template.replace_all(&text, "");
    let text = patterns.template.replace_all(&text, "");
    let text = patterns.comment.replace_all(&text, "");
    let text = patterns.category_link.replace_all(&text, "");
    let text = patterns.file_link.replace_all(&text, "");
    let text = patterns.piped_link.replace_all(&text, "$1");
    let text = patterns.plain_link.replace_all(&text, "$1");
    let text = patterns.emphasis.replace_all(&text, "");
    patterns
        .whitespace
        .replace_all(&text, " ")
        .trim()
        .to_string()
}

/// Text inserted or replaced by the child relative to the parent, at
/// character granularity. Whitespace-only spans are dropped.
pub fn extract_additions(parent: &str, child: &str) -> Vec<String> {
    if child.is_empty() {
        return Vec::new();
    }
    if parent.is_empty() {
        return vec![child.to_string()];
    }
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_chars(parent, child);
    let new_slices = diff.new_slices();
    diff.ops()
        .iter()
        .filter_map(|op| {
            let (tag, _, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Insert | DiffTag::Replace => Some(new_slices[new_range].concat()),
                DiffTag::Equal | DiffTag::Delete => None,
            }
        })
        .filter(|added| !added.trim().is_empty())
        .collect()
}

/// Total length of matching blocks of at least [`MIN_MATCH_BLOCK_CHARS`]
/// between `needle` and `haystack`, in characters.
pub fn significant_match_length(needle: &str, haystack: &str) -> usize {
    if needle.is_empty() || haystack.is_empty() {
        return 0;
    }
    let needle = needle.chars().collect::<Vec<_>>();
    let haystack = haystack.chars().collect::<Vec<_>>();
    matching_blocks(&needle, &haystack)
        .into_iter()
        .map(|block| block.size)
        .filter(|size| *size >= MIN_MATCH_BLOCK_CHARS)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatchBlock {
    a: usize,
    b: usize,
    size: usize,
}

/// Non-overlapping common blocks in ascending order: take the longest common
/// block, then repeat on the spans to its left and right. Touching blocks are
/// merged.
fn matching_blocks(a: &[char], b: &[char]) -> Vec<MatchBlock> {
    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (index, ch) in b.iter().enumerate() {
        positions.entry(*ch).or_default().push(index);
    }

    let mut blocks = Vec::new();
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let block = longest_match(a, &positions, (a_lo, a_hi), (b_lo, b_hi));
        if block.size == 0 {
            continue;
        }
        if a_lo < block.a && b_lo < block.b {
            pending.push((a_lo, block.a, b_lo, block.b));
        }
        if block.a + block.size < a_hi && block.b + block.size < b_hi {
            pending.push((block.a + block.size, a_hi, block.b + block.size, b_hi));
        }
        blocks.push(block);
    }
    blocks.sort_by_key(|block| (block.a, block.b));

    let mut merged: Vec<MatchBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match merged.last_mut() {
            Some(last) if last.a + last.size == block.a && last.b + last.size == block.b => {
                last.size += block.size;
            }
            _ => merged.push(block),
        }
    }
    merged
}

/// Longest block shared by `a[a_lo..a_hi]` and `b[b_lo..b_hi]`. Ties go to
/// the earliest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    positions: &HashMap<char, Vec<usize>>,
    (a_lo, a_hi): (usize, usize),
    (b_lo, b_hi): (usize, usize),
) -> MatchBlock {
    let mut best = MatchBlock {
        a: a_lo,
        b: b_lo,
        size: 0,
    };
    // Length of the match ending at each b index for the previous a index.
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();
    for (i, ch) in a.iter().enumerate().take(a_hi).skip(a_lo) {
        let mut next = HashMap::new();
        for &j in positions.get(ch).map(Vec::as_slice).unwrap_or_default() {
            if j < b_lo {
                continue;
            }
            if j >= b_hi {
                break;
            }
            let size = j
                .checked_sub(1)
                .and_then(|previous| run_ending_at.get(&previous))
                .copied()
                .unwrap_or(0)
                + 1;
            next.insert(j, size);
            if size > best.size {
                best = MatchBlock {
                    a: i + 1 - size,
                    b: j + 1 - size,
                    size,
                };
            }
        }
        run_ending_at = next;
    }
    best
}

/// Share of the normalized addition that still appears in the normalized
/// stable text. `None` when the addition is too short to judge.
pub fn addition_match_ratio(addition: &str, normalized_stable: &str) -> Option<f64> {
    let normalized = normalize_wikitext(addition);
    let length = normalized.chars().count();
    if length < MIN_ADDITION_CHARS {
        return None;
    }
    let matched = significant_match_length(&normalized, normalized_stable);
    Some(matched as f64 / length as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupersededAddition {
    pub addition: String,
    pub ratio: f64,
}

/// First addition whose match ratio against the stable text falls below
/// `threshold`, if any.
pub fn find_superseded_addition(
    parent: &str,
    child: &str,
    stable: &str,
    threshold: f64,
) -> Option<SupersededAddition> {
    let normalized_stable = normalize_wikitext(stable);
    if normalized_stable.is_empty() {
        return None;
    }
    extract_additions(parent, child)
        .into_iter()
        .find_map(|addition| {
            let ratio = addition_match_ratio(&addition, &normalized_stable)?;
            (ratio < threshold).then_some(SupersededAddition { addition, ratio })
        })
}

#[cfg(test)]
mod tests {
    use super::{
        extract_additions, find_superseded_addition, normalize_wikitext, significant_match_length,
    };

    #[test]
    fn normalization_strips_markup() {
        let text = "'''Bold''' [[Target|label]] and [[Plain]]{{cite|x}}<ref>r</ref><!-- c -->\n\n[[Category:Foo]] [[File:X.png|thumb]] end";
        assert_eq!(normalize_wikitext(text), "Bold label and Plain end");
    }

    #[test]
    fn nested_templates_are_removed_in_two_passes() {
        assert_eq!(normalize_wikitext("a {{outer|{{inner}}}} b"), "a b");
    }

    #[test]
    fn identical_texts_have_no_additions() {
        assert!(extract_additions("Same text here.", "Same text here.").is_empty());
    }

    #[test]
    fn inserted_sentence_is_an_addition() {
        let additions = extract_additions("Intro. Outro.", "Intro. Middle part added. Outro.");
        let joined = additions.concat();
        assert!(joined.contains("Middle"), "{joined:?}");
        assert!(joined.contains("added"), "{joined:?}");
        assert!(!joined.contains("Intro"));
    }

    #[test]
    fn parentless_child_is_entirely_added() {
        assert_eq!(extract_additions("", "New page"), vec!["New page"]);
        assert!(extract_additions("Old", "").is_empty());
    }

    #[test]
    fn match_length_counts_long_runs_only() {
        assert_eq!(significant_match_length("abcdefgh", "xxabcdefghxx"), 8);
        assert_eq!(significant_match_length("abc", "abc"), 0);
    }

    #[test]
    fn verbatim_needle_matches_in_full_despite_scattered_fragments() {
        let needle = "abcdefghij klmnopqrst uvwxyz";
        let haystack = "ab cd ef gh ij kl mn op qr st uv wx yz abcdefghij klmnopqrst uvwxyz zz";
        assert_eq!(significant_match_length(needle, haystack), needle.len());
        let haystack = "abcdefghij xx klmnopqrst uvwxyz";
        assert_eq!(significant_match_length(needle, haystack), 10 + 18);
    }

    #[test]
    fn blocks_on_both_sides_of_the_longest_match_are_counted() {
        // "quick" sits left of the longest block and "lazy dog" right of it.
        let needle = "quick brown fox jumps lazy dog";
        let haystack = "a quick red brown fox jumps over the lazy dog";
        assert_eq!(
            significant_match_length(needle, haystack),
            "quick".len() + " brown fox jumps ".len() + "lazy dog".len()
        );
    }

    #[test]
    fn removed_addition_is_superseded() {
        let parent = "Intro paragraph.";
        let child = "Intro paragraph. A long sentence about zebras and quokkas appeared.";
        let stable = "Intro paragraph. Unrelated text.";
        let found = find_superseded_addition(parent, child, stable, 0.2).expect("superseded");
        assert!(found.ratio < 0.2);
    }

    #[test]
    fn retained_addition_is_not_superseded() {
        let parent = "Intro paragraph.";
        let child = "Intro paragraph. A long sentence about zebras and quokkas appeared.";
        assert!(find_superseded_addition(parent, child, child, 0.2).is_none());
    }

    #[test]
    fn short_additions_are_ignored() {
        let parent = "Intro paragraph.";
        let child = "Intro paragraph. Tiny.";
        assert!(find_superseded_addition(parent, child, "Other text", 0.2).is_none());
    }
}
