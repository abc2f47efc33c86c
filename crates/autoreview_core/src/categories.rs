use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::broken_wikicode::media_keywords;

static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]|\n]+)(?:\|[^\]]*)?\]\]").expect("wikilink pattern"));

/// Case-folded name to canonical name, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameLookup {
    entries: BTreeMap<String, String>,
}

impl NameLookup {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = values
            .into_iter()
            .map(|value| value.as_ref().trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| (value.to_lowercase(), value))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn canonical(&self, value: &str) -> Option<&str> {
        self.entries.get(&value.trim().to_lowercase()).map(String::as_str)
    }

    /// Canonical names of every value present in the lookup, sorted.
    pub fn matches<'a, I>(&self, values: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        values
            .into_iter()
            .filter_map(|value| self.canonical(value))
            .map(str::to_string)
            .collect()
    }
}

/// Category names linked from wikitext, sorted and deduplicated. Accepts the
/// English `Category:` prefix and the wiki language's localized one.
pub fn parse_categories(wikitext: &str, language: &str) -> Vec<String> {
    let localized = media_keywords(language)[2].to_lowercase();
    let mut categories = BTreeSet::new();
    for captures in WIKILINK.captures_iter(wikitext) {
        let Some(target) = captures.get(1) else {
            continue;
        };
        let Some((prefix, name)) = target.as_str().trim().split_once(':') else {
            continue;
        };
        let prefix = prefix.trim().to_lowercase();
        if (prefix == "category" || prefix == localized) && !name.trim().is_empty() {
            categories.insert(name.trim().to_string());
        }
    }
    categories.into_iter().collect()
}
