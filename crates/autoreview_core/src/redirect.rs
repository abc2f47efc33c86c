use anyhow::{Context, Result};
use regex::Regex;

/// Matches wikitext that begins with a localized redirect magic word.
#[derive(Debug, Clone)]
pub struct RedirectMatcher {
    pattern: Option<Regex>,
}

impl RedirectMatcher {
    pub fn new(aliases: &[String]) -> Result<Self> {
        let keywords = aliases
            .iter()
            .map(|alias| alias.trim_start_matches('#').trim())
            .filter(|alias| !alias.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>();
        if keywords.is_empty() {
            return Ok(Self { pattern: None });
        }
        let source = format!(
            r"(?i)^#[ \t]*(?:{})[ \t]*\[\[[^\]\n\r]+?\]\]",
            keywords.join("|")
        );
        let pattern = Regex::new(&source)
            .with_context(|| format!("failed to compile redirect pattern for {aliases:?}"))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn is_redirect(&self, wikitext: &str) -> bool {
        match &self.pattern {
            Some(pattern) => !wikitext.is_empty() && pattern.is_match(wikitext),
            None => false,
        }
    }
}

/// Built-in redirect aliases used when neither configuration nor siteinfo
/// provides them.
pub fn fallback_aliases(language: &str) -> Vec<String> {
    let aliases: &[&str] = match language {
        "de" => &["#WEITERLEITUNG", "#REDIRECT"],
        "pl" => &["#PATRZ", "#PRZEKIERUJ", "#TAM", "#REDIRECT"],
        "fi" => &["#OHJAUS", "#UUDELLEENOHJAUS", "#REDIRECT"],
        _ => &["#REDIRECT"],
    };
    aliases.iter().map(|alias| alias.to_string()).collect()
}

/// Extract the `redirect` magic word aliases from a `meta=siteinfo&siprop=magicwords` response.
pub fn aliases_from_siteinfo(response: &serde_json::Value) -> Option<Vec<String>> {
    let words = response.get("query")?.get("magicwords")?.as_array()?;
    let redirect = words
        .iter()
        .find(|word| word.get("name").and_then(|name| name.as_str()) == Some("redirect"))?;
    let aliases = redirect
        .get("aliases")?
        .as_array()?
        .iter()
        .filter_map(|alias| alias.as_str().map(ToString::to_string))
        .collect::<Vec<_>>();
    if aliases.is_empty() { None } else { Some(aliases) }
}

#[cfg(test)]
mod tests {
    use super::{RedirectMatcher, aliases_from_siteinfo, fallback_aliases};

    fn matcher(aliases: &[&str]) -> RedirectMatcher {
        let aliases = aliases.iter().map(|alias| alias.to_string()).collect::<Vec<_>>();
        RedirectMatcher::new(&aliases).expect("pattern")
    }

    #[test]
    fn detects_redirect_case_insensitively() {
        let matcher = matcher(&["#REDIRECT"]);
        assert!(matcher.is_redirect("#REDIRECT [[Target]]"));
        assert!(matcher.is_redirect("#redirect[[Target]]"));
        assert!(matcher.is_redirect("#\tReDiReCt \t[[Target page|x]]\n\n{{R from move}}"));
    }

    #[test]
    fn rejects_leading_whitespace_and_missing_target() {
        let matcher = matcher(&["#REDIRECT"]);
        assert!(!matcher.is_redirect(" #REDIRECT [[Target]]"));
        assert!(!matcher.is_redirect("\n#REDIRECT [[Target]]"));
        assert!(!matcher.is_redirect("#REDIRECT Target"));
        assert!(!matcher.is_redirect("#REDIRECT [[Tar\nget]]"));
        assert!(!matcher.is_redirect("Article body."));
        assert!(!matcher.is_redirect(""));
    }

    #[test]
    fn localized_aliases_are_matched() {
        let matcher = matcher(&["#OHJAUS", "UUDELLEENOHJAUS", "#REDIRECT"]);
        assert!(matcher.is_redirect("#ohjaus [[Kohde]]"));
        assert!(matcher.is_redirect("#UUDELLEENOHJAUS [[Kohde]]"));
        assert!(!matcher.is_redirect("#WEITERLEITUNG [[Ziel]]"));
    }

    #[test]
    fn empty_alias_list_never_matches() {
        assert!(!matcher(&[]).is_redirect("#REDIRECT [[Target]]"));
        assert!(!matcher(&["#", "  "]).is_redirect("#REDIRECT [[Target]]"));
    }

    #[test]
    fn fallback_table_covers_known_languages() {
        assert_eq!(fallback_aliases("de"), vec!["#WEITERLEITUNG", "#REDIRECT"]);
        assert_eq!(fallback_aliases("sv"), vec!["#REDIRECT"]);
        assert_eq!(fallback_aliases("pl").len(), 4);
    }

    #[test]
    fn siteinfo_magic_words_are_parsed() {
        let response = serde_json::json!({
            "query": {"magicwords": [
                {"name": "notoc", "aliases": ["__NOTOC__"]},
                {"name": "redirect", "aliases": ["#OHJAUS", "#REDIRECT"]}
            ]}
        });
        assert_eq!(
            aliases_from_siteinfo(&response),
            Some(vec!["#OHJAUS".to_string(), "#REDIRECT".to_string()])
        );
        assert_eq!(aliases_from_siteinfo(&serde_json::json!({})), None);
    }
}
