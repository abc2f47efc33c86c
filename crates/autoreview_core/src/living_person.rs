use std::collections::BTreeMap;

use serde_json::Value;

/// Wikidata item for people.
const HUMAN: &str = "Q5";
const INSTANCE_OF: &str = "P31";
const DATE_OF_BIRTH: &str = "P569";
const DATE_OF_DEATH: &str = "P570";
const MAX_AGE_YEARS: i32 = 130;

/// Localized names of the "Living people" category, keyed by language code,
/// from the sitelinks of its Wikidata item.
pub fn living_categories_from_sitelinks(response: &Value) -> BTreeMap<String, String> {
    let Some(entities) = response["entities"].as_object() else {
        return BTreeMap::new();
    };
    let Some(sitelinks) = entities
        .values()
        .next()
        .and_then(|entity| entity["sitelinks"].as_object())
    else {
        return BTreeMap::new();
    };
    sitelinks
        .iter()
        .filter_map(|(site, link)| {
            let title = link["title"].as_str()?;
            let name = title.split_once(':').map_or(title, |(_, name)| name);
            Some((site.replace("wiki", ""), name.to_string()))
        })
        .collect()
}

fn normalize_category(name: &str) -> String {
    let name = name.split_once(':').map_or(name, |(_, rest)| rest);
    name.replace('_', " ").trim().to_lowercase()
}

/// Whether any of `categories` (with or without namespace prefix) is the living-people category.
pub fn has_living_category<'a, I>(categories: I, living_category: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted = normalize_category(living_category);
    categories
        .into_iter()
        .any(|category| normalize_category(category) == wanted)
}

fn claims<'a>(entity: &'a Value, property: &str) -> &'a [Value] {
    entity["claims"][property]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Year of a Wikidata time value such as `+1950-03-01T00:00:00Z`.
fn time_year(time: &str) -> Option<i32> {
    let (negative, rest) = match time.as_bytes().first() {
        Some(b'-') => (true, &time[1..]),
        Some(b'+') => (false, &time[1..]),
        _ => (false, time),
    };
    let year = rest.split('-').next()?.parse::<i32>().ok()?;
    Some(if negative { -year } else { year })
}

/// A human item without a date of death whose birth year, when known,
/// is less than 130 years ago.
pub fn is_living_entity(entity: &Value, current_year: i32) -> bool {
    let is_human = claims(entity, INSTANCE_OF)
        .iter()
        .any(|claim| claim["mainsnak"]["datavalue"]["value"]["id"].as_str() == Some(HUMAN));
    if !is_human || !claims(entity, DATE_OF_DEATH).is_empty() {
        return false;
    }
    let birth_year = claims(entity, DATE_OF_BIRTH)
        .first()
        .and_then(|claim| claim["mainsnak"]["datavalue"]["value"]["time"].as_str())
        .and_then(time_year);
    match birth_year {
        Some(year) => current_year - year < MAX_AGE_YEARS,
        None => true,
    }
}
