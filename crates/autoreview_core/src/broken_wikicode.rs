use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::html::visible_text;

/// A single indicator type must grow by at least this much to count on its own.
const SINGLE_INDICATOR_THRESHOLD: usize = 3;

static TAG_INDICATORS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("<ref", r"(?i)<ref\b"),
        ("</ref", r"(?i)</ref>"),
        ("ref>", r"(?i)\bref>"),
        ("<div", r"(?i)<div\b"),
        ("</div", r"(?i)</div>"),
        ("div>", r"(?i)\bdiv>"),
        ("<span", r"(?i)<span\b"),
        ("</span", r"(?i)</span>"),
        ("span>", r"(?i)\bspan>"),
    ]
    .into_iter()
    .map(|(key, pattern)| (key, Regex::new(pattern).expect("indicator pattern")))
    .collect()
});

static MATH_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)class="[^"]*math[^"]*""#).expect("math class pattern"));

pub type IndicatorCounts = Vec<(String, usize)>;

const DEFAULT_MEDIA_KEYWORDS: [&str; 3] = ["File", "Image", "Category"];

const LOCALIZED_MEDIA_KEYWORDS: &[(&str, [&str; 3])] = &[
    ("de", ["Datei", "Bild", "Kategorie"]),
    ("fr", ["Fichier", "Image", "Catégorie"]),
    ("es", ["Archivo", "Imagen", "Categoría"]),
    ("it", ["File", "Immagine", "Categoria"]),
    ("pt", ["Ficheiro", "Imagem", "Categoria"]),
    ("pl", ["Plik", "Grafika", "Kategoria"]),
    ("ru", ["Файл", "Изображение", "Категория"]),
    ("ja", ["ファイル", "画像", "カテゴリ"]),
    ("zh", ["文件", "图像", "分类"]),
    ("hu", ["Fájl", "Kép", "Kategória"]),
    ("nl", ["Bestand", "Afbeelding", "Categorie"]),
    ("sv", ["Fil", "Bild", "Kategori"]),
    ("fi", ["Tiedosto", "Kuva", "Luokka"]),
    ("no", ["Fil", "Bilde", "Kategori"]),
    ("da", ["Fil", "Billede", "Kategori"]),
    ("cs", ["Soubor", "Obrázek", "Kategorie"]),
    ("tr", ["Dosya", "Resim", "Kategori"]),
    ("ar", ["ملف", "صورة", "تصنيف"]),
    ("ko", ["파일", "그림", "분류"]),
];

type MediaPatterns = Vec<(String, Regex)>;

fn media_patterns(keywords: [&str; 3]) -> MediaPatterns {
    keywords
        .into_iter()
        .map(|keyword| {
            let key = format!("[{keyword}:");
            let pattern = Regex::new(&format!("(?i){}", regex::escape(&key)))
                .expect("media keyword pattern");
            (key, pattern)
        })
        .collect()
}

static DEFAULT_MEDIA_PATTERNS: LazyLock<MediaPatterns> =
    LazyLock::new(|| media_patterns(DEFAULT_MEDIA_KEYWORDS));

static LOCALIZED_MEDIA_PATTERNS: LazyLock<HashMap<&'static str, MediaPatterns>> =
    LazyLock::new(|| {
        LOCALIZED_MEDIA_KEYWORDS
            .iter()
            .map(|(language, keywords)| (*language, media_patterns(*keywords)))
            .collect()
    });

/// Localized File, Image and Category namespace names.
pub fn media_keywords(language: &str) -> [&'static str; 3] {
    LOCALIZED_MEDIA_KEYWORDS
        .iter()
        .find(|(code, _)| *code == language)
        .map(|(_, keywords)| *keywords)
        .unwrap_or(DEFAULT_MEDIA_KEYWORDS)
}

/// Math articles use `==` legitimately, so section markers are not counted for them.
pub fn is_math_related(html: &str) -> bool {
    html.contains('\\')
        || html.contains('$')
        || html.to_ascii_lowercase().contains("<math")
        || MATH_CLASS.is_match(html)
}

/// Per-indicator occurrence counts in the visible text of rendered HTML.
pub fn detect_indicators(html: &str, language: &str) -> IndicatorCounts {
    if html.is_empty() {
        return Vec::new();
    }
    let text = visible_text(html);
    let mut counts = vec![
        ("{{".to_string(), text.matches("{{").count()),
        ("}}".to_string(), text.matches("}}").count()),
        ("[[".to_string(), text.matches("[[").count()),
        ("]]".to_string(), text.matches("]]").count()),
    ];
    for (key, pattern) in TAG_INDICATORS.iter() {
        counts.push((key.to_string(), pattern.find_iter(&text).count()));
    }
    let media = LOCALIZED_MEDIA_PATTERNS
        .get(language)
        .unwrap_or(&*DEFAULT_MEDIA_PATTERNS);
    for (key, pattern) in media {
        counts.push((key.clone(), pattern.find_iter(&text).count()));
    }
    if !is_math_related(html) {
        counts.push(("==".to_string(), text.matches("==").count()));
    }
    counts
}

/// Indicators whose count grew relative to the parent, in detection order.
pub fn introduced_indicators(current: &str, parent: Option<&str>, language: &str) -> IndicatorCounts {
    let current_counts = detect_indicators(current, language);
    let parent_counts = match parent.filter(|html| !html.is_empty()) {
        Some(html) => detect_indicators(html, language),
        None => Vec::new(),
    };
    current_counts
        .into_iter()
        .filter_map(|(key, count)| {
            let before = parent_counts
                .iter()
                .find(|(parent_key, _)| *parent_key == key)
                .map(|(_, count)| *count)
                .unwrap_or_default();
            (count > before).then(|| (key, count - before))
        })
        .collect()
}

/// Description of the broken wikicode the revision introduces, if the
/// increase is large enough to rule out coincidence.
pub fn find_broken_wikicode(current: &str, parent: Option<&str>, language: &str) -> Option<String> {
    let introduced = introduced_indicators(current, parent, language);
    if introduced.is_empty() {
        return None;
    }
    if introduced.len() == 1 && introduced[0].1 < SINGLE_INDICATOR_THRESHOLD {
        return None;
    }
    let listed = introduced
        .iter()
        .map(|(key, count)| format!("{key}: {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("Introduced broken wikicode: {listed}"))
}
