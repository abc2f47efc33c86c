use std::collections::BTreeMap;

/// Elements whose content is code or markup examples rather than prose.
const NON_VISIBLE_ELEMENTS: &[&str] = &["script", "style", "code", "pre", "tt", "syntaxhighlight"];

/// Text a reader would see in the rendered page: comments, tags and the
/// content of code-like elements removed, entities decoded.
pub fn visible_text(html: &str) -> String {
    let mut raw = String::with_capacity(html.len());
    let mut index = 0usize;

    while index < html.len() {
        let Some(lt) = html[index..].find('<') else {
            raw.push_str(&html[index..]);
            break;
        };
        let at = index + lt;
        raw.push_str(&html[index..at]);

        if starts_with_at(html, at, "<!--") {
            index = match html[at + 4..].find("-->") {
                Some(end) => at + 4 + end + 3,
                None => html.len(),
            };
            continue;
        }
        if let Some(name) = NON_VISIBLE_ELEMENTS
            .iter()
            .find(|name| is_tag_at(html, at, name))
        {
            let Some(end) = find_tag_end(html, at) else {
                break;
            };
            index = if html[..end].ends_with('/') {
                end + 1
            } else {
                skip_element(html, end + 1, name)
            };
            continue;
        }
        if is_markup_at(html, at) {
            let Some(end) = find_tag_end(html, at) else {
                break;
            };
            index = end + 1;
            continue;
        }
        raw.push('<');
        index = at + 1;
    }

    decode_entities(&raw)
}

/// Number of elements carrying the `error` CSS class.
pub fn count_error_elements(html: &str) -> usize {
    let mut count = 0usize;
    let mut index = 0usize;

    while index < html.len() {
        let Some(lt) = html[index..].find('<') else {
            break;
        };
        let at = index + lt;
        if starts_with_at(html, at, "<!--") {
            index = match html[at + 4..].find("-->") {
                Some(end) => at + 4 + end + 3,
                None => html.len(),
            };
            continue;
        }
        let name_len = opening_tag_name_len(html, at);
        if name_len == 0 {
            index = at + 1;
            continue;
        }
        let Some(end) = find_tag_end(html, at) else {
            break;
        };
        let attrs = parse_attributes(&html[at..=end], name_len);
        if attrs
            .get("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|class| class == "error"))
        {
            count += 1;
        }
        index = end + 1;
    }

    count
}

fn skip_element(html: &str, from: usize, name: &str) -> usize {
    let mut depth = 1usize;
    let mut index = from;
    while index < html.len() {
        let Some(lt) = html[index..].find('<') else {
            return html.len();
        };
        let at = index + lt;
        if is_closing_tag_at(html, at, name) {
            depth -= 1;
            let end = find_tag_end(html, at).unwrap_or(html.len() - 1);
            if depth == 0 {
                return end + 1;
            }
            index = end + 1;
            continue;
        }
        if is_tag_at(html, at, name) {
            depth += 1;
        }
        index = at + 1;
    }
    html.len()
}

fn is_markup_at(html: &str, at: usize) -> bool {
    match html.as_bytes().get(at + 1).copied() {
        Some(byte) => byte.is_ascii_alphabetic() || matches!(byte, b'/' | b'!' | b'?'),
        None => false,
    }
}

fn opening_tag_name_len(html: &str, at: usize) -> usize {
    let bytes = html.as_bytes();
    if !bytes.get(at + 1).is_some_and(u8::is_ascii_alphabetic) {
        return 0;
    }
    bytes[at + 1..]
        .iter()
        .take_while(|byte| byte.is_ascii_alphanumeric() || **byte == b'-' || **byte == b':')
        .count()
}

fn is_tag_at(html: &str, at: usize, tag_name: &str) -> bool {
    let bytes = html.as_bytes();
    if bytes.get(at).copied() != Some(b'<') {
        return false;
    }
    let mut index = at + 1;
    for expected in tag_name.as_bytes() {
        let Some(actual) = bytes.get(index) else {
            return false;
        };
        if !actual.eq_ignore_ascii_case(expected) {
            return false;
        }
        index += 1;
    }
    matches!(
        bytes.get(index).copied(),
        Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/')
    )
}

fn is_closing_tag_at(html: &str, at: usize, tag_name: &str) -> bool {
    if !starts_with_at(html, at, "</") {
        return false;
    }
    let bytes = html.as_bytes();
    let start = at + 2;
    let end = start + tag_name.len();
    bytes
        .get(start..end)
        .is_some_and(|name| name.eq_ignore_ascii_case(tag_name.as_bytes()))
        && matches!(
            bytes.get(end).copied(),
            Some(b' ' | b'\t' | b'\n' | b'\r' | b'>')
        )
}

fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut quote = None::<u8>;
    for (index, byte) in bytes.iter().copied().enumerate().skip(start) {
        if let Some(active) = quote {
            if byte == active {
                quote = None;
            }
            continue;
        }
        match byte {
            b'"' | b'\'' => quote = Some(byte),
            b'>' => return Some(index),
            _ => {}
        }
    }
    None
}

fn parse_attributes(tag_raw: &str, name_len: usize) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let bytes = tag_raw.as_bytes();
    let mut index = name_len + 1;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'>' {
            break;
        }
        if byte == b'/' || byte.is_ascii_whitespace() {
            index += 1;
            continue;
        }

        let name_start = index;
        while index < bytes.len() {
            let ch = bytes[index];
            if ch.is_ascii_whitespace() || ch == b'=' || ch == b'>' || ch == b'/' {
                break;
            }
            index += 1;
        }
        if name_start == index {
            index += 1;
            continue;
        }
        let name = tag_raw[name_start..index].to_ascii_lowercase();
        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        let mut value = String::new();
        if bytes.get(index).copied() == Some(b'=') {
            index += 1;
            while index < bytes.len() && bytes[index].is_ascii_whitespace() {
                index += 1;
            }
            if let Some(quote) = bytes
                .get(index)
                .copied()
                .filter(|byte| *byte == b'"' || *byte == b'\'')
            {
                index += 1;
                let value_start = index;
                while index < bytes.len() && bytes[index] != quote {
                    index += 1;
                }
                value = tag_raw[value_start..index].to_string();
                index += 1;
            } else {
                let value_start = index;
                while index < bytes.len()
                    && !bytes[index].is_ascii_whitespace()
                    && bytes[index] != b'>'
                {
                    index += 1;
                }
                value = tag_raw[value_start..index].to_string();
            }
        }
        attrs.entry(name).or_insert(value);
    }

    attrs
}

fn starts_with_at(text: &str, index: usize, sequence: &str) -> bool {
    text.as_bytes()
        .get(index..index + sequence.len())
        .is_some_and(|window| window == sequence.as_bytes())
}

/// Single-pass entity decoding, so `&amp;lt;` yields `&lt;` rather than `<`.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        match candidate.find(';').filter(|semi| *semi <= 10) {
            Some(semi) => match decode_entity(&candidate[1..semi]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &candidate[semi + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    }
}
