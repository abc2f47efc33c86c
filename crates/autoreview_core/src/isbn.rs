const MAX_CANDIDATE_CHARS: usize = 30;

pub fn validate_isbn_10(isbn: &str) -> bool {
    let chars = isbn.chars().collect::<Vec<_>>();
    if chars.len() != 10 {
        return false;
    }
    let mut total = 0u32;
    for (index, ch) in chars[..9].iter().enumerate() {
        let Some(digit) = ch.to_digit(10) else {
            return false;
        };
        total += digit * (10 - index as u32);
    }
    let check = match chars[9] {
        'X' | 'x' => 10,
        ch => match ch.to_digit(10) {
            Some(digit) => digit,
            None => return false,
        },
    };
    (total + check) % 11 == 0
}

pub fn validate_isbn_13(isbn: &str) -> bool {
    if isbn.len() != 13 || !isbn.bytes().all(|byte| byte.is_ascii_digit()) {
        return false;
    }
    if !(isbn.starts_with("978") || isbn.starts_with("979")) {
        return false;
    }
    let digits = isbn.bytes().map(|byte| u32::from(byte - b'0')).collect::<Vec<_>>();
    let total = digits[..12]
        .iter()
        .enumerate()
        .map(|(index, digit)| if index % 2 == 0 { *digit } else { digit * 3 })
        .sum::<u32>();
    digits[12] == (10 - total % 10) % 10
}

pub fn is_valid_isbn(raw: &str) -> bool {
    let clean = strip_separators(raw);
    match clean.chars().count() {
        10 => validate_isbn_10(&clean),
        13 => validate_isbn_13(&clean),
        _ => false,
    }
}

/// Raw text of every ISBN under an `isbn` label whose checksum does not hold.
pub fn find_invalid_isbns(text: &str) -> Vec<String> {
    scan_isbn_candidates(text)
        .into_iter()
        .filter(|raw| !strip_separators(raw).is_empty() && !is_valid_isbn(raw))
        .map(|raw| raw.trim().to_string())
        .collect()
}

fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .collect()
}

/// Candidate values following each `isbn` label. The candidate is the
/// shortest run of ISBN characters that ends before a trailing year, a
/// character outside the ISBN alphabet, or the end of the text.
fn scan_isbn_candidates(text: &str) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor + 4 <= chars.len() {
        if !is_label_at(&chars, cursor) {
            cursor += 1;
            continue;
        }
        match match_candidate(&chars, cursor + 4) {
            Some((start, end)) => {
                out.push(chars[start..end].iter().collect());
                cursor = end.max(cursor + 1);
            }
            None => cursor += 1,
        }
    }
    out
}

fn is_label_at(chars: &[char], index: usize) -> bool {
    chars[index..index + 4]
        .iter()
        .zip("isbn".chars())
        .all(|(ch, expected)| ch.to_ascii_lowercase() == expected)
}

fn match_candidate(chars: &[char], after_label: usize) -> Option<(usize, usize)> {
    for start in value_starts(chars, after_label) {
        for len in 1..=MAX_CANDIDATE_CHARS {
            let last = start + len - 1;
            if last >= chars.len() || !is_isbn_char(chars[last]) {
                break;
            }
            if candidate_ends_at(chars, start + len) {
                return Some((start, start + len));
            }
        }
    }
    None
}

/// Possible value start positions after the label, in the order a
/// backtracking `\s*[=:]?\s*` prefix would try them.
fn value_starts(chars: &[char], from: usize) -> Vec<usize> {
    let mut starts = Vec::new();
    let leading = count_whitespace(chars, from);
    for taken in (0..=leading).rev() {
        let position = from + taken;
        let mut after_separator = Vec::with_capacity(2);
        if matches!(chars.get(position), Some('=' | ':')) {
            after_separator.push(position + 1);
        }
        after_separator.push(position);
        for separator_end in after_separator {
            let trailing = count_whitespace(chars, separator_end);
            for inner in (0..=trailing).rev() {
                starts.push(separator_end + inner);
            }
        }
    }
    starts
}

fn candidate_ends_at(chars: &[char], end: usize) -> bool {
    let Some(next) = chars.get(end) else {
        return true;
    };
    if !next.is_ascii_digit() && !next.is_whitespace() && !matches!(next, 'X' | 'x' | '-') {
        return true;
    }
    trailing_year_at(chars, end)
}

fn trailing_year_at(chars: &[char], end: usize) -> bool {
    let spaces = count_whitespace(chars, end);
    if spaces == 0 {
        return false;
    }
    let year_start = end + spaces;
    let year_end = year_start + 4;
    if year_end > chars.len() || !chars[year_start..year_end].iter().all(char::is_ascii_digit) {
        return false;
    }
    chars.get(year_end).is_none_or(|ch| !ch.is_ascii_digit())
}

fn count_whitespace(chars: &[char], from: usize) -> usize {
    chars
        .iter()
        .skip(from)
        .take_while(|ch| ch.is_whitespace())
        .count()
}

fn is_isbn_char(ch: char) -> bool {
    ch.is_ascii_digit() || ch.is_whitespace() || matches!(ch, 'X' | 'x' | '-')
}

#[cfg(test)]
mod tests {
    use super::{find_invalid_isbns, is_valid_isbn, validate_isbn_10, validate_isbn_13};

    fn isbn10_from(prefix: &str) -> String {
        let total = prefix
            .chars()
            .enumerate()
            .map(|(index, ch)| ch.to_digit(10).unwrap() * (10 - index as u32))
            .sum::<u32>();
        let check = (11 - total % 11) % 11;
        let check = if check == 10 {
            "X".to_string()
        } else {
            check.to_string()
        };
        format!("{prefix}{check}")
    }

    fn flip_digit(isbn: &str, index: usize) -> String {
        isbn.chars()
            .enumerate()
            .map(|(position, ch)| {
                if position == index {
                    let digit = ch.to_digit(10).unwrap();
                    char::from_digit((digit + 1) % 10, 10).unwrap()
                } else {
                    ch
                }
            })
            .collect()
    }

    #[test]
    fn known_isbns_validate() {
        assert!(validate_isbn_10("0306406152"));
        assert!(validate_isbn_10("080442957X"));
        assert!(validate_isbn_13("9780306406157"));
        assert!(!validate_isbn_13("9780306406158"));
        assert!(!validate_isbn_13("1234567890128"));
        assert!(is_valid_isbn("978-0-306-40615-7"));
        assert!(!is_valid_isbn("12345"));
    }

    #[test]
    fn computed_isbn10_always_validates() {
        for prefix in ["030640615", "080442957", "000000000", "999999999", "123456789"] {
            let isbn = isbn10_from(prefix);
            assert!(validate_isbn_10(&isbn), "{isbn} should be valid");
        }
    }

    #[test]
    fn single_digit_change_breaks_checksum() {
        for valid in ["0306406152", "9780306406157", "9791234567896"] {
            assert!(is_valid_isbn(valid), "{valid} should start valid");
            for index in 0..valid.len() {
                if valid.len() == 13 && index < 3 {
                    continue;
                }
                let flipped = flip_digit(valid, index);
                assert!(!is_valid_isbn(&flipped), "{flipped} should be invalid");
            }
        }
    }

    #[test]
    fn finds_invalid_isbn_in_wikitext() {
        let text = "Source: Smith, ''Book'', ISBN 978-0-306-40615-8.";
        assert_eq!(find_invalid_isbns(text), vec!["978-0-306-40615-8"]);
    }

    #[test]
    fn accepts_valid_isbn_with_template_separator() {
        let text = "{{cite book |title=Book |isbn=978-0-306-40615-7 |year=2001}}";
        assert!(find_invalid_isbns(text).is_empty());
    }

    #[test]
    fn stops_candidate_before_trailing_year() {
        let text = "isbn: 0-306-40615-2 2005 reprint";
        assert!(find_invalid_isbns(text).is_empty());
    }

    #[test]
    fn label_is_case_insensitive_and_reports_each_invalid() {
        let text = "IsBn 1234567890 and isbn 0306406152 and ISBN 12345";
        assert_eq!(find_invalid_isbns(text), vec!["1234567890", "12345"]);
    }

    #[test]
    fn label_without_digits_is_ignored() {
        assert!(find_invalid_isbns("The ISBN: unknown").is_empty());
        assert!(find_invalid_isbns("isbnless text").is_empty());
    }
}
