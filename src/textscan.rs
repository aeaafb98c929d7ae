//! Small numeric scanners shared by the compute tool and the sanity checker.
//!
//! These replace ad-hoc regular expressions: each helper walks the text once
//! and extracts numbers anchored to a unit suffix or a pack-notation shape.

/// All numbers immediately followed (modulo whitespace) by `unit`,
/// case-insensitive. The match must sit on word boundaries: `"3400mAh"`
/// yields 3400 for unit `"mah"`, but `"mah"` inside a longer word does not
/// match, and the digits must not continue a preceding word. Thousands
/// separators inside the number are tolerated (`"1,200 Wh"`).
pub fn numbers_with_unit(text: &str, unit: &str) -> Vec<f64> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut idx = 0;

    while idx < bytes.len() {
        if !bytes[idx].is_ascii_digit() || !starts_token(bytes, idx) {
            idx += 1;
            continue;
        }

        let (value, end) = read_number(bytes, idx);
        let mut cursor = end;
        while cursor < bytes.len() && bytes[cursor] == b' ' {
            cursor += 1;
        }

        if matches_unit(&text[cursor..], unit) {
            found.push(value);
        }
        idx = end;
    }

    found
}

/// Parse battery pack notation like `"13S4P"` or `"14 s 5 p"` anywhere in
/// the text, returning (series, parallel).
pub fn pack_notation(text: &str) -> Option<(u32, u32)> {
    let bytes = text.as_bytes();
    let mut idx = 0;

    while idx < bytes.len() {
        if !bytes[idx].is_ascii_digit() || !starts_token(bytes, idx) {
            idx += 1;
            continue;
        }

        if let Some(parsed) = pack_at(bytes, idx) {
            return Some(parsed);
        }
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
    }

    None
}

fn pack_at(bytes: &[u8], start: usize) -> Option<(u32, u32)> {
    let (series, mut idx) = read_integer(bytes, start)?;
    idx = skip_spaces(bytes, idx);
    if !matches!(bytes.get(idx), Some(b's' | b'S')) {
        return None;
    }
    idx = skip_spaces(bytes, idx + 1);
    let (parallel, mut idx) = read_integer(bytes, idx)?;
    idx = skip_spaces(bytes, idx);
    if !matches!(bytes.get(idx), Some(b'p' | b'P')) {
        return None;
    }
    // Trailing letters would make this a longer word, not pack notation.
    if bytes
        .get(idx + 1)
        .is_some_and(|next| next.is_ascii_alphanumeric())
    {
        return None;
    }
    Some((series, parallel))
}

fn starts_token(bytes: &[u8], idx: usize) -> bool {
    idx == 0
        || !(bytes[idx - 1].is_ascii_alphanumeric()
            || bytes[idx - 1] == b'.'
            || bytes[idx - 1] == b',')
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx] == b' ' {
        idx += 1;
    }
    idx
}

fn read_integer(bytes: &[u8], start: usize) -> Option<(u32, usize)> {
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..end])
        .ok()?
        .parse()
        .ok()
        .map(|value| (value, end))
}

fn read_number(bytes: &[u8], start: usize) -> (f64, usize) {
    let mut end = start;
    let mut raw = String::new();
    let mut seen_dot = false;

    while end < bytes.len() {
        match bytes[end] {
            digit @ b'0'..=b'9' => raw.push(digit as char),
            b',' if bytes.get(end + 1).is_some_and(u8::is_ascii_digit) => {}
            b'.' if !seen_dot && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) => {
                seen_dot = true;
                raw.push('.');
            }
            _ => break,
        }
        end += 1;
    }

    (raw.parse().unwrap_or(0.0), end)
}

fn matches_unit(rest: &str, unit: &str) -> bool {
    if rest.len() < unit.len() {
        return false;
    }
    let (candidate, tail) = rest.split_at(unit.len());
    candidate.eq_ignore_ascii_case(unit)
        && !tail
            .chars()
            .next()
            .is_some_and(|next| next.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_numbers_with_tight_and_spaced_units() {
        assert_eq!(numbers_with_unit("a 3400mAh cell", "mah"), vec![3400.0]);
        assert_eq!(numbers_with_unit("roughly 5.5 Ah rated", "ah"), vec![5.5]);
    }

    #[test]
    fn unit_match_is_case_insensitive() {
        assert_eq!(numbers_with_unit("750 WH pack", "wh"), vec![750.0]);
    }

    #[test]
    fn rejects_unit_inside_longer_word() {
        assert!(numbers_with_unit("12 ahead of schedule", "ah").is_empty());
    }

    #[test]
    fn mah_does_not_match_bare_ah_scan() {
        // "3400mAh": the digits are followed by "mAh", so an "ah" scan must
        // not fire (the suffix starts with 'm').
        assert!(numbers_with_unit("3400mAh", "ah").is_empty());
        assert_eq!(numbers_with_unit("3400mAh", "mah"), vec![3400.0]);
    }

    #[test]
    fn thousands_separator_is_tolerated() {
        assert_eq!(numbers_with_unit("about 1,200 Wh total", "wh"), vec![1200.0]);
    }

    #[test]
    fn multiple_matches_in_order() {
        assert_eq!(
            numbers_with_unit("2.5Ah min and 6.0Ah max", "ah"),
            vec![2.5, 6.0]
        );
    }

    #[test]
    fn pack_notation_compact_and_spaced() {
        assert_eq!(pack_notation("a 13S4P pack"), Some((13, 4)));
        assert_eq!(pack_notation("14 s 5 p build"), Some((14, 5)));
        assert_eq!(pack_notation("20s1p"), Some((20, 1)));
    }

    #[test]
    fn pack_notation_rejects_longer_words() {
        assert_eq!(pack_notation("13s4pack"), None);
        assert_eq!(pack_notation("no notation here"), None);
    }

    #[test]
    fn decimal_numbers_parse() {
        assert_eq!(numbers_with_unit("3.6V nominal", "v"), vec![3.6]);
    }
}
