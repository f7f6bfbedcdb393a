//! Numeric recognition for transcribed speech: ASCII digits, Chinese digit
//! characters, and the positional units 十/百 (e.g. 三十 = 30, 一百二十 = 120).

/// Value of a single Chinese digit character.
fn zh_digit_value(c: char) -> Option<u32> {
    match c {
        '零' | '〇' => Some(0),
        '一' => Some(1),
        '二' | '两' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

/// Positional unit value (十 = 10, 百 = 100).
fn zh_unit_value(c: char) -> Option<u32> {
    match c {
        '十' => Some(10),
        '百' => Some(100),
        _ => None,
    }
}

/// Parse a run of ASCII digits after optional spaces/tabs.
/// Returns (value, bytes consumed).
fn parse_int_ascii(s: &str) -> Option<(u32, usize)> {
    let mut consumed = 0;
    for c in s.chars() {
        if c == ' ' || c == '\t' {
            consumed += c.len_utf8();
        } else {
            break;
        }
    }
    let digits_start = consumed;
    let mut value: u32 = 0;
    for c in s[digits_start..].chars() {
        if let Some(d) = c.to_digit(10) {
            value = value.saturating_mul(10).saturating_add(d);
            consumed += c.len_utf8();
        } else {
            break;
        }
    }
    if consumed == digits_start {
        return None;
    }
    Some((value, consumed))
}

/// Parse a Chinese numeral with positional units. A unit with no leading
/// digit counts as one (十五 = 15). Returns (value, bytes consumed).
fn parse_int_zh(s: &str) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut current: u32 = 0;
    let mut seen = false;
    let mut consumed = 0;

    for c in s.chars() {
        if let Some(digit) = zh_digit_value(c) {
            current = digit;
            seen = true;
            consumed += c.len_utf8();
            continue;
        }
        if let Some(unit) = zh_unit_value(c) {
            if !seen || current == 0 {
                current = 1;
            }
            result = result.saturating_add(current.saturating_mul(unit));
            current = 0;
            seen = true;
            consumed += c.len_utf8();
            continue;
        }
        break;
    }

    if !seen {
        return None;
    }
    Some((result.saturating_add(current), consumed))
}

/// ASCII first, Chinese second.
pub fn parse_number_token(s: &str) -> Option<(u32, usize)> {
    parse_int_ascii(s).or_else(|| parse_int_zh(s))
}

/// Last number that ends before an occurrence of `keyword`.
///
/// Occurrences are tried left to right and the first one preceded by any
/// number wins, so `温度高于30度` resolves 30 even though 温度 itself embeds
/// the keyword 度.
pub fn parse_last_number_before(text: &str, keyword: &str) -> Option<u32> {
    for (pos, _) in text.match_indices(keyword) {
        if let Some(value) = last_number_in(&text[..pos]) {
            return Some(value);
        }
    }
    None
}

fn last_number_in(head: &str) -> Option<u32> {
    let mut last = None;
    let mut i = 0;
    while i < head.len() {
        if !head.is_char_boundary(i) {
            i += 1;
            continue;
        }
        if let Some((value, consumed)) = parse_number_token(&head[i..]) {
            last = Some(value);
            i += consumed;
        } else {
            i += 1;
        }
    }
    last
}

/// First number that starts right after an occurrence of `keyword`
/// (`取消闹钟2` → 2).
pub fn parse_first_number_after(text: &str, keyword: &str) -> Option<u32> {
    for (pos, _) in text.match_indices(keyword) {
        if let Some((value, _)) = parse_number_token(&text[pos + keyword.len()..]) {
            return Some(value);
        }
    }
    None
}

/// Percentage extraction: `百分之N`, then `N%`, then a bare number.
pub fn parse_percent_value(text: &str) -> Option<u32> {
    if let Some(pos) = text.find("百分之") {
        let after = &text[pos + "百分之".len()..];
        if let Some((value, _)) = parse_number_token(after) {
            return Some(value);
        }
    }

    let mut i = 0;
    while i < text.len() {
        if !text.is_char_boundary(i) {
            i += 1;
            continue;
        }
        if let Some((value, consumed)) = parse_int_ascii(&text[i..]) {
            let rest = text[i + consumed..].trim_start_matches(' ');
            if rest.starts_with('%') {
                return Some(value);
            }
            i += consumed;
        } else {
            i += 1;
        }
    }

    let mut i = 0;
    while i < text.len() {
        if !text.is_char_boundary(i) {
            i += 1;
            continue;
        }
        if let Some((value, _)) = parse_int_ascii(&text[i..]) {
            return Some(value);
        }
        i += 1;
    }
    None
}
