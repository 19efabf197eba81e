/// Remove a top-level trailing `ORDER BY ...` clause.
///
/// Text-level only: quoted literals, quoted identifiers and parenthesised
/// subqueries are skipped, everything from the last top-level `ORDER BY` to the
/// end is dropped. Whitespace before the clause is kept.
#[must_use]
pub fn strip_trailing_order_by(sql: &str) -> &str {
    match last_top_level_order_by(sql) {
        Some(pos) => &sql[..pos],
        None => sql,
    }
}

fn last_top_level_order_by(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut found = None;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            idx += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'o' | b'O' if depth == 0 && is_order_by_at(bytes, idx) => found = Some(idx),
            _ => {}
        }
        idx += 1;
    }
    found
}

fn is_order_by_at(bytes: &[u8], idx: usize) -> bool {
    let word_start = idx == 0 || !is_word_byte(bytes[idx - 1]);
    if !word_start || !keyword_at(bytes, idx, b"order") {
        return false;
    }
    let mut next = idx + 5;
    let ws_start = next;
    while next < bytes.len() && bytes[next].is_ascii_whitespace() {
        next += 1;
    }
    next > ws_start && keyword_at(bytes, next, b"by")
}

fn keyword_at(bytes: &[u8], idx: usize, keyword: &[u8]) -> bool {
    let end = idx + keyword.len();
    end <= bytes.len()
        && bytes[idx..end].eq_ignore_ascii_case(keyword)
        && bytes.get(end).is_none_or(|b| !is_word_byte(*b))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
