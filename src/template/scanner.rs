#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum State {
    Normal,
    SingleQuoted,
}

pub(super) fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start {
        None
    } else {
        std::str::from_utf8(&bytes[start..idx])
            .ok()
            .map(|digits| (idx, digits))
    }
}

pub(super) fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'%'
}

/// Returns the end (exclusive) of a raw parameter name starting at `start`.
pub(super) fn scan_name(bytes: &[u8], start: usize) -> usize {
    let mut idx = start;
    while idx < bytes.len() && is_name_byte(bytes[idx]) {
        idx += 1;
    }
    idx
}

pub(super) fn is_cast_operator(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b':') && bytes.get(idx + 1) == Some(&b':')
}

pub(super) fn is_escaped_quote(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'\'') && bytes.get(idx + 1) == Some(&b'\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_names_with_like_markers() {
        let bytes = b":%name% and";
        assert_eq!(scan_name(bytes, 1), 7);
    }

    #[test]
    fn digits_require_at_least_one() {
        assert_eq!(scan_digits(b"[12]", 1), Some((3, "12")));
        assert_eq!(scan_digits(b"[]", 1), None);
    }
}
