#![forbid(unsafe_code)]

/// Hex-character positions at which a card value differs from a requested one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DifferenceReport {
    pub indices: Vec<usize>,
    /// `^` under each differing character, cut at the display limit.
    pub caret_line: String,
}

impl DifferenceReport {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Positions past the end of the shorter value count as differences.
pub fn difference_report(on_card: &str, requested: &str, display_limit: usize) -> DifferenceReport {
    let a = on_card.as_bytes();
    let b = requested.as_bytes();
    let len = a.len().max(b.len());

    let mut indices = Vec::new();
    for i in 0..len {
        let same = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
            _ => false,
        };
        if !same {
            indices.push(i);
        }
    }

    let mut caret_line = String::with_capacity(len.min(display_limit));
    let mut next = indices.iter().peekable();
    for i in 0..len.min(display_limit) {
        if next.peek() == Some(&&i) {
            caret_line.push('^');
            next.next();
        } else {
            caret_line.push(' ');
        }
    }
    let trimmed = caret_line.trim_end().len();
    caret_line.truncate(trimmed);

    DifferenceReport {
        indices,
        caret_line,
    }
}

/// Shortens a value for log lines.
pub fn truncate_for_display(value: &str, display_limit: usize) -> String {
    match value.char_indices().nth(display_limit) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_diff_01_carets_under_each_difference() {
        let r = difference_report("0154455354ff", "0154455324ff", 50);
        assert_eq!(r.indices, vec![8]);
        assert_eq!(r.caret_line, "        ^");
    }

    #[test]
    fn at_diff_02_case_is_ignored_and_equal_values_are_empty() {
        let r = difference_report("ABCD", "abcd", 50);
        assert!(r.is_empty());
        assert_eq!(r.caret_line, "");
    }

    #[test]
    fn at_diff_03_length_mismatch_and_display_limit() {
        let r = difference_report("00", "0011", 50);
        assert_eq!(r.indices, vec![2, 3]);
        assert_eq!(r.caret_line, "  ^^");

        let r = difference_report(&"0".repeat(60), &"1".repeat(60), 4);
        assert_eq!(r.indices.len(), 60);
        assert_eq!(r.caret_line, "^^^^");
    }

    #[test]
    fn at_diff_04_truncation_adds_ellipsis() {
        assert_eq!(truncate_for_display("abcdef", 4), "abcd...");
        assert_eq!(truncate_for_display("abcd", 4), "abcd");
    }
}
