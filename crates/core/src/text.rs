/// Truncate `s` to at most `max` characters. When truncation happens the
/// result is exactly `max` characters long including the trailing "...".
pub fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Whether two item titles name the same product. Titles are compared on
/// their first five whitespace-delimited tokens, case-insensitively; sharing
/// three or more tokens counts as the same product, as does outright
/// equality. Approximate: a tunable filter, not a guarantee.
pub fn similar_titles(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    let head = |s: &str| -> Vec<String> {
        s.split_whitespace().take(5).map(|t| t.to_lowercase()).collect()
    };
    let head_a = head(a);
    let head_b = head(b);
    let shared = head_a.iter().filter(|t| head_b.contains(t)).count();
    shared >= 3
}
