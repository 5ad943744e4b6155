//! Text folding used for option matching and command detection.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Fold user text for comparison.
///
/// Decomposes, drops combining marks (so `início` == `inicio`), lowercases,
/// turns punctuation into spaces and collapses whitespace. Emoji vanish.
pub fn normalize(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters (not bytes).
pub fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
