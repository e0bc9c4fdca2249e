//! Shared utilities for the cache library.

/// Escape Redis glob metacharacters so `input` matches only itself in a
/// `SCAN MATCH` pattern.
pub fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Match `text` against a Redis-style glob pattern.
///
/// Supports `*`, `?`, `[...]` classes (with `^` negation and `a-z` ranges)
/// and `\` escapes, which is the subset `SCAN MATCH` patterns use.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match first {
        '*' => (0..=text.len()).any(|skip| glob_match_from(rest, &text[skip..])),
        '?' => !text.is_empty() && glob_match_from(rest, &text[1..]),
        '[' => {
            let Some((&c, text_rest)) = text.split_first() else {
                return false;
            };
            match match_class(rest, c) {
                Some((true, after)) => glob_match_from(after, text_rest),
                Some((false, _)) => false,
                // Unterminated class: treat '[' literally.
                None => c == '[' && glob_match_from(rest, text_rest),
            }
        }
        '\\' if !rest.is_empty() => {
            !text.is_empty() && text[0] == rest[0] && glob_match_from(&rest[1..], &text[1..])
        }
        literal => !text.is_empty() && text[0] == literal && glob_match_from(rest, &text[1..]),
    }
}

/// Match `c` against the class body following a `[`.
///
/// Returns whether it matched and the pattern remaining after the closing `]`.
fn match_class(pattern: &[char], c: char) -> Option<(bool, &[char])> {
    let (negated, mut i) = match pattern.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while i < pattern.len() {
        match pattern[i] {
            ']' => return Some((matched != negated, &pattern[i + 1..])),
            '\\' if i + 1 < pattern.len() => {
                matched |= pattern[i + 1] == c;
                i += 2;
            }
            start if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' => {
                let end = pattern[i + 2];
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                matched |= lo <= c && c <= hi;
                i += 3;
            }
            literal => {
                matched |= literal == c;
                i += 1;
            }
        }
    }

    None
}
