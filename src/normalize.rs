//! Source normalisation for the syntactic-difference gate.
//!
//! Two chunks are considered the same mutation-wise when they differ only in
//! comments, `MUTANT` annotations or whitespace between tokens.

use regex::Regex;
use std::sync::OnceLock;

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?://|#)\s*MUTANT\s*(?:START|END)\b.*(?:\r?\n|$)")
            .expect("marker regex is valid")
    })
}

/// Remove `# MUTANT START` / `# MUTANT END` annotation lines.
pub fn strip_mutant_markers(code: &str) -> String {
    marker_re().replace_all(code, "").into_owned()
}

/// Drop `#` comments, leaving `#` inside string literals alone.
pub fn strip_comments(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' | '\'' => {
                let end = literal_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '#' => {
                // Skip to end of line, keep the newline itself.
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Canonical form: markers and comments removed, string literals kept
/// verbatim, other whitespace kept only where it separates two word
/// characters (and then as a single space).
pub fn normalize(code: &str) -> String {
    let stripped = strip_comments(&strip_mutant_markers(code));
    let chars: Vec<char> = stripped.chars().collect();

    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }
        if pending_space && is_word(c) && out.chars().last().map(is_word).unwrap_or(false) {
            out.push(' ');
        }
        pending_space = false;

        if c == '"' || c == '\'' {
            let end = literal_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

/// Index one past the string literal that opens at `start`.
///
/// Handles triple quotes and backslash escapes. An unterminated single-quoted
/// literal ends at the newline; anything else unterminated runs to the end.
fn literal_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let is_triple_at = |i: usize| chars.get(i) == Some(&quote) && chars.get(i + 1) == Some(&quote);
    let triple = is_triple_at(start + 1);
    let width = if triple { 3 } else { 1 };

    let mut i = start + width;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote && (!triple || is_triple_at(i + 1)) => return i + width,
            '\n' if !triple => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub fn is_syntactically_identical(original: &str, mutated: &str) -> bool {
    normalize(original) == normalize(mutated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_only_change_is_identical() {
        assert!(is_syntactically_identical("return x + 1", "return x+1"));
        assert!(is_syntactically_identical(
            "def f(a, b):\n    return a+b\n",
            "def f(a,b):\n\n        return a + b"
        ));
    }

    #[test]
    fn test_comment_and_marker_changes_are_identical() {
        let original = "def f(x):\n    return x + 1\n";
        let mutated = "def f(x):\n    # MUTANT START\n    return x + 1  # still the same\n    # MUTANT END\n";
        assert!(is_syntactically_identical(original, mutated));
    }

    #[test]
    fn test_real_changes_are_detected() {
        assert!(!is_syntactically_identical("return x + 1", "return x - 1"));
        assert!(!is_syntactically_identical("return not x", "return notx"));
        assert!(!is_syntactically_identical(
            "log.info('user %s', uid)",
            "log.info('user %s', email)"
        ));
    }

    #[test]
    fn test_hash_inside_string_is_kept() {
        assert_eq!(strip_comments("s = '#tag'  # note\n"), "s = '#tag'  \n");
        assert!(!is_syntactically_identical("s = '#a'", "s = '#b'"));
    }

    #[test]
    fn test_whitespace_inside_strings_is_significant() {
        assert!(!is_syntactically_identical(
            "return \" \".join(parts)",
            "return \"\".join(parts)"
        ));
        assert!(!is_syntactically_identical(
            "headers['Authorization'] = 'Bearer ' + token",
            "headers['Authorization'] = 'Bearer' + token"
        ));
        assert_eq!(normalize("x = ' a  b '  +  y"), "x=' a  b '+y");
    }

    #[test]
    fn test_triple_quoted_strings() {
        let original = "def f():\n    \"\"\"Say \"hi\" # not a comment\"\"\"\n    return 1\n";
        assert_eq!(strip_comments(original), original);
        assert_eq!(normalize(original), "def f():\"\"\"Say \"hi\" # not a comment\"\"\"return 1");
        assert!(is_syntactically_identical(original, &original.replace("return 1", "return  1")));
    }

    #[test]
    fn test_escaped_quote_does_not_end_literal() {
        assert_eq!(normalize("s = 'it\\'s  # here'"), "s='it\\'s  # here'");
    }

    #[test]
    fn test_strip_markers_keeps_code() {
        let code = "    // MUTANT START\n    x = 1\n    # MUTANT END\n";
        assert_eq!(strip_mutant_markers(code), "    x = 1\n");
    }
}
