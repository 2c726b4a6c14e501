//! Scanning generated markup for image placeholder tokens.
//!
//! A token looks like `{{generate_image: a red shoe on white}}`. The prefix is
//! case-sensitive and the description runs up to the first `}}`, possibly
//! across lines. Unterminated tokens are left alone.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

pub const TOKEN_PREFIX: &str = "{{generate_image:";
pub const TOKEN_SUFFIX: &str = "}}";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{generate_image:(.*?)\}\}").expect("placeholder pattern is valid")
});

/// One occurrence of a placeholder token in a scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderToken<'a> {
    /// The exact substring to replace, delimiters included.
    pub raw_match: &'a str,
    /// Trimmed inner description; the cache key and provider prompt.
    pub prompt: &'a str,
    /// Byte range of `raw_match` within the scanned text.
    pub span: Range<usize>,
}

/// Lazily yields every placeholder token in `text`, left to right,
/// duplicates included.
pub fn scan(text: &str) -> impl Iterator<Item = PlaceholderToken<'_>> {
    TOKEN_RE.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        let inner = caps.get(1)?;
        Some(PlaceholderToken {
            raw_match: whole.as_str(),
            prompt: inner.as_str().trim(),
            span: whole.range(),
        })
    })
}

/// Wraps a prompt in placeholder syntax.
#[cfg(test)]
pub(crate) fn placeholder_for(prompt: &str) -> String {
    format!("{TOKEN_PREFIX} {prompt}{TOKEN_SUFFIX}")
}

/// Rebuilds `text` with each token span replaced by `replacement(token)`.
///
/// Replacement is positional so text outside the spans is copied untouched,
/// even when it happens to repeat a token's raw text.
/// Tokens for which `replacement` returns `None` are kept verbatim.
pub fn substitute<'t, 'r, F>(
    text: &'t str,
    tokens: &[PlaceholderToken<'t>],
    mut replacement: F,
) -> String
where
    F: FnMut(&PlaceholderToken<'t>) -> Option<&'r str>,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for token in tokens {
        let Some(value) = replacement(token) else {
            continue;
        };
        out.push_str(&text[cursor..token.span.start]);
        out.push_str(value);
        cursor = token.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_tokens_in_order_with_duplicates() {
        let text = "<img src='{{generate_image: red shoe}}'><p>x</p>\
                    <img src=\"{{generate_image:blue hat }}\"><img src='{{generate_image: red shoe}}'>";
        let prompts: Vec<_> = scan(text).map(|t| t.prompt).collect();
        assert_eq!(prompts, vec!["red shoe", "blue hat", "red shoe"]);
    }

    #[test]
    fn test_span_points_at_raw_match() {
        let text = "before {{generate_image: cat}} after";
        let token = scan(text).next().unwrap();
        assert_eq!(token.raw_match, "{{generate_image: cat}}");
        assert_eq!(&text[token.span.clone()], token.raw_match);
    }

    #[test]
    fn test_non_greedy_stops_at_first_suffix() {
        let text = "{{generate_image: a}} middle }} {{generate_image: b}}";
        let prompts: Vec<_> = scan(text).map(|t| t.prompt).collect();
        assert_eq!(prompts, vec!["a", "b"]);
    }

    #[test]
    fn test_unterminated_token_is_ignored() {
        let text = "{{generate_image: dangling description with no end";
        assert_eq!(scan(text).count(), 0);

        let text = "{{generate_image: ok}} then {{generate_image: broken";
        let prompts: Vec<_> = scan(text).map(|t| t.prompt).collect();
        assert_eq!(prompts, vec!["ok"]);
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        assert_eq!(scan("{{Generate_Image: cat}}").count(), 0);
    }

    #[test]
    fn test_multiline_description() {
        let text = "{{generate_image: a lighthouse\n at dusk}}";
        assert_eq!(scan(text).next().unwrap().prompt, "a lighthouse\n at dusk");
    }

    #[test]
    fn test_substitute_is_positional() {
        let text = "A{{generate_image: x}}B{{generate_image: y}}C";
        let tokens: Vec<_> = scan(text).collect();
        let out = substitute(text, &tokens, |t| match t.prompt {
            "x" => Some("/one.png"),
            _ => None,
        });
        assert_eq!(out, "A/one.pngB{{generate_image: y}}C");
    }

    #[test]
    fn test_placeholder_for_round_trips_through_scan() {
        let text = placeholder_for("mountain lake");
        assert_eq!(scan(&text).next().unwrap().prompt, "mountain lake");
    }
}
