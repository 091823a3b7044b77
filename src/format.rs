//! Message text to safe markup.
//!
//! The raw text is escaped before anything else, so the only markup in the
//! output is what [`format`] inserts itself: links and line breaks.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://(?:[^\s&]|&amp;)+").expect("valid url pattern"));

// entities come last so a token like `;)` can never eat the tail of `&quot;`
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":thumbsup:|:fire:|&lt;3|:\)|:\(|:D|;\)|:P|:O|(&(?:#\d+|[a-zA-Z]+);)")
        .expect("valid emoji pattern")
});

const EMOJI_TABLE: &[(&str, &str)] = &[
    (":thumbsup:", "👍"),
    (":fire:", "🔥"),
    ("&lt;3", "❤️"),
    (":)", "😊"),
    (":(", "😢"),
    (":D", "😃"),
    (";)", "😉"),
    (":P", "😛"),
    (":O", "😮"),
];

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes `raw`, wraps URLs in links, turns newlines into `<br>` and
/// substitutes emoji tokens in the text between links.
pub fn format(raw: &str) -> String {
    let escaped = escape(raw);
    let mut out = String::with_capacity(escaped.len());
    let mut rest = 0;

    for m in URL.find_iter(&escaped) {
        let url = m.as_str().trim_end_matches(['.', ',', '!', '?', ')', ':']);
        out.push_str(&decorate(&escaped[rest..m.start()]));
        out.push_str(&format!(
            r#"<a href="{url}" target="_blank" rel="noopener noreferrer">{url}</a>"#
        ));
        rest = m.start() + url.len();
    }
    out.push_str(&decorate(&escaped[rest..]));
    out
}

fn decorate(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\n', "<br>");
    EMOJI
        .replace_all(&text, |caps: &Captures| {
            if let Some(entity) = caps.get(1) {
                return entity.as_str().to_owned();
            }
            let token = &caps[0];
            EMOJI_TABLE
                .iter()
                .find(|(t, _)| *t == token)
                .map_or_else(|| token.to_owned(), |(_, emoji)| (*emoji).to_owned())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    static MARKUP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"<a href="[^"<>]*" target="_blank" rel="noopener noreferrer">|</a>|<br>"#).unwrap()
    });

    fn assert_no_raw_markup(out: &str) {
        let stripped = MARKUP.replace_all(out, "");
        assert!(!stripped.contains(['<', '>', '"', '\'']), "raw markup in {out:?}");
        for (i, _) in stripped.match_indices('&') {
            let tail = &stripped[i..];
            assert!(
                ["&amp;", "&lt;", "&gt;", "&quot;", "&#39;"].iter().any(|e| tail.starts_with(e)),
                "bare ampersand in {out:?}"
            );
        }
    }

    #[test]
    fn links_and_emoji() {
        assert_eq!(
            format("hello http://x.test :)"),
            r#"hello <a href="http://x.test" target="_blank" rel="noopener noreferrer">http://x.test</a> 😊"#
        );
    }

    #[test]
    fn script_is_inert() {
        let out = format(r#"<script>alert("x")</script>"#);
        assert_eq!(out, "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;");
    }

    #[test]
    fn newlines_after_links() {
        assert_eq!(
            format("see https://a.test/?q=1&r=2.\nok"),
            r#"see <a href="https://a.test/?q=1&amp;r=2" target="_blank" rel="noopener noreferrer">https://a.test/?q=1&amp;r=2</a>.<br>ok"#
        );
    }

    #[test]
    fn emoji_never_splits_entities() {
        assert_eq!(format(r#""hi";)"#), "&quot;hi&quot;😉");
        assert_eq!(format("i <3 u"), "i ❤️ u");
        assert_eq!(format("a <b"), "a &lt;b");
    }

    #[test]
    fn quotes_cannot_escape_href() {
        let out = format(r#"http://x.test/"onmouseover="alert(1)"#);
        assert_no_raw_markup(&out);
        assert!(out.starts_with(r#"<a href="http://x.test/" "#));
    }

    proptest! {
        #[test]
        fn output_never_contains_unescaped_input(raw in r#"[a-z<>&"' :;()\n/.3DPO]{0,64}|.{0,64}"#) {
            assert_no_raw_markup(&format(&raw));
        }

        #[test]
        fn urls_inside_arbitrary_text_stay_safe(prefix in ".{0,16}", path in "[a-z0-9/?=&<>\"]{0,16}") {
            assert_no_raw_markup(&format(&format!("{prefix} https://x.test/{path}")));
        }
    }
}
