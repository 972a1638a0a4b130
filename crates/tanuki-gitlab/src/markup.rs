//! HTML formatting primitives for Telegram-style rich text.

/// Escapes text for inclusion in an HTML-formatted chat message.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn bold(text: &str) -> String {
    format!("<b>{}</b>", escape_html(text))
}

pub fn fixed(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

pub fn link(text: &str, href: &str) -> String {
    if href.trim().is_empty() {
        return escape_html(text);
    }
    format!("<a href=\"{}\">{}</a>", escape_html(href), escape_html(text))
}

/// Truncates to `max` characters, appending an ellipsis when shortened.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max).collect::<String>();
    truncated.push('…');
    truncated
}

/// Returns the first `len` characters, used for abbreviated SHAs.
pub fn short_sha(sha: &str, len: usize) -> String {
    sha.chars().take(len).collect()
}

/// Summary card shown when a follow-up cannot be threaded under its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPreview {
    pub title: String,
    pub headline: String,
    pub text: String,
    pub url: String,
}

impl LinkPreview {
    pub fn new(
        title: impl Into<String>,
        headline: impl Into<String>,
        text: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            headline: headline.into(),
            text: text.into(),
            url: url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_markup_escapes_user_text() {
        assert_eq!(bold("a<b>"), "<b>a&lt;b&gt;</b>");
        assert_eq!(
            link("fix & ship", "https://x/y?a=1&b=2"),
            "<a href=\"https://x/y?a=1&amp;b=2\">fix &amp; ship</a>"
        );
        assert_eq!(link("plain", " "), "plain");
        assert_eq!(fixed("url"), "<code>url</code>");
    }

    #[test]
    fn unit_truncate_chars_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll…");
        assert_eq!(short_sha("abc", 10), "abc");
    }
}
