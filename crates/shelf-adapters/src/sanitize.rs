//! Banner markup to plain text.

use scraper::Html;

/// Strips tags, resolves character references and collapses whitespace.
///
/// Returns `None` when nothing but markup and whitespace remains, which the content
/// destination treats as "clear the banner".
pub fn sanitize_banner(markup: &str) -> Option<String> {
    let fragment = Html::parse_fragment(markup);
    let text: String = fragment.root_element().text().collect();
    // split_whitespace also splits on U+00A0, so resolved &nbsp; collapses like a space.
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags() {
        assert_eq!(sanitize_banner("<p>Save 10%!</p>").as_deref(), Some("Save 10%!"));
    }

    #[test]
    fn resolves_ampersand() {
        assert_eq!(sanitize_banner("A&amp;B").as_deref(), Some("A&B"));
    }

    #[test]
    fn resolves_quotes_and_angle_brackets_once() {
        assert_eq!(
            sanitize_banner("&quot;Hi&quot; &#39;there&#39; &lt;b&gt;").as_deref(),
            Some("\"Hi\" 'there' <b>")
        );
        assert_eq!(
            sanitize_banner("<p>Buy&nbsp;one&amp;nbsp;get&nbsp;one &lt;b&gt;free&lt;/b&gt;</p>")
                .as_deref(),
            Some("Buy one&nbsp;get one <b>free</b>")
        );
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(
            sanitize_banner("  <div>\n  Open\t late </div>  <span>today</span>\n").as_deref(),
            Some("Open late today")
        );
    }

    #[test]
    fn empty_markup_clears_the_banner() {
        assert_eq!(sanitize_banner(""), None);
        assert_eq!(sanitize_banner("<p> &nbsp; </p>"), None);
    }
}
