use scraper::{ElementRef, Html, Node};

/// Subtrees that never contribute readable text.
const SKIP_TAGS: [&str; 6] = ["script", "style", "meta", "noscript", "svg", "template"];

/// Visible text of a document, one text run per line.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let root = document
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
        .unwrap_or_else(|| document.root_element());

    let mut parts = Vec::new();
    collect_text(root, &SKIP_TAGS, &mut parts);
    clean_whitespace(&parts.join("\n"))
}

/// Contents of the first `<title>` element, if any.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "title")?;

    let text = collapse_inline(&title.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Recursively collect text runs under `element`, skipping the listed tags.
pub(crate) fn collect_text(element: ElementRef, skip_tags: &[&str], parts: &mut Vec<String>) {
    if skip_tags.contains(&element.value().name()) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let t = text.trim();
                if !t.is_empty() {
                    parts.push(t.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, skip_tags, parts);
                }
            }
            _ => {}
        }
    }
}

/// Collapse every whitespace run (newlines included) to a single space.
pub(crate) fn collapse_inline(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse blanks inside lines and drop empty lines.
fn clean_whitespace(text: &str) -> String {
    text.lines()
        .map(collapse_inline)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head>
            <title>  Quarterly
              Report </title>
            <meta name="description" content="hidden">
            <style>body { color: red; }</style>
          </head>
          <body>
            <h1>Results</h1>
            <p>Revenue   grew <b>12%</b>.</p>
            <script>var tracking = "do not show";</script>
            <noscript>Enable JavaScript</noscript>
          </body>
        </html>"#;

    #[test]
    fn test_visible_text_skips_hidden_content() {
        let text = visible_text(PAGE);

        assert!(text.contains("Results"));
        assert!(text.contains("Revenue grew"));
        assert!(text.contains("12%"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("Enable JavaScript"));
        assert!(!text.contains("Quarterly"));
    }

    #[test]
    fn test_page_title() {
        assert_eq!(page_title(PAGE).as_deref(), Some("Quarterly Report"));
        assert_eq!(page_title("<html><body>no title</body></html>"), None);
    }

    #[test]
    fn test_fragment_without_body() {
        let text = visible_text("<div>alpha</div><div>beta</div>");
        assert_eq!(text, "alpha\nbeta");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
