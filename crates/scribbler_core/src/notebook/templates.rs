//! Front matter written into newly created sources.

use crate::model::content::MarkupKind;

/// Initial file contents for a new note or appendix.
///
/// Appendices pass `None` and get no date field.
pub(crate) fn front_matter(markup: MarkupKind, title: &str, date: Option<&str>) -> String {
    match markup {
        MarkupKind::Markdown => {
            let mut text = format!("Title: {title}\n");
            if let Some(date) = date {
                text.push_str(&format!("Date: {date}\n"));
            }
            text.push('\n');
            text
        }
        MarkupKind::ReStructuredText => {
            let underline = "#".repeat(title.chars().count().max(1));
            let mut text = format!("{title}\n{underline}\n\n");
            if let Some(date) = date {
                text.push_str(&format!(":date: {date}\n\n"));
            }
            text
        }
        MarkupKind::Html => {
            let date_meta = date
                .map(|date| format!("    <meta name=\"date\" content=\"{date}\" />\n"))
                .unwrap_or_default();
            format!(
                "<html>\n  <head>\n    <title>{}</title>\n{date_meta}  </head>\n  <body>\n  </body>\n</html>\n",
                escape_html(title)
            )
        }
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
