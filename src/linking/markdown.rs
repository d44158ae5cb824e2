use once_cell::sync::Lazy;
use regex::Regex;

static BLOCK_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

/// Renders the subset of markdown used in article bodies: `##`/`###` headers,
/// `**bold**`, `- ` lists, blank-line paragraphs and single-newline breaks.
/// Raw HTML in the source is escaped.
pub fn render_markdown(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut html = String::new();
    for block in BLOCK_SEPARATOR.split(normalized.trim()) {
        render_block(block, &mut html);
    }
    html
}

fn render_block(block: &str, out: &mut String) {
    let mut paragraph: Vec<String> = Vec::new();
    let mut items: Vec<String> = Vec::new();

    for line in block.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(text) = line.strip_prefix("### ") {
            flush_paragraph(&mut paragraph, out);
            flush_list(&mut items, out);
            out.push_str(&format!("<h3>{}</h3>\n", heading(text)));
        } else if let Some(text) = line.strip_prefix("## ") {
            flush_paragraph(&mut paragraph, out);
            flush_list(&mut items, out);
            out.push_str(&format!("<h2>{}</h2>\n", heading(text)));
        } else if let Some(item) = line.strip_prefix("- ") {
            flush_paragraph(&mut paragraph, out);
            items.push(inline(item.trim()));
        } else {
            flush_list(&mut items, out);
            paragraph.push(inline(line.trim()));
        }
    }

    flush_paragraph(&mut paragraph, out);
    flush_list(&mut items, out);
}

fn flush_paragraph(lines: &mut Vec<String>, out: &mut String) {
    if lines.is_empty() {
        return;
    }
    out.push_str(&format!("<p>{}</p>\n", lines.join("<br />")));
    lines.clear();
}

fn flush_list(items: &mut Vec<String>, out: &mut String) {
    if items.is_empty() {
        return;
    }
    out.push_str("<ul>");
    for item in items.drain(..) {
        out.push_str(&format!("<li>{}</li>", item));
    }
    out.push_str("</ul>\n");
}

// `### **Title**` renders the same as `### Title`
fn heading(text: &str) -> String {
    let text = text.trim();
    let text = text
        .strip_prefix("**")
        .and_then(|t| t.strip_suffix("**"))
        .unwrap_or(text);
    escape(text)
}

fn inline(text: &str) -> String {
    BOLD.replace_all(&escape(text), "<strong>$1</strong>").into_owned()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escapes a value for use inside a double- or single-quoted HTML attribute.
pub(crate) fn escape_attribute(value: &str) -> String {
    escape(value).replace('"', "&quot;").replace('\'', "&#39;")
}
