//! HTML-to-Markdown conversion, cleanup passes, and markdown utilities.
//!
//! Fetched pages are converted with the `htmd` crate after the main content
//! container is located with `scraper`; a series of cleanup passes then
//! normalizes whitespace, code fences, and links. The same passes tidy
//! markdown coming back from the completion service.

mod cleanup;

use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use docmodern_shared::{DocModernError, Result};

pub use cleanup::balance_code_fences;

/// Tags dropped during conversion: page chrome and non-content elements.
const SKIP_TAGS: [&str; 9] = [
    "script", "style", "nav", "header", "footer", "iframe", "noscript", "svg", "aside",
];

/// Content containers, most specific first.
const CONTENT_SELECTORS: [&str; 6] = [
    "main",
    "article",
    "[role=\"main\"]",
    ".content",
    ".documentation",
    ".markdown-body",
];

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML page to clean Markdown.
///
/// 1. Locate the main content container (falls back to `<body>`)
/// 2. Pre-process HTML tables into markdown tables
/// 3. Convert HTML → Markdown via `htmd`, skipping page chrome
/// 4. Run the cleanup pipeline, resolving relative links against `source_url`
#[instrument(skip(html), fields(url = source_url))]
pub fn convert(html: &str, source_url: &str) -> Result<String> {
    let content_html = extract_content_html(html);
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| DocModernError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(source_url).ok();
    let markdown = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    debug!(final_len = markdown.len(), "conversion complete");
    Ok(markdown)
}

/// Normalize markdown that did not come from HTML (plain-text bodies,
/// completion-service output). Links are left as written.
pub fn normalize(md: &str) -> String {
    cleanup::run_pipeline(md, None)
}

/// True when the document has no visible content.
pub fn is_blank(md: &str) -> bool {
    md.trim().is_empty()
}

// ---------------------------------------------------------------------------
// Markdown utilities
// ---------------------------------------------------------------------------

/// Remove a fence wrapping the whole document, e.g. a reply that starts
/// with ```` ```markdown ```` and ends with ```` ``` ````. Code blocks inside
/// the wrapper are kept.
pub fn strip_outer_fence(md: &str) -> String {
    let trimmed = md.trim();
    let lines: Vec<&str> = trimmed.lines().collect();

    let Some(info) = lines.first().and_then(|l| l.trim().strip_prefix("```")) else {
        return trimmed.to_string();
    };
    let closed = lines.len() > 1 && lines.last().is_some_and(|l| l.trim() == "```");
    let inner = if closed {
        &lines[1..lines.len() - 1]
    } else {
        &lines[1..]
    };

    let unwrap = match info.trim().to_ascii_lowercase().as_str() {
        "markdown" | "md" => true,
        "" => closed && wraps_whole_document(inner),
        _ => false,
    };

    if unwrap {
        inner.join("\n").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// True when no bare fence inside an untagged wrapper closes it early.
fn wraps_whole_document(inner: &[&str]) -> bool {
    let mut open = false;
    for line in inner {
        let Some(info) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        if open {
            open = false;
        } else if info.trim().is_empty() {
            return false;
        } else {
            open = true;
        }
    }
    !open
}

/// Truncate to at most `max_chars` characters, on a char boundary, with a marker.
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((byte_idx, _)) => {
            let truncated = &content[..byte_idx];
            format!("{truncated}\n\n[... content truncated for LLM context window ...]")
        }
    }
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Convert HTML `<table>` elements to markdown table syntax before htmd conversion.
///
/// `htmd` 0.1 doesn't support table conversion, so we handle it manually.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let Ok(table_sel) = scraper::Selector::parse("table") else {
        return html.to_string();
    };

    let mut result = html.to_string();
    for table_el in doc.select(&table_sel) {
        let md_table = html_table_to_markdown(&table_el);
        result = result.replacen(&table_el.html(), &md_table, 1);
    }
    result
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let (Ok(tr_sel), Ok(th_sel), Ok(td_sel)) = (
        scraper::Selector::parse("tr"),
        scraper::Selector::parse("th"),
        scraper::Selector::parse("td"),
    ) else {
        return String::new();
    };

    let cell_text = |cell: scraper::ElementRef| {
        cell.text()
            .collect::<String>()
            .trim()
            .replace('|', "\\|")
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&tr_sel) {
        let ths: Vec<String> = tr.select(&th_sel).map(cell_text).collect();
        if !ths.is_empty() {
            has_header = true;
            rows.push(ths);
            continue;
        }

        let tds: Vec<String> = tr.select(&td_sel).map(cell_text).collect();
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let render_row = |row: &[String]| format!("| {} |\n", row.join(" | "));

    let mut md = String::from("\n\n");
    md.push_str(&render_row(&rows[0]));
    md.push_str(&render_row(&vec!["---".to_string(); col_count]));

    let data_start = usize::from(has_header);
    for row in &rows[data_start..] {
        md.push_str(&render_row(row));
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the main content HTML; `<body>` when no container matches.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    for sel_str in CONTENT_SELECTORS {
        if let Ok(selector) = scraper::Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = scraper::Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    html.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
