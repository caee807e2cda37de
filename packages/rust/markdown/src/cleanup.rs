//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each pass is a function `&str -> String` applied in sequence. Passes only
//! touch layout: blank lines, fence info strings, stray container tags,
//! relative links, trailing whitespace. Headings and the contents of code
//! fences are never altered.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = normalize_line_endings(md);

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = collapse_blank_lines(&result);
    result = balance_code_fences(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(md: &str) -> String {
    md.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Code fences
// ---------------------------------------------------------------------------

/// Turn class-style info strings (`language-js`, `lang-python`,
/// `highlight-rust`) into plain language hints.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-)([\w+-]+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "$1```$2").to_string()
}

/// Close a code fence left open at the end of the document, so everything
/// after it is not swallowed into a code block by renderers.
pub fn balance_code_fences(md: &str) -> String {
    let fence_count = md
        .lines()
        .filter(|line| line.trim_start().starts_with("```"))
        .count();

    if fence_count % 2 == 0 {
        return md.to_string();
    }

    let mut result = md.trim_end_matches('\n').to_string();
    result.push_str("\n```\n");
    result
}

// ---------------------------------------------------------------------------
// Leftover HTML
// ---------------------------------------------------------------------------

/// Remove layout tags that survived conversion, keeping their text.
/// Code blocks are passed through untouched.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Resolve relative URLs in Markdown links (not images) against a base URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let mut in_code = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code = !in_code;
                return line.to_string();
            }
            if in_code {
                line.to_string()
            } else {
                LINK_RE
                    .replace_all(line, |caps: &regex::Captures| resolve_link(caps, base))
                    .to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite one relative link; images and absolute targets pass through.
fn resolve_link(caps: &regex::Captures, base: &Url) -> String {
    let bang = &caps[1];
    let text = &caps[2];
    let href = &caps[3];

    let is_absolute = href.starts_with("http://")
        || href.starts_with("https://")
        || href.starts_with('#')
        || href.starts_with("mailto:");

    if !bang.is_empty() || is_absolute {
        return caps[0].to_string();
    }

    match base.join(href) {
        Ok(resolved) => format!("[{text}]({resolved})"),
        Err(_) => caps[0].to_string(),
    }
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace outside code fences. Two or more trailing
/// spaces before a continuation line form a hard line break and are kept
/// as exactly two.
fn normalize_whitespace(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();
    let mut in_code = false;
    let mut out = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            out.push(line.trim_end().to_string());
            continue;
        }
        if in_code {
            out.push(line.to_string());
            continue;
        }

        let trimmed = line.trim_end();
        let continues = lines.get(idx + 1).is_some_and(|next| {
            !next.trim().is_empty() && !next.trim_start().starts_with("```")
        });
        let hard_break = line.ends_with("  ")
            && !trimmed.is_empty()
            && !trimmed.trim_start().starts_with('#')
            && continues;

        if hard_break {
            out.push(format!("{trimmed}  "));
        } else {
            out.push(trimmed.to_string());
        }
    }

    out.join("\n")
}

/// Collapse runs of blank lines into a single blank line, outside code fences.
fn collapse_blank_lines(md: &str) -> String {
    let mut in_code = false;
    let mut out: Vec<&str> = Vec::new();

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        } else if !in_code
            && line.trim().is_empty()
            && out.last().is_some_and(|prev| prev.trim().is_empty())
        {
            continue;
        }
        out.push(line);
    }

    out.join("\n")
}

/// Drop leading blank lines and end the file with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_start_matches('\n').trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
