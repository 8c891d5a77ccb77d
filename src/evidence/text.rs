//! Document text extraction and chunking

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const MAX_CHUNK_CHARS: usize = 1200;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "from", "about", "what",
    "which", "where", "when", "does", "did", "have", "has", "had", "how", "much", "many", "into",
    "their", "they", "them", "its", "our", "your", "been", "will", "would", "could", "should",
    "can", "not", "but", "all", "any", "also", "than", "then", "there", "these", "those", "such",
    "over", "per", "of", "in", "on", "to", "by", "as", "at", "or", "an", "is", "it", "be", "a",
];

struct HtmlPatterns {
    hidden: Regex,
    block_end: Regex,
    cell_end: Regex,
    tag: Regex,
    numeric_entity: Regex,
    hex_entity: Regex,
    spaces: Regex,
    blank_lines: Regex,
}

fn html_patterns() -> &'static HtmlPatterns {
    static PATTERNS: OnceLock<HtmlPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HtmlPatterns {
        hidden: Regex::new(
            r"(?is)<script\b.*?</script>|<style\b.*?</style>|<ix:header\b.*?</ix:header>|<!--.*?-->",
        )
        .expect("valid regex"),
        block_end: Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|li|table|h[1-6])\s*>").expect("valid regex"),
        cell_end: Regex::new(r"(?i)</t[dh]\s*>").expect("valid regex"),
        tag: Regex::new(r"(?s)<[^>]*>").expect("valid regex"),
        numeric_entity: Regex::new(r"&#(\d{1,7});").expect("valid regex"),
        hex_entity: Regex::new(r"(?i)&#x([0-9a-f]{1,6});").expect("valid regex"),
        spaces: Regex::new(r"[ \t\u{a0}]+").expect("valid regex"),
        blank_lines: Regex::new(r"\n\s*\n(\s*\n)+").expect("valid regex"),
    })
}

/// Strip markup from an HTML (or SGML-wrapped HTML) filing into plain text.
/// Block-level elements become paragraph breaks.
pub fn html_to_text(html: &str) -> String {
    let p = html_patterns();

    let text = p.hidden.replace_all(html, " ");
    let text = p.block_end.replace_all(&text, "\n\n");
    let text = p.cell_end.replace_all(&text, " | ");
    let text = p.tag.replace_all(&text, " ");
    let text = decode_entities(&text);

    let lines: Vec<String> = text
        .lines()
        .map(|line| p.spaces.replace_all(line.trim(), " ").trim_matches(|c| c == ' ' || c == '|').trim().to_string())
        .collect();

    let joined = lines.join("\n");
    p.blank_lines.replace_all(&joined, "\n\n").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    let p = html_patterns();

    let decoded = p.numeric_entity.replace_all(text, |caps: &regex::Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    let decoded = p.hex_entity.replace_all(&decoded, |caps: &regex::Captures| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    decoded
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Plain text for a downloaded document, based on its name and contents.
pub fn document_to_text(file_name: &str, bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let looks_like_markup = raw.contains("</") || raw.to_lowercase().contains("<html");
    match extension.as_str() {
        "htm" | "html" | "xml" => html_to_text(&raw),
        "txt" if looks_like_markup => html_to_text(&raw),
        _ => raw.into_owned(),
    }
}

/// Split text into chunks of at most `max_chars`, preferring paragraph
/// boundaries and falling back to word boundaries for long paragraphs.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        for piece in split_long(paragraph, max_chars) {
            if current.len() + piece.len() + 2 > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.len() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        for part in hard_split(word, max_chars) {
            if current.len() + part.len() + 1 > max_chars && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(part);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Cut a single over-long word on char boundaries.
fn hard_split(word: &str, max_chars: usize) -> Vec<&str> {
    if word.len() <= max_chars {
        return vec![word];
    }

    let mut parts = Vec::new();
    let mut start = 0;
    while start < word.len() {
        let mut end = (start + max_chars).min(word.len());
        while !word.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // a single char wider than max_chars
            end = start + word[start..].chars().next().map(char::len_utf8).unwrap_or(1);
        }
        parts.push(&word[start..end]);
        start = end;
    }
    parts
}

/// Lower-cased alphanumeric terms with stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 1 || t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}
