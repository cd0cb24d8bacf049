//! Suffix-dispatched document loaders, mirroring the ingestion-time format
//! list: plain text, markdown, Python, HTML, and PDF.

use anyhow::{Context, Result};
use std::path::Path;

/// Load `path` as plain text, selecting an extraction strategy by suffix.
/// Unrecognized suffixes fall back to reading the file as UTF-8 text.
pub fn load_text(path: &Path) -> Result<String> {
    let suffix = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match suffix.as_str() {
        "pdf" => load_pdf(path),
        "html" | "htm" => load_html(path),
        _ => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {} as text", path.display())),
    }
}

fn load_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path)
        .with_context(|| format!("failed to extract text from pdf {}", path.display()))
}

/// Strip tags with a plain-text scan; good enough for scraped documentation
/// pages where layout doesn't matter, only the prose.
fn load_html(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {} as text", path.display()))?;
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    Ok(out.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_plain_text_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello world").unwrap();
        assert_eq!(load_text(&path).unwrap(), "hello world");
    }

    #[test]
    fn loads_markdown_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        std::fs::write(&path, "# Title\n\nBody").unwrap();
        assert_eq!(load_text(&path).unwrap(), "# Title\n\nBody");
    }

    #[test]
    fn strips_html_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<html><body><p>Hello <b>World</b></p></body></html>").unwrap();
        assert_eq!(load_text(&path).unwrap(), "Hello World");
    }
}
