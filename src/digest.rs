// Plain-text digest of delivered papers, one separator-delimited block per paper.

use crate::paper::Paper;
use crate::store::StoreError;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;

const SEPARATOR_WIDTH: usize = 70;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DigestEntry {
    pub id: String,
    pub title: String,
    pub authors: String,
    pub published: String,
    pub url: String,
    pub pdf_url: String,
    pub categories: String,
    pub saved: String,
    pub summary: String,
}

/// Append `papers` to the digest at `path`. Papers without a summary get
/// their abstract in the summary slot.
pub fn append_digest(path: &Path, papers: &[Paper]) -> Result<usize, StoreError> {
    if papers.is_empty() {
        return Ok(0);
    }

    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;

    let saved = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut out = String::new();
    for paper in papers {
        out.push_str(&render_block(paper, &saved));
    }
    file.write_all(out.as_bytes()).map_err(io_err)?;

    Ok(papers.len())
}

fn render_block(paper: &Paper, saved: &str) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let na = |s: Option<&str>| s.filter(|v| !v.is_empty()).unwrap_or("NA").to_string();

    let published = paper
        .published
        .map(|p| p.format("%Y-%m-%d").to_string());
    let authors = paper.authors.join(", ");
    let categories = paper.categories.join(", ");
    let summary = paper
        .summary
        .as_deref()
        .or(paper.abstract_text.as_deref())
        .map(str::trim);

    format!(
        "\n{sep}\nID: {}\nTitle: {}\nAuthors: {}\nPublished: {}\nURL: {}\nPDF: {}\nCategories: {}\nSaved: {}\nSummary:\n{}\n{sep}\n\n",
        paper.id,
        paper.title,
        na(Some(authors.as_str())),
        na(published.as_deref()),
        paper.url,
        na(paper.pdf_url.as_deref()),
        na(Some(categories.as_str())),
        saved,
        na(summary),
        sep = separator,
    )
}

/// Entries in file order. A missing file is an empty digest.
pub fn read_digest(path: &Path) -> Result<Vec<DigestEntry>, StoreError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line.map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?);
    }
    Ok(parse_digest(lines.iter().map(String::as_str)))
}

pub fn parse_digest<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<DigestEntry> {
    let mut entries = Vec::new();
    let mut current: Option<DigestEntry> = None;
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut in_summary = false;

    let mut finish = |entry: Option<DigestEntry>, summary: &mut Vec<&str>| {
        if let Some(mut entry) = entry {
            entry.summary = summary.join("\n").trim().to_string();
            if !entry.id.is_empty() {
                entries.push(entry);
            }
        }
        summary.clear();
    };

    for line in lines {
        if line.starts_with("====") {
            finish(current.take(), &mut summary_lines);
            current = Some(DigestEntry::default());
            in_summary = false;
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };

        if in_summary {
            summary_lines.push(line);
        } else if let Some(v) = line.strip_prefix("ID: ") {
            entry.id = v.to_string();
        } else if let Some(v) = line.strip_prefix("Title: ") {
            entry.title = v.to_string();
        } else if let Some(v) = line.strip_prefix("Authors: ") {
            entry.authors = v.to_string();
        } else if let Some(v) = line.strip_prefix("Published: ") {
            entry.published = v.to_string();
        } else if let Some(v) = line.strip_prefix("URL: ") {
            entry.url = v.to_string();
        } else if let Some(v) = line.strip_prefix("PDF: ") {
            entry.pdf_url = v.to_string();
        } else if let Some(v) = line.strip_prefix("Categories: ") {
            entry.categories = v.to_string();
        } else if let Some(v) = line.strip_prefix("Saved: ") {
            entry.saved = v.to_string();
        } else if line.starts_with("Summary:") {
            in_summary = true;
        }
    }
    finish(current.take(), &mut summary_lines);

    entries
}

/// Newest first, keeping entries whose id, title or summary contains `query`
/// (case-insensitive).
pub fn filter_entries(mut entries: Vec<DigestEntry>, query: Option<&str>) -> Vec<DigestEntry> {
    if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
        let q = q.to_lowercase();
        entries.retain(|e| {
            e.title.to_lowercase().contains(&q)
                || e.summary.to_lowercase().contains(&q)
                || e.id.to_lowercase().contains(&q)
        });
    }
    entries.reverse();
    entries
}
