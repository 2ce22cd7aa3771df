use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Download links are synthesised from this prefix when the catalog omits one.
pub const PDF_URL_PREFIX: &str = "https://arxiv.org/pdf/";

/// A record exactly as the catalog returned it, before normalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogEntry {
    pub entry_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub pdf_url: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
}

/// One catalog item. The same shape is written to the result cache, so every
/// field must survive a serde round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Paper {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            pdf_url: None,
            doi: None,
            comment: None,
            published: None,
            authors: Vec::new(),
            abstract_text: None,
            categories: Vec::new(),
            summary: None,
        }
    }

    /// Normalise a raw catalog record. Missing download links are synthesised
    /// from the identifier and every link is moved onto https.
    pub fn from_entry(entry: CatalogEntry) -> Self {
        let id = id_from_entry_url(&entry.entry_id);

        let pdf_url = entry
            .pdf_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("{}{}", PDF_URL_PREFIX, id));

        let mut categories: Vec<String> = Vec::with_capacity(entry.categories.len());
        for cat in entry.categories {
            let cat = cat.trim().to_string();
            if !cat.is_empty() && !categories.contains(&cat) {
                categories.push(cat);
            }
        }

        Self {
            title: collapse_whitespace(&entry.title),
            url: secure_url(&entry.entry_id),
            pdf_url: Some(secure_url(&pdf_url)),
            doi: non_blank(entry.doi),
            comment: non_blank(entry.comment.map(|c| collapse_whitespace(&c))),
            published: entry.published,
            authors: entry
                .authors
                .into_iter()
                .map(|a| collapse_whitespace(&a))
                .filter(|a| !a.is_empty())
                .collect(),
            abstract_text: non_blank(entry.summary.map(|s| collapse_whitespace(&s))),
            categories,
            summary: None,
            id,
        }
    }

    /// Identifier without its `vN` suffix.
    pub fn base_id(&self) -> &str {
        strip_version(&self.id)
    }

    pub fn has_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false)
    }
}

/// The identifier is the last path segment of the entry URL
/// (`http://arxiv.org/abs/2401.01234v2` -> `2401.01234v2`).
pub fn id_from_entry_url(entry_id: &str) -> String {
    entry_id
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn strip_version(id: &str) -> &str {
    if let Some(pos) = id.rfind('v') {
        let (head, tail) = id.split_at(pos);
        if !head.is_empty() && tail.len() > 1 && tail[1..].chars().all(|c| c.is_ascii_digit()) {
            return head;
        }
    }
    id
}

/// Rewrite `http://` links to `https://`, leaving everything else untouched.
pub fn secure_url(url: &str) -> String {
    let trimmed = url.trim();
    let insecure = trimmed
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http://"));
    if insecure {
        format!("https://{}", &trimmed[7..])
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
