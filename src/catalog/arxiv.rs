use super::{Catalog, CatalogError};
use crate::paper::CatalogEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://export.arxiv.org/api/query";

/// arXiv export API client.
pub struct ArxivCatalog {
    client: Client,
    endpoint: String,
}

impl ArxivCatalog {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(concat!("arxiv-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Vec<CatalogEntry>, CatalogError> {
        debug!(endpoint = %self.endpoint, ?params, "catalog request");

        let response = self
            .client
            .get(&self.endpoint)
            .query(params)
            .header("Accept", "application/atom+xml")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(CatalogError::Status { status, body });
        }

        let body = response.text().await?;
        parse_feed(&body)
    }
}

#[async_trait]
impl Catalog for ArxivCatalog {
    async fn fetch_page(
        &self,
        query: &str,
        start: usize,
        max_results: usize,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.query(&[
            ("search_query", query.to_string()),
            ("start", start.to_string()),
            ("max_results", max_results.to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
        ])
        .await
    }

    async fn lookup(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let entries = match self
            .query(&[("id_list", id.to_string()), ("max_results", "1".to_string())])
            .await
        {
            Ok(entries) => entries,
            // Unknown or malformed ids come back as an error entry.
            Err(CatalogError::Api(message)) => {
                debug!(id, %message, "lookup rejected");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(entries.into_iter().find(|e| !e.title.trim().is_empty()))
    }
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
    Doi,
    Comment,
}

impl Field {
    fn from_local_name(name: &[u8], in_author: bool) -> Option<Self> {
        match name {
            b"id" => Some(Field::Id),
            b"title" => Some(Field::Title),
            b"summary" => Some(Field::Summary),
            b"published" => Some(Field::Published),
            b"name" if in_author => Some(Field::AuthorName),
            b"doi" => Some(Field::Doi),
            b"comment" => Some(Field::Comment),
            _ => None,
        }
    }
}

/// Parse an arXiv Atom feed into raw entries. Unknown elements are ignored
/// and every optional field may be absent.
pub fn parse_feed(xml: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<CatalogEntry> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => current = Some(CatalogEntry::default()),
                b"author" => in_author = true,
                b"link" | b"category" => {
                    if let Some(entry) = current.as_mut() {
                        apply_empty_element(entry, &e);
                    }
                }
                name => {
                    if current.is_some() {
                        field = Field::from_local_name(name, in_author);
                        text.clear();
                    }
                }
            },
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    apply_empty_element(entry, &e);
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let chunk = t
                        .unescape()
                        .map_err(|e| CatalogError::Feed(e.to_string()))?;
                    text.push_str(&chunk);
                }
            }
            Ok(Event::CData(c)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    field = None;
                }
                b"author" => in_author = false,
                _ => {
                    if let (Some(f), Some(entry)) = (field.take(), current.as_mut()) {
                        assign_field(entry, f, std::mem::take(&mut text));
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CatalogError::Feed(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if let Some(error) = entries.iter().find(|e| e.entry_id.contains("/api/errors")) {
        let message = error
            .summary
            .clone()
            .unwrap_or_else(|| error.entry_id.clone());
        return Err(CatalogError::Api(message));
    }

    Ok(entries)
}

fn assign_field(entry: &mut CatalogEntry, field: Field, value: String) {
    let value = value.trim().to_string();
    match field {
        Field::Id => entry.entry_id = value,
        Field::Title => entry.title = value,
        Field::Summary => entry.summary = Some(value),
        Field::Published => {
            entry.published = DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        Field::AuthorName => entry.authors.push(value),
        Field::Doi => entry.doi = Some(value),
        Field::Comment => entry.comment = Some(value),
    }
}

fn apply_empty_element(entry: &mut CatalogEntry, e: &BytesStart) {
    match e.local_name().as_ref() {
        b"link" => {
            let is_pdf = attr(e, "title").as_deref() == Some("pdf")
                || attr(e, "type").as_deref() == Some("application/pdf");
            if is_pdf {
                entry.pdf_url = attr(e, "href");
            }
        }
        b"category" => {
            if let Some(term) = attr(e, "term") {
                entry.categories.push(term);
            }
        }
        _ => {}
    }
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
