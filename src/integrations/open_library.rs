use async_trait::async_trait;
use serde::Deserialize;

use super::ensure_success;
use crate::error::Result;
use crate::models::NewBook;

const SEARCH_FIELDS: &str =
    "key,title,author_name,isbn,cover_i,first_publish_year,number_of_pages_median";

#[async_trait]
pub trait BookCatalog: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewBook>>;
}

/// Open Library `search.json` client
pub struct OpenLibraryCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl OpenLibraryCatalog {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BookCatalog for OpenLibraryCatalog {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewBook>> {
        let url = format!(
            "{}/search.json?q={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(query),
            limit,
            SEARCH_FIELDS
        );

        let response = self.http.get(&url).send().await?;
        let results: SearchResponse = ensure_success("Open Library", response).await?.json().await?;

        Ok(results
            .docs
            .into_iter()
            .filter_map(SearchDoc::into_new_book)
            .take(limit)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    key: Option<String>,
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    cover_i: Option<i64>,
    first_publish_year: Option<i32>,
    number_of_pages_median: Option<i32>,
}

impl SearchDoc {
    /// Docs without a key or title cannot be seeded
    fn into_new_book(self) -> Option<NewBook> {
        let key = self.key?;
        let title = self.title.filter(|t| !t.trim().is_empty())?;

        let author = if self.author_name.is_empty() {
            "Unknown author".to_string()
        } else {
            self.author_name.join(", ")
        };

        // Prefer ISBN-13
        let isbn = self
            .isbn
            .iter()
            .find(|i| i.len() == 13)
            .or_else(|| self.isbn.first())
            .cloned();

        Some(NewBook {
            open_library_key: Some(key),
            title,
            author,
            isbn,
            cover_url: self
                .cover_i
                .map(|id| format!("https://covers.openlibrary.org/b/id/{id}-L.jpg")),
            description: None,
            published_year: self.first_publish_year,
            page_count: self.number_of_pages_median,
        })
    }
}
