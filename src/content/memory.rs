//! In-memory catalog and cache.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::model::Book;
use super::ports::{BookCatalog, ContentCache};
use crate::error::{CacheError, CatalogError};

/// Book catalog held in memory, optionally seeded from a JSON array file.
#[derive(Default)]
pub struct InMemoryCatalog {
    books: RwLock<Vec<Book>>,
}

impl InMemoryCatalog {
    pub fn new(books: Vec<Book>) -> Self {
        Self {
            books: RwLock::new(books),
        }
    }

    /// Load a catalog from a file containing a JSON array of books.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let books: Vec<Book> = serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), books = books.len(), "Catalog loaded");
        Ok(Self::new(books))
    }

    pub fn insert(&self, book: Book) {
        let mut books = self.books.write();
        books.retain(|b| b.id != book.id);
        books.push(book);
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }
}

/// Digits and `X` only, uppercased. ISBNs are written with hyphens or spaces.
fn normalize_isbn(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn matches_identifier(book: &Book, identifier: &str, isbn: &str) -> bool {
    if book.id == identifier {
        return true;
    }
    let isbn_match = |candidate: &Option<String>| {
        !isbn.is_empty()
            && candidate
                .as_deref()
                .is_some_and(|value| normalize_isbn(value) == isbn)
    };
    if isbn_match(&book.isbn13) || isbn_match(&book.isbn10) {
        return true;
    }
    book.slug
        .as_deref()
        .is_some_and(|slug| slug.eq_ignore_ascii_case(identifier))
}

#[async_trait]
impl BookCatalog for InMemoryCatalog {
    async fn resolve(&self, identifier: &str) -> Result<Option<Book>, CatalogError> {
        let isbn = normalize_isbn(identifier);
        let books = self.books.read();
        // Exact id wins over ISBN or slug collisions.
        let found = books
            .iter()
            .find(|b| b.id == identifier)
            .or_else(|| books.iter().find(|b| matches_identifier(b, identifier, &isbn)))
            .cloned();
        Ok(found)
    }
}

/// Content cache held in memory.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ContentCache for InMemoryCache {
    async fn get(&self, book_id: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().get(book_id).cloned())
    }

    async fn put(&self, book_id: &str, json: String) -> Result<(), CacheError> {
        self.entries.write().insert(book_id.to_string(), json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn dune() -> Book {
        Book {
            id: "dune".into(),
            title: "Dune".into(),
            authors: vec!["Frank Herbert".into()],
            isbn13: Some("978-0-441-17271-9".into()),
            isbn10: Some("0441172717".into()),
            slug: Some("Dune-Frank-Herbert".into()),
            description: None,
            categories: vec![],
        }
    }

    #[tokio::test]
    async fn resolves_by_id_isbn_and_slug() {
        let catalog = InMemoryCatalog::new(vec![dune()]);

        for identifier in [
            "dune",
            "9780441172719",
            "978 0 441 17271 9",
            "0-441-17271-7",
            "dune-frank-herbert",
        ] {
            let book = catalog.resolve(identifier).await.unwrap();
            assert_eq!(book.map(|b| b.id).as_deref(), Some("dune"), "{identifier}");
        }

        assert!(catalog.resolve("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_replaces_same_id() {
        let catalog = InMemoryCatalog::default();
        catalog.insert(dune());
        let mut updated = dune();
        updated.title = "Dune (Deluxe)".into();
        catalog.insert(updated);

        assert_eq!(catalog.len(), 1);
        let book = catalog.resolve("dune").await.unwrap().unwrap();
        assert_eq!(book.title, "Dune (Deluxe)");
    }

    #[test]
    fn loads_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&vec![dune()]).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let catalog = InMemoryCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn malformed_catalog_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();

        let err = InMemoryCatalog::load(file.path()).err().unwrap();
        assert!(matches!(err, CatalogError::Parse { .. }));

        let missing = InMemoryCatalog::load(Path::new("/definitely/not/here.json"))
            .err()
            .unwrap();
        assert!(matches!(missing, CatalogError::Read { .. }));
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let cache = InMemoryCache::new();
        assert!(cache.get("dune").await.unwrap().is_none());
        cache.put("dune", "{}".into()).await.unwrap();
        assert_eq!(cache.get("dune").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(cache.len(), 1);
    }
}
