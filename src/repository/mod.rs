use thiserror::Error;

use crate::domain::listing::{Listing, SourceTag};

pub mod csv;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not found: {0}")]
    NotFound(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Read access to the two loaded catalogs.
pub trait CatalogReader {
    /// Query categories present in catalog A, sorted.
    fn list_categories(&self) -> RepositoryResult<Vec<String>>;
    fn list_listings(&self, source: SourceTag, category: &str) -> RepositoryResult<Vec<Listing>>;
    fn get_listing(&self, source: SourceTag, id: i64) -> RepositoryResult<Listing>;
}
