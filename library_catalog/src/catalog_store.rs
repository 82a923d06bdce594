use std::collections::HashSet;

pub use in_memory_catalog_store::InMemoryCatalogStore;
pub use postgres_catalog_store::{
    adjust_quantity_with, connect, create_catalog_schema, lock_book_with, PostgresCatalogStore,
    PostgresConfig,
};

use crate::api::{Book, BookId, NewBook};

mod in_memory_catalog_store;
mod postgres_catalog_store;

#[derive(thiserror::Error, Debug)]
pub enum CatalogStoreError {
    #[error("Book {0} not found")]
    NotFound(BookId),

    #[error("Quantity of book {0} would become negative")]
    InvalidState(BookId),

    #[error("Book {name} by {author} already exists")]
    DuplicateBook { name: String, author: String },

    #[error("Invalid book: {0}")]
    InvalidBook(String),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Adds book to the catalog, returns an id assigned to the book
    async fn add_book(&self, book: NewBook) -> Result<BookId, CatalogStoreError>;
    /// Retrieves the book from the catalog
    async fn get_book(&self, book_id: BookId) -> Result<Book, CatalogStoreError>;
    /// Lists all books ordered by id
    async fn list_books(&self) -> Result<Vec<Book>, CatalogStoreError>;
    /// Lists books with at least one copy left, skipping the ids in `excluding`
    async fn list_available(
        &self,
        excluding: &HashSet<BookId>,
    ) -> Result<Vec<Book>, CatalogStoreError>;
    /// Lists books whose ids are in `ids`
    async fn list_by_ids(&self, ids: &HashSet<BookId>) -> Result<Vec<Book>, CatalogStoreError>;
    /// Atomically adds `delta` to the quantity of the book and returns the updated book.
    /// Fails with `InvalidState` and leaves the book untouched when the quantity would go negative.
    async fn adjust_quantity(&self, book_id: BookId, delta: i32)
        -> Result<Book, CatalogStoreError>;
}
