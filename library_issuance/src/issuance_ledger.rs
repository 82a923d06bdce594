use std::collections::HashSet;

use chrono::NaiveDate;
use library_catalog::catalog_store::CatalogStoreError;

pub use in_memory_issuance_ledger::InMemoryIssuanceLedger;
pub use postgres_issuance_ledger::PostgresIssuanceLedger;

use crate::api::{BookId, IssuedItem, IssuedItemId, UserId};

mod book_locks;
mod in_memory_issuance_ledger;
mod postgres_issuance_ledger;

#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("Book {0} not found")]
    NotFound(BookId),

    #[error("No copies of book {0} left")]
    Unavailable(BookId),

    #[error("Book {book_id} is already issued to user {user_id}")]
    AlreadyIssued { user_id: UserId, book_id: BookId },

    #[error("Book {book_id} is not issued to user {user_id}")]
    NotIssued { user_id: UserId, book_id: BookId },

    #[error("Quantity of book {0} would become negative")]
    InvalidState(BookId),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

impl From<CatalogStoreError> for IssuanceError {
    fn from(err: CatalogStoreError) -> Self {
        match err {
            CatalogStoreError::NotFound(book_id) => IssuanceError::NotFound(book_id),
            CatalogStoreError::InvalidState(book_id) => IssuanceError::InvalidState(book_id),
            CatalogStoreError::DatabaseFailure(err) => IssuanceError::DatabaseFailure(err),
            other => IssuanceError::Other(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
pub trait IssuanceLedger: Send + Sync {
    /// Lends one copy of the book to the user and takes it off the shelf
    async fn issue(&self, user_id: UserId, book_id: BookId) -> Result<IssuedItem, IssuanceError>;

    /// Closes the open loan of the book and puts the copy back on the shelf
    async fn return_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<IssuedItem, IssuanceError>;

    /// All loans of the user, newest issue date first, sliced into 1-based pages.
    /// Pages outside of the available range are empty.
    async fn history(
        &self,
        user_id: UserId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<IssuedItem>, IssuanceError>;

    /// Number of loans, open and closed, ever made by the user
    async fn count_history(&self, user_id: UserId) -> Result<usize, IssuanceError>;

    /// Books currently held by the user
    async fn open_loans(&self, user_id: UserId) -> Result<HashSet<BookId>, IssuanceError>;
}

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Offset of the first item of a 1-based page, None for pages that cannot hold anything
pub(crate) fn page_offset(page: usize, page_size: usize) -> Option<usize> {
    if page == 0 || page_size == 0 {
        return None;
    }
    (page - 1).checked_mul(page_size)
}

/// Id of the item stored at the given 1-based position
pub(crate) fn item_id_at(position: usize) -> Result<IssuedItemId, IssuanceError> {
    IssuedItemId::try_from(position)
        .map_err(|_| IssuanceError::Other(format!("Item position {} is out of id range", position)))
}

/// Position of an item in storage, inverse of `item_id_at`
pub(crate) fn item_position(item_id: IssuedItemId) -> Result<usize, IssuanceError> {
    usize::try_from(item_id)
        .ok()
        .and_then(|position| position.checked_sub(1))
        .ok_or_else(|| IssuanceError::Other(format!("Item id {} has no position", item_id)))
}

pub(crate) fn history_len(count: i64) -> Result<usize, IssuanceError> {
    usize::try_from(count)
        .map_err(|_| IssuanceError::Other(format!("Invalid history count {}", count)))
}

#[cfg(test)]
mod tests_issuance_ledger {
    use super::*;

    #[test]
    fn item_ids_do_not_wrap() {
        assert_eq!(item_id_at(1).unwrap(), 1);
        assert_eq!(item_position(1).unwrap(), 0);
        assert!(matches!(
            item_id_at(IssuedItemId::MAX as usize + 1),
            Err(IssuanceError::Other(..))
        ));
        assert!(matches!(item_position(0), Err(IssuanceError::Other(..))));
        assert!(matches!(item_position(-3), Err(IssuanceError::Other(..))));
    }

    #[test]
    fn negative_history_count_is_an_error() {
        assert_eq!(history_len(5).unwrap(), 5);
        assert!(matches!(history_len(-1), Err(IssuanceError::Other(..))));
    }

    #[test]
    fn pages_are_one_based() {
        assert_eq!(page_offset(1, 10), Some(0));
        assert_eq!(page_offset(3, 10), Some(20));
        assert_eq!(page_offset(0, 10), None);
        assert_eq!(page_offset(1, 0), None);
        assert_eq!(page_offset(usize::MAX, 2), None);
    }
}
