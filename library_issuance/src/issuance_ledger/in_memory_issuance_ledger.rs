use std::collections::HashSet;
use std::sync::Arc;

use library_catalog::catalog_store::{CatalogStore, CatalogStoreError};

use crate::api::{BookId, IssuedItem, IssuedItemId, UserId};
use crate::issuance_ledger::book_locks::BookLocks;
use crate::issuance_ledger::{
    item_id_at, item_position, page_offset, today, IssuanceError, IssuanceLedger,
};

/// Ledger kept in process memory. Issue and return of a book run under that book's lock,
/// item ids are positions in `items` counted from 1.
pub struct InMemoryIssuanceLedger {
    catalog_store: Arc<dyn CatalogStore>,
    book_locks: BookLocks,
    items: parking_lot::RwLock<Vec<IssuedItem>>,
}

impl InMemoryIssuanceLedger {
    pub fn new(catalog_store: Arc<dyn CatalogStore>) -> Self {
        Self {
            catalog_store,
            book_locks: BookLocks::default(),
            items: Default::default(),
        }
    }

    fn find_open(&self, user_id: UserId, book_id: BookId) -> Option<IssuedItemId> {
        self.items
            .read()
            .iter()
            .find(|item| item.user_id == user_id && item.book_id == book_id && item.is_open())
            .map(|item| item.id)
    }
}

#[async_trait::async_trait]
impl IssuanceLedger for InMemoryIssuanceLedger {
    async fn issue(&self, user_id: UserId, book_id: BookId) -> Result<IssuedItem, IssuanceError> {
        let _book_guard = self.book_locks.lock(book_id).await;

        let book = self.catalog_store.get_book(book_id).await?;
        if book.quantity <= 0 {
            return Err(IssuanceError::Unavailable(book_id));
        }
        if self.find_open(user_id, book_id).is_some() {
            return Err(IssuanceError::AlreadyIssued { user_id, book_id });
        }

        self.catalog_store
            .adjust_quantity(book_id, -1)
            .await
            .map_err(|err| match err {
                // someone bypassing the ledger took the last copy meanwhile
                CatalogStoreError::InvalidState(_) => IssuanceError::Unavailable(book_id),
                other => other.into(),
            })?;

        let stored = {
            let mut items = self.items.write();
            item_id_at(items.len() + 1).map(|id| {
                let item = IssuedItem {
                    id,
                    book_id,
                    user_id,
                    issue_date: today(),
                    return_date: None,
                };
                items.push(item.clone());
                item
            })
        };
        let item = match stored {
            Ok(item) => item,
            Err(err) => {
                self.catalog_store.adjust_quantity(book_id, 1).await?;
                return Err(err);
            }
        };

        tracing::info!(user_id, book_id, item_id = item.id, "Book issued");
        Ok(item)
    }

    async fn return_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<IssuedItem, IssuanceError> {
        let _book_guard = self.book_locks.lock(book_id).await;

        let item_id = self
            .find_open(user_id, book_id)
            .ok_or(IssuanceError::NotIssued { user_id, book_id })?;

        self.catalog_store.adjust_quantity(book_id, 1).await?;

        let item = {
            let mut items = self.items.write();
            let item = items
                .get_mut(item_position(item_id)?)
                .ok_or_else(|| IssuanceError::Other(format!("Item {} vanished", item_id)))?;
            item.return_date = Some(today().max(item.issue_date));
            item.clone()
        };

        tracing::info!(user_id, book_id, item_id, "Book returned");
        Ok(item)
    }

    async fn history(
        &self,
        user_id: UserId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<IssuedItem>, IssuanceError> {
        let Some(offset) = page_offset(page, page_size) else {
            return Ok(vec![]);
        };

        let mut items: Vec<IssuedItem> = self
            .items
            .read()
            .iter()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.id.cmp(&a.id)));

        Ok(items.into_iter().skip(offset).take(page_size).collect())
    }

    async fn count_history(&self, user_id: UserId) -> Result<usize, IssuanceError> {
        Ok(self
            .items
            .read()
            .iter()
            .filter(|item| item.user_id == user_id)
            .count())
    }

    async fn open_loans(&self, user_id: UserId) -> Result<HashSet<BookId>, IssuanceError> {
        Ok(self
            .items
            .read()
            .iter()
            .filter(|item| item.user_id == user_id && item.is_open())
            .map(|item| item.book_id)
            .collect())
    }
}
