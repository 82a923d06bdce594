use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::api::{Book, BookId, NewBook};
use crate::catalog_store::{CatalogStore, CatalogStoreError};

pub struct InMemoryCatalogStore {
    book_sequence_generator: AtomicI32,
    books: parking_lot::RwLock<BTreeMap<BookId, Book>>,
}

impl Default for InMemoryCatalogStore {
    fn default() -> Self {
        Self {
            book_sequence_generator: Default::default(),
            books: Default::default(),
        }
    }
}

impl InMemoryCatalogStore {
    fn list_filtered(&self, filter: impl Fn(&Book) -> bool) -> Vec<Book> {
        self.books
            .read()
            .values()
            .filter(|book| filter(book))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn add_book(&self, book: NewBook) -> Result<BookId, CatalogStoreError> {
        let book = book.normalized().map_err(CatalogStoreError::InvalidBook)?;
        let mut locked_books = self.books.write();

        if locked_books
            .values()
            .any(|existing| existing.name == book.name && existing.author == book.author)
        {
            return Err(CatalogStoreError::DuplicateBook {
                name: book.name,
                author: book.author,
            });
        }

        let id = self.book_sequence_generator.fetch_add(1, Ordering::Relaxed) + 1;
        locked_books.insert(
            id,
            Book {
                id,
                name: book.name,
                author: book.author,
                quantity: book.quantity,
                created_at: chrono::Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, CatalogStoreError> {
        self.books
            .read()
            .get(&book_id)
            .cloned()
            .ok_or(CatalogStoreError::NotFound(book_id))
    }

    async fn list_books(&self) -> Result<Vec<Book>, CatalogStoreError> {
        Ok(self.list_filtered(|_| true))
    }

    async fn list_available(
        &self,
        excluding: &HashSet<BookId>,
    ) -> Result<Vec<Book>, CatalogStoreError> {
        Ok(self.list_filtered(|book| book.quantity > 0 && !excluding.contains(&book.id)))
    }

    async fn list_by_ids(&self, ids: &HashSet<BookId>) -> Result<Vec<Book>, CatalogStoreError> {
        Ok(self.list_filtered(|book| ids.contains(&book.id)))
    }

    async fn adjust_quantity(
        &self,
        book_id: BookId,
        delta: i32,
    ) -> Result<Book, CatalogStoreError> {
        let mut locked_books = self.books.write();
        let book = locked_books
            .get_mut(&book_id)
            .ok_or(CatalogStoreError::NotFound(book_id))?;

        match book.quantity.checked_add(delta) {
            Some(quantity) if quantity >= 0 => {
                book.quantity = quantity;
                Ok(book.clone())
            }
            _ => Err(CatalogStoreError::InvalidState(book_id)),
        }
    }
}

#[cfg(test)]
mod in_memory_catalog_store_tests {
    use std::collections::HashSet;

    use crate::api::NewBook;
    use crate::catalog_store::{CatalogStore, CatalogStoreError, InMemoryCatalogStore};

    fn new_book(name: &str, author: &str, quantity: i32) -> NewBook {
        NewBook {
            name: name.to_string(),
            author: author.to_string(),
            quantity,
        }
    }

    #[tokio::test]
    /// Tests if add_book and get_book work correctly
    async fn test_add_book_and_get_it() {
        let store = InMemoryCatalogStore::default();

        let not_existing_book_id = 20000;
        let book_not_found = store.get_book(not_existing_book_id).await;
        assert!(matches!(
            book_not_found,
            Err(CatalogStoreError::NotFound(..))
        ));

        let id = store
            .add_book(new_book("Dune", "Herbert", 2))
            .await
            .expect("Failed to add book");

        let book = store.get_book(id).await.expect("Failed to get book");
        assert_eq!(book.id, id);
        assert_eq!(book.name, "Dune");
        assert_eq!(book.author, "Herbert");
        assert_eq!(book.quantity, 2);
    }

    #[tokio::test]
    /// Same name and author can be added only once, other combinations are fine
    async fn test_duplicate_book_rejected() {
        let store = InMemoryCatalogStore::default();

        store
            .add_book(new_book("Dune", "Herbert", 1))
            .await
            .expect("Failed to add book");

        let duplicate = store.add_book(new_book(" Dune ", "Herbert", 5)).await;
        assert!(matches!(
            duplicate,
            Err(CatalogStoreError::DuplicateBook { .. })
        ));

        store
            .add_book(new_book("Dune", "Anderson", 1))
            .await
            .expect("Same title by other author should be accepted");
        assert_eq!(store.list_books().await.unwrap().len(), 2);

        let invalid = store.add_book(new_book("", "Herbert", 1)).await;
        assert!(matches!(invalid, Err(CatalogStoreError::InvalidBook(..))));
    }

    #[tokio::test]
    /// Books without copies and excluded books are hidden from the available list
    async fn test_list_available_and_by_ids() {
        let store = InMemoryCatalogStore::default();

        let dune = store.add_book(new_book("Dune", "Herbert", 1)).await.unwrap();
        let emma = store.add_book(new_book("Emma", "Austen", 0)).await.unwrap();
        let ubik = store.add_book(new_book("Ubik", "Dick", 3)).await.unwrap();

        let available: Vec<_> = store
            .list_available(&HashSet::new())
            .await
            .unwrap()
            .into_iter()
            .map(|book| book.id)
            .collect();
        assert_eq!(available, vec![dune, ubik]);

        let available: Vec<_> = store
            .list_available(&HashSet::from([dune]))
            .await
            .unwrap()
            .into_iter()
            .map(|book| book.id)
            .collect();
        assert_eq!(available, vec![ubik]);

        let held: Vec<_> = store
            .list_by_ids(&HashSet::from([emma, ubik, 999]))
            .await
            .unwrap()
            .into_iter()
            .map(|book| book.id)
            .collect();
        assert_eq!(held, vec![emma, ubik]);
    }

    #[tokio::test]
    /// Quantity can be decremented to zero but never below
    async fn test_adjust_quantity() {
        let store = InMemoryCatalogStore::default();
        let id = store.add_book(new_book("Dune", "Herbert", 1)).await.unwrap();

        let missing = store.adjust_quantity(id + 100, -1).await;
        assert!(matches!(missing, Err(CatalogStoreError::NotFound(..))));

        let book = store.adjust_quantity(id, -1).await.unwrap();
        assert_eq!(book.quantity, 0);

        let negative = store.adjust_quantity(id, -1).await;
        assert!(matches!(negative, Err(CatalogStoreError::InvalidState(..))));
        assert_eq!(store.get_book(id).await.unwrap().quantity, 0);

        let book = store.adjust_quantity(id, 1).await.unwrap();
        assert_eq!(book.quantity, 1);
    }
}
