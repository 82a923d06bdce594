use std::collections::HashSet;

use anyhow::Context;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Row};

use library_catalog::catalog_store::{
    adjust_quantity_with, connect, create_catalog_schema, lock_book_with, CatalogStoreError,
    PostgresConfig,
};

use crate::api::{BookId, IssuedItem, UserId};
use crate::issuance_ledger::{history_len, page_offset, today, IssuanceError, IssuanceLedger};

const ITEM_COLUMNS: &str = "id, book_id, user_id, issue_date, return_date";

/// Ledger stored next to the `books` table. Issue and return run in one transaction
/// on a connection of their own, holding the row lock of the book until commit.
/// Reads share a single pipelined connection.
pub struct PostgresIssuanceLedger {
    config: PostgresConfig,
    client: Client,
}

impl PostgresIssuanceLedger {
    pub async fn init(config: PostgresConfig) -> anyhow::Result<Self> {
        let client = connect(&config).await?;
        create_catalog_schema(&client).await?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS issued_items (
            id              SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL REFERENCES books (id),
            user_id         INTEGER NOT NULL,
            issue_date      DATE NOT NULL,
            return_date     DATE,
            CHECK (return_date IS NULL OR return_date >= issue_date)
            );
        CREATE UNIQUE INDEX IF NOT EXISTS issued_items_one_open_loan
            ON issued_items (user_id, book_id) WHERE return_date IS NULL;
        CREATE INDEX IF NOT EXISTS issued_items_user_id ON issued_items (user_id);
        ",
            )
            .await
            .context("Failed to setup issued_items table")?;

        Ok(Self { config, client })
    }

    async fn transaction_client(&self) -> Result<Client, IssuanceError> {
        connect(&self.config)
            .await
            .map_err(|err| IssuanceError::Other(format!("{:#}", err)))
    }
}

fn row_to_item(row: &Row) -> Result<IssuedItem, IssuanceError> {
    Ok(IssuedItem {
        id: row.try_get(0)?,
        book_id: row.try_get(1)?,
        user_id: row.try_get(2)?,
        issue_date: row.try_get(3)?,
        return_date: row.try_get(4)?,
    })
}

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.as_db_error()
        .map(|db_err| db_err.code() == &SqlState::UNIQUE_VIOLATION)
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl IssuanceLedger for PostgresIssuanceLedger {
    async fn issue(&self, user_id: UserId, book_id: BookId) -> Result<IssuedItem, IssuanceError> {
        let mut client = self.transaction_client().await?;
        // rolled back on drop unless committed
        let transaction = client.transaction().await?;

        let book = lock_book_with(&transaction, book_id).await?;
        if book.quantity <= 0 {
            return Err(IssuanceError::Unavailable(book_id));
        }

        let open = transaction
            .query(
                "SELECT id FROM issued_items \
                 WHERE user_id = $1 AND book_id = $2 AND return_date IS NULL",
                &[&user_id, &book_id],
            )
            .await?;
        if !open.is_empty() {
            return Err(IssuanceError::AlreadyIssued { user_id, book_id });
        }

        let insert = format!(
            "INSERT INTO issued_items (book_id, user_id, issue_date) \
             VALUES ($1, $2, $3) RETURNING {ITEM_COLUMNS}"
        );
        let rows = transaction
            .query(insert.as_str(), &[&book_id, &user_id, &today()])
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    IssuanceError::AlreadyIssued { user_id, book_id }
                } else {
                    err.into()
                }
            })?;
        let item = row_to_item(
            rows.first()
                .ok_or_else(|| IssuanceError::Other("Item not returned".to_string()))?,
        )?;

        adjust_quantity_with(&transaction, book_id, -1)
            .await
            .map_err(|err| match err {
                CatalogStoreError::InvalidState(_) => IssuanceError::Unavailable(book_id),
                other => other.into(),
            })?;

        transaction.commit().await?;
        tracing::info!(user_id, book_id, item_id = item.id, "Book issued");
        Ok(item)
    }

    async fn return_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> Result<IssuedItem, IssuanceError> {
        let mut client = self.transaction_client().await?;
        let transaction = client.transaction().await?;

        lock_book_with(&transaction, book_id)
            .await
            .map_err(|err| match err {
                CatalogStoreError::NotFound(_) => IssuanceError::NotIssued { user_id, book_id },
                other => other.into(),
            })?;

        let update = format!(
            "UPDATE issued_items SET return_date = GREATEST($3, issue_date) \
             WHERE user_id = $1 AND book_id = $2 AND return_date IS NULL \
             RETURNING {ITEM_COLUMNS}"
        );
        let rows = transaction
            .query(update.as_str(), &[&user_id, &book_id, &today()])
            .await?;
        let item = row_to_item(
            rows.first()
                .ok_or(IssuanceError::NotIssued { user_id, book_id })?,
        )?;

        adjust_quantity_with(&transaction, book_id, 1).await?;

        transaction.commit().await?;
        tracing::info!(user_id, book_id, item_id = item.id, "Book returned");
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
        let (Ok(offset), Ok(limit)) = (i64::try_from(offset), i64::try_from(page_size)) else {
            return Ok(vec![]);
        };

        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM issued_items WHERE user_id = $1 \
             ORDER BY issue_date DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = self
            .client
            .query(query.as_str(), &[&user_id, &limit, &offset])
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn count_history(&self, user_id: UserId) -> Result<usize, IssuanceError> {
        let rows = self
            .client
            .query(
                "SELECT COUNT(*) FROM issued_items WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        let count: i64 = rows
            .first()
            .ok_or_else(|| IssuanceError::Other("Count not returned".to_string()))?
            .try_get(0)?;
        history_len(count)
    }

    async fn open_loans(&self, user_id: UserId) -> Result<HashSet<BookId>, IssuanceError> {
        let rows = self
            .client
            .query(
                "SELECT book_id FROM issued_items WHERE user_id = $1 AND return_date IS NULL",
                &[&user_id],
            )
            .await?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }
}

#[cfg(test)]
mod tests_postgres_issuance_ledger {
    use std::sync::Arc;

    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use library_catalog::api::NewBook;
    use library_catalog::catalog_store::{CatalogStore, PostgresCatalogStore};

    use super::*;

    fn pg_config() -> PostgresConfig {
        PostgresConfig {
            hostname: "127.0.0.1".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }

    async fn start_postgres_container_and_init_ledger() -> (
        ContainerAsync<GenericImage>,
        PostgresCatalogStore,
        PostgresIssuanceLedger,
    ) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(ledger) = PostgresIssuanceLedger::init(pg_config()).await {
                let catalog_store = PostgresCatalogStore::init(pg_config())
                    .await
                    .expect("Failed to init catalog store");
                return (_pg_container, catalog_store, ledger);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        panic!("Failed to setup postgres container")
    }

    async fn add_book(catalog_store: &PostgresCatalogStore, name: &str, quantity: i32) -> BookId {
        catalog_store
            .add_book(NewBook {
                name: name.to_string(),
                author: "Herbert".to_string(),
                quantity,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Combined into big unit test to avoid duplicate setup
    /// 1. User A issues the only copy, user B is rejected
    /// 2. User A cannot issue it twice
    /// 3. User B cannot return what they do not hold
    /// 4. User A returns it, the copy is back on the shelf
    async fn test_issue_and_return_lifecycle() {
        let (_container, catalog_store, ledger) = start_postgres_container_and_init_ledger().await;
        let dune = add_book(&catalog_store, "Dune", 1).await;
        let (user_a, user_b): (UserId, UserId) = (1, 2);

        let missing = ledger.issue(user_a, dune + 100).await;
        assert!(matches!(missing, Err(IssuanceError::NotFound(..))));

        let item = ledger.issue(user_a, dune).await.unwrap();
        assert_eq!(item.issue_date, today());
        assert!(item.is_open());
        assert_eq!(catalog_store.get_book(dune).await.unwrap().quantity, 0);
        assert_eq!(ledger.open_loans(user_a).await.unwrap(), HashSet::from([dune]));

        let rejected = ledger.issue(user_b, dune).await;
        assert!(matches!(rejected, Err(IssuanceError::Unavailable(..))));

        let twice = ledger.issue(user_a, dune).await;
        assert!(matches!(twice, Err(IssuanceError::Unavailable(..))));

        let not_issued = ledger.return_book(user_b, dune).await;
        assert!(matches!(not_issued, Err(IssuanceError::NotIssued { .. })));
        assert_eq!(catalog_store.get_book(dune).await.unwrap().quantity, 0);

        let returned = ledger.return_book(user_a, dune).await.unwrap();
        assert_eq!(returned.id, item.id);
        assert_eq!(returned.return_date, Some(today()));
        assert_eq!(catalog_store.get_book(dune).await.unwrap().quantity, 1);
        assert_eq!(ledger.open_loans(user_a).await.unwrap(), HashSet::new());

        // a second copy lets the duplicate check kick in
        catalog_store.adjust_quantity(dune, 1).await.unwrap();
        ledger.issue(user_a, dune).await.unwrap();
        let duplicate = ledger.issue(user_a, dune).await;
        assert!(matches!(duplicate, Err(IssuanceError::AlreadyIssued { .. })));
        assert_eq!(catalog_store.get_book(dune).await.unwrap().quantity, 1);
        assert_eq!(ledger.count_history(user_a).await.unwrap(), 2);
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// History is newest first, pages past the end are empty
    async fn test_history_pagination() {
        let (_container, catalog_store, ledger) = start_postgres_container_and_init_ledger().await;
        let user: UserId = 5;

        let mut book_ids = vec![];
        for i in 0..5 {
            let book_id = add_book(&catalog_store, &format!("Book {}", i), 1).await;
            ledger.issue(user, book_id).await.unwrap();
            book_ids.push(book_id);
        }

        assert_eq!(ledger.count_history(user).await.unwrap(), 5);
        assert_eq!(ledger.history(user, 2, 10).await.unwrap(), vec![]);

        let first_page: Vec<BookId> = ledger
            .history(user, 1, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.book_id)
            .collect();
        assert_eq!(first_page, vec![book_ids[4], book_ids[3], book_ids[2]]);

        let second_page: Vec<BookId> = ledger
            .history(user, 2, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.book_id)
            .collect();
        assert_eq!(second_page, vec![book_ids[1], book_ids[0]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Contenders on separate connections race for three copies
    /// 1. Eight users issue through two independent ledgers while the catalog
    ///    takes copies off the shelf directly
    /// 2. Exactly three requests win, ledger losers get Unavailable, direct losers InvalidState
    /// 3. One user issuing the same book through both ledgers at once gets it only once
    async fn test_concurrent_issue_across_connections() {
        let (_container, catalog_store, first_ledger) =
            start_postgres_container_and_init_ledger().await;
        let second_ledger = PostgresIssuanceLedger::init(pg_config())
            .await
            .expect("Failed to init second ledger");
        let catalog_store = Arc::new(catalog_store);
        let ledgers = [Arc::new(first_ledger), Arc::new(second_ledger)];
        let dune = add_book(&catalog_store, "Dune", 3).await;

        let issues: Vec<_> = (1..=8)
            .map(|user_id: UserId| {
                let ledger = ledgers[user_id as usize % 2].clone();
                tokio::spawn(async move { ledger.issue(user_id, dune).await })
            })
            .collect();
        let takes: Vec<_> = (0..2)
            .map(|_| {
                let catalog_store = catalog_store.clone();
                tokio::spawn(async move { catalog_store.adjust_quantity(dune, -1).await })
            })
            .collect();

        let mut issued = 0;
        for issue in issues {
            match issue.await.unwrap() {
                Ok(_) => issued += 1,
                Err(err) => assert!(matches!(err, IssuanceError::Unavailable(..)), "{err}"),
            }
        }
        let mut taken = 0;
        for take in takes {
            match take.await.unwrap() {
                Ok(_) => taken += 1,
                Err(err) => assert!(matches!(err, CatalogStoreError::InvalidState(..)), "{err}"),
            }
        }

        assert_eq!(issued + taken, 3);
        assert_eq!(catalog_store.get_book(dune).await.unwrap().quantity, 0);
        let mut open_loans = 0;
        for user_id in 1..=8 {
            open_loans += ledgers[0].open_loans(user_id).await.unwrap().len();
        }
        assert_eq!(open_loans, issued);

        let solaris = add_book(&catalog_store, "Solaris", 5).await;
        let both = ledgers.clone().map(|ledger| {
            tokio::spawn(async move { ledger.issue(42, solaris).await })
        });
        let mut results = vec![];
        for handle in both {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|result| matches!(result, Err(IssuanceError::AlreadyIssued { .. }))));
        assert_eq!(catalog_store.get_book(solaris).await.unwrap().quantity, 4);
        assert_eq!(
            ledgers[1].open_loans(42).await.unwrap(),
            HashSet::from([solaris])
        );
    }
}
