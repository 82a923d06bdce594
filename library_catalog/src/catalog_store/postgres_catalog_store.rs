use std::collections::HashSet;

use anyhow::Context;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, GenericClient, NoTls, Row, Statement};

use crate::api::{Book, BookId, NewBook};
use crate::catalog_store::{CatalogStore, CatalogStoreError};

const BOOK_COLUMNS: &str = "id, name, author, quantity, created_at";

#[derive(Clone)]
pub struct PostgresConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

/// Opens a connection and drives it on a background task
pub async fn connect(config: &PostgresConfig) -> anyhow::Result<Client> {
    let connection_str = format!(
        "postgresql://{}:{}@{}",
        config.username, config.password, config.hostname
    );
    tracing::debug!(
        "Connecting to postgres at {} as {}",
        config.hostname,
        config.username
    );
    let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
        .await
        .context("Failed to start postgres")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Postgres connection error: {}", e);
        }
    });

    Ok(client)
}

pub async fn create_catalog_schema(client: &Client) -> anyhow::Result<()> {
    client
        .batch_execute(
            "
        CREATE TABLE IF NOT EXISTS books (
            id              SERIAL PRIMARY KEY,
            name            TEXT NOT NULL,
            author          TEXT NOT NULL,
            quantity        INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 0),
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (name, author)
            )
        ",
        )
        .await
        .context("Failed to setup books table")
}

fn row_to_book(row: &Row) -> Result<Book, CatalogStoreError> {
    Ok(Book {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        author: row.try_get(2)?,
        quantity: row.try_get(3)?,
        created_at: row.try_get(4)?,
    })
}

/// Reads the book and locks its row until the surrounding transaction ends
pub async fn lock_book_with<C: GenericClient + Sync>(
    client: &C,
    book_id: BookId,
) -> Result<Book, CatalogStoreError> {
    let query = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1 FOR UPDATE");
    let rows = client.query(query.as_str(), &[&book_id]).await?;

    row_to_book(rows.first().ok_or(CatalogStoreError::NotFound(book_id))?)
}

/// Compare-and-update of the quantity in a single statement.
/// Works on a plain client as well as inside a transaction.
pub async fn adjust_quantity_with<C: GenericClient + Sync>(
    client: &C,
    book_id: BookId,
    delta: i32,
) -> Result<Book, CatalogStoreError> {
    let query = format!(
        "UPDATE books SET quantity = quantity + $2 \
         WHERE id = $1 AND quantity + $2 >= 0 RETURNING {BOOK_COLUMNS}"
    );
    let rows = client.query(query.as_str(), &[&book_id, &delta]).await?;

    if let Some(row) = rows.first() {
        return row_to_book(row);
    }

    let existing = client
        .query("SELECT id FROM books WHERE id = $1", &[&book_id])
        .await?;
    if existing.is_empty() {
        Err(CatalogStoreError::NotFound(book_id))
    } else {
        Err(CatalogStoreError::InvalidState(book_id))
    }
}

pub struct PostgresCatalogStore {
    client: Client,
}

impl PostgresCatalogStore {
    pub async fn init(config: PostgresConfig) -> anyhow::Result<Self> {
        let client = connect(&config).await?;
        create_catalog_schema(&client).await?;
        Ok(Self { client })
    }

    async fn query_books(
        &self,
        stmt: &Statement,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Book>, CatalogStoreError> {
        let rows = self.client.query(stmt, params).await?;
        rows.iter().map(row_to_book).collect()
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn add_book(&self, book: NewBook) -> Result<BookId, CatalogStoreError> {
        let book = book.normalized().map_err(CatalogStoreError::InvalidBook)?;
        let stmt: Statement = self
            .client
            .prepare("INSERT INTO books (name, author, quantity) VALUES ($1, $2, $3) RETURNING id")
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&book.name, &book.author, &book.quantity])
            .await;

        match rows {
            Ok(rows) => Ok(rows
                .first()
                .ok_or_else(|| CatalogStoreError::Other("Id not returned".to_string()))?
                .try_get(0)?),
            Err(err)
                if err
                    .as_db_error()
                    .map(|db_err| db_err.code() == &SqlState::UNIQUE_VIOLATION)
                    .unwrap_or_default() =>
            {
                Err(CatalogStoreError::DuplicateBook {
                    name: book.name,
                    author: book.author,
                })
            }
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, CatalogStoreError> {
        let stmt: Statement = self
            .client
            .prepare(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"))
            .await?;

        self.query_books(&stmt, &[&book_id])
            .await?
            .into_iter()
            .next()
            .ok_or(CatalogStoreError::NotFound(book_id))
    }

    async fn list_books(&self) -> Result<Vec<Book>, CatalogStoreError> {
        let stmt: Statement = self
            .client
            .prepare(&format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id"))
            .await?;
        self.query_books(&stmt, &[]).await
    }

    async fn list_available(
        &self,
        excluding: &HashSet<BookId>,
    ) -> Result<Vec<Book>, CatalogStoreError> {
        let excluding: Vec<BookId> = excluding.iter().copied().collect();
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books \
                 WHERE quantity > 0 AND NOT (id = ANY($1)) ORDER BY id"
            ))
            .await?;
        self.query_books(&stmt, &[&excluding]).await
    }

    async fn list_by_ids(&self, ids: &HashSet<BookId>) -> Result<Vec<Book>, CatalogStoreError> {
        let ids: Vec<BookId> = ids.iter().copied().collect();
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE id = ANY($1) ORDER BY id"
            ))
            .await?;
        self.query_books(&stmt, &[&ids]).await
    }

    async fn adjust_quantity(
        &self,
        book_id: BookId,
        delta: i32,
    ) -> Result<Book, CatalogStoreError> {
        adjust_quantity_with(&self.client, book_id, delta).await
    }
}
