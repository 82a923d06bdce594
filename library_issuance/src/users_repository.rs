use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::Context;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Statement};

use library_catalog::catalog_store::{connect, PostgresConfig};

use crate::api::{UserDetails, UserId};

#[derive(Debug, thiserror::Error)]
pub enum UsersRepositoryError {
    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Username {0} already exists")]
    UsernameTaken(String),

    #[error("Email {0} already exists")]
    EmailTaken(String),

    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

/// Profiles of registered users. Credentials live with the identity provider.
#[async_trait::async_trait]
pub trait UsersRepository: Send + Sync {
    async fn add_user(&self, details: UserDetails) -> Result<UserId, UsersRepositoryError>;

    async fn get_user(&self, id: UserId) -> Result<UserDetails, UsersRepositoryError>;
}

fn normalized(details: UserDetails) -> Result<UserDetails, UsersRepositoryError> {
    let username = details.username.trim().to_string();
    let email = details.email.trim().to_string();
    if username.is_empty() {
        return Err(UsersRepositoryError::InvalidUser(
            "Username must not be empty".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(UsersRepositoryError::InvalidUser(format!(
            "Email {} is not valid",
            email
        )));
    }
    Ok(UserDetails {
        username,
        email,
        first_name: details.first_name.trim().to_string(),
        last_name: details.last_name.trim().to_string(),
    })
}

#[derive(Default)]
pub struct InMemoryUsersRepository {
    users: parking_lot::RwLock<HashMap<UserId, UserDetails>>,
    user_sequence_generator: AtomicI32,
}

#[async_trait::async_trait]
impl UsersRepository for InMemoryUsersRepository {
    async fn add_user(&self, details: UserDetails) -> Result<UserId, UsersRepositoryError> {
        let details = normalized(details)?;
        let mut locked_users = self.users.write();

        if locked_users
            .values()
            .any(|user| user.username == details.username)
        {
            return Err(UsersRepositoryError::UsernameTaken(details.username));
        }
        if locked_users.values().any(|user| user.email == details.email) {
            return Err(UsersRepositoryError::EmailTaken(details.email));
        }

        let id = self.user_sequence_generator.fetch_add(1, Ordering::Relaxed) + 1;
        locked_users.insert(id, details);
        Ok(id)
    }

    async fn get_user(&self, id: UserId) -> Result<UserDetails, UsersRepositoryError> {
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or(UsersRepositoryError::UserNotFound(id))
    }
}

pub struct PostgresUsersRepository {
    client: Client,
}

impl PostgresUsersRepository {
    pub async fn init(config: PostgresConfig) -> anyhow::Result<Self> {
        let client = connect(&config).await?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS users (
            id              SERIAL PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL
            )
        ",
            )
            .await
            .context("Failed to setup users table")?;
        Ok(Self { client })
    }

    async fn exists(&self, column: &str, value: &str) -> Result<bool, UsersRepositoryError> {
        let rows = self
            .client
            .query(
                format!("SELECT id FROM users WHERE {} = $1", column).as_str(),
                &[&value],
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait::async_trait]
impl UsersRepository for PostgresUsersRepository {
    async fn add_user(&self, details: UserDetails) -> Result<UserId, UsersRepositoryError> {
        let details = normalized(details)?;
        if self.exists("username", &details.username).await? {
            return Err(UsersRepositoryError::UsernameTaken(details.username));
        }
        if self.exists("email", &details.email).await? {
            return Err(UsersRepositoryError::EmailTaken(details.email));
        }

        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO users (username, email, first_name, last_name) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &details.username,
                    &details.email,
                    &details.first_name,
                    &details.last_name,
                ],
            )
            .await;

        match rows {
            Ok(rows) => Ok(rows
                .first()
                .ok_or_else(|| UsersRepositoryError::Other("Id not returned".to_string()))?
                .try_get(0)?),
            // lost a race against a concurrent registration
            Err(err) => match err.as_db_error() {
                Some(db_err) if db_err.code() == &SqlState::UNIQUE_VIOLATION => {
                    if db_err.constraint() == Some("users_username_key") {
                        Err(UsersRepositoryError::UsernameTaken(details.username))
                    } else {
                        Err(UsersRepositoryError::EmailTaken(details.email))
                    }
                }
                _ => Err(err.into()),
            },
        }
    }

    async fn get_user(&self, id: UserId) -> Result<UserDetails, UsersRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT username, email, first_name, last_name FROM users WHERE id = $1")
            .await?;

        let rows = self.client.query(&stmt, &[&id]).await?;
        let row = rows
            .first()
            .ok_or(UsersRepositoryError::UserNotFound(id))?;

        Ok(UserDetails {
            username: row.try_get(0)?,
            email: row.try_get(1)?,
            first_name: row.try_get(2)?,
            last_name: row.try_get(3)?,
        })
    }
}
