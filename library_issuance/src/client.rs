use anyhow::{bail, Context};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;

use crate::api::{
    Book, BookId, CirculationRejection, GetBooksResponse, HistoryPage, IssuedItem, UserDetails,
    UserId,
};

pub struct LibraryIssuanceClient {
    url: String,
    client: ClientWithMiddleware,
}

impl LibraryIssuanceClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        // no retries here, a repeated issue request would be answered with a conflict
        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    /// Calls POST /api/user endpoint
    /// Returns user_id of added user, None if username or email is taken
    pub async fn add_user(&self, user_details: &UserDetails) -> anyhow::Result<Option<UserId>> {
        let response = self
            .client
            .post(format!("{}/api/user", self.url))
            .json(user_details)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to add user {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/user/")
            .context("Invalid location header")?
            .parse()
            .map(Some)
            .context("Failed to parse user id")
    }

    /// Calls GET /api/user/{user_id} endpoint
    /// Returns None if user is not registered
    pub async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<UserDetails>> {
        let response = self
            .client
            .get(format!("{}/api/user/{}", self.url, user_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get user {}", error)
        }
    }

    /// Calls POST /api/user/{user_id}/issue/{book_id} endpoint
    /// Inner error tells why the book cannot be issued to the user right now
    pub async fn issue_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> anyhow::Result<Result<IssuedItem, CirculationRejection>> {
        self.circulate("issue", user_id, book_id).await
    }

    /// Calls POST /api/user/{user_id}/return/{book_id} endpoint
    /// Inner error tells why the book cannot be returned, usually because it is not held
    pub async fn return_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> anyhow::Result<Result<IssuedItem, CirculationRejection>> {
        self.circulate("return", user_id, book_id).await
    }

    async fn circulate(
        &self,
        action: &str,
        user_id: UserId,
        book_id: BookId,
    ) -> anyhow::Result<Result<IssuedItem, CirculationRejection>> {
        let response = self
            .client
            .post(format!(
                "{}/api/user/{}/{}/{}",
                self.url, user_id, action, book_id
            ))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            Ok(Err(response.json().await?))
        } else if response.status().is_success() {
            Ok(Ok(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to {} book {}", action, error)
        }
    }

    /// Calls GET /api/user/{user_id}/available endpoint
    pub async fn available_books(&self, user_id: UserId) -> anyhow::Result<Vec<Book>> {
        self.get_books(user_id, "available").await
    }

    /// Calls GET /api/user/{user_id}/loans endpoint
    pub async fn issued_books(&self, user_id: UserId) -> anyhow::Result<Vec<Book>> {
        self.get_books(user_id, "loans").await
    }

    async fn get_books(&self, user_id: UserId, list: &str) -> anyhow::Result<Vec<Book>> {
        let response = self
            .client
            .get(format!("{}/api/user/{}/{}", self.url, user_id, list))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<GetBooksResponse>().await?.books)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list books {}", error)
        }
    }

    /// Calls GET /api/user/{user_id}/history?page={page} endpoint
    pub async fn history(&self, user_id: UserId, page: usize) -> anyhow::Result<HistoryPage> {
        let response = self
            .client
            .get(format!(
                "{}/api/user/{}/history?page={}",
                self.url, user_id, page
            ))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get history {}", error)
        }
    }
}
