use chrono::NaiveDate;
use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub use library_catalog::api::{Book, BookId, GetBooksResponse};

pub type UserId = i32;
pub type IssuedItemId = i32;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct UserDetails {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub enum LoanState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// One loan of a single copy, open until the return date is set
pub struct IssuedItem {
    pub id: IssuedItemId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub issue_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
}

impl IssuedItem {
    pub fn state(&self) -> LoanState {
        match self.return_date {
            None => LoanState::Open,
            Some(_) => LoanState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == LoanState::Open
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Apiv2Schema)]
pub struct HistoryQuery {
    /// 1-based page number, first page when missing
    pub page: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct HistoryPage {
    pub items: Vec<IssuedItem>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
}

/// Why an issue or return request was refused
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Unavailable,
    AlreadyIssued,
    NotIssued,
    InvalidState,
}

/// Body of a 409 answer to an issue or return request
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct CirculationRejection {
    pub reason: RejectionReason,
    pub message: String,
}
