use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use paperclip::actix::{api_v2_operation, web, Apiv2Schema};
use serde::Deserialize;

use library_catalog::catalog_store::CatalogStore;

use crate::api::{
    BookId, CirculationRejection, GetBooksResponse, HistoryPage, HistoryQuery, RejectionReason,
    UserDetails, UserId,
};
use crate::issuance_ledger::{IssuanceError, IssuanceLedger};
use crate::users_repository::{UsersRepository, UsersRepositoryError};

/// Number of history records shown on one page
#[derive(Debug, Clone, Copy)]
pub struct HistoryPageSize(pub usize);

#[derive(Debug, Deserialize, Apiv2Schema)]
pub struct UserBookPath {
    pub user_id: UserId,
    pub book_id: BookId,
}

async fn check_user(users: &Arc<dyn UsersRepository>, user_id: UserId) -> Option<HttpResponse> {
    match users.get_user(user_id).await {
        Ok(_) => None,
        Err(err @ UsersRepositoryError::UserNotFound(_)) => {
            Some(HttpResponse::NotFound().json(err.to_string()))
        }
        Err(err) => {
            tracing::error!("Get user failed {}", err);
            Some(HttpResponse::InternalServerError().finish())
        }
    }
}

fn issuance_error_response(err: IssuanceError) -> HttpResponse {
    let reason = match err {
        IssuanceError::NotFound(_) => return HttpResponse::NotFound().json(err.to_string()),
        IssuanceError::Unavailable(_) => RejectionReason::Unavailable,
        IssuanceError::AlreadyIssued { .. } => RejectionReason::AlreadyIssued,
        IssuanceError::NotIssued { .. } => RejectionReason::NotIssued,
        IssuanceError::InvalidState(_) => RejectionReason::InvalidState,
        IssuanceError::DatabaseFailure(_) | IssuanceError::Other(_) => {
            tracing::error!("Circulation request failed {}", err);
            return HttpResponse::InternalServerError().finish();
        }
    };
    tracing::warn!("Circulation request rejected: {}", err);
    HttpResponse::Conflict().json(CirculationRejection {
        reason,
        message: err.to_string(),
    })
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn add_user(
    users: Data<Arc<dyn UsersRepository>>,
    details: web::Json<UserDetails>,
) -> Result<HttpResponse, Error> {
    Ok(match users.add_user(details.into_inner()).await {
        Ok(user_id) => {
            tracing::info!(user_id, "User registered");
            HttpResponse::Created()
                .append_header((LOCATION, format!("/api/user/{}", user_id)))
                .finish()
        }
        Err(
            err @ (UsersRepositoryError::UsernameTaken(_) | UsersRepositoryError::EmailTaken(_)),
        ) => HttpResponse::Conflict().json(err.to_string()),
        Err(err @ UsersRepositoryError::InvalidUser(_)) => {
            HttpResponse::BadRequest().json(err.to_string())
        }
        Err(err) => {
            tracing::error!("Add user failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_user(
    users: Data<Arc<dyn UsersRepository>>,
    user_id: web::Path<UserId>,
) -> Result<HttpResponse, Error> {
    Ok(match users.get_user(user_id.into_inner()).await {
        Ok(details) => HttpResponse::Ok().json(details),
        Err(UsersRepositoryError::UserNotFound(_)) => HttpResponse::NotFound().finish(),
        Err(err) => {
            tracing::error!("Get user failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
/// Books with copies on the shelf that the user does not hold yet
pub async fn get_available_books(
    users: Data<Arc<dyn UsersRepository>>,
    ledger: Data<Arc<dyn IssuanceLedger>>,
    catalog_store: Data<Arc<dyn CatalogStore>>,
    user_id: web::Path<UserId>,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if let Some(response) = check_user(&users, user_id).await {
        return Ok(response);
    }

    let open_loans = match ledger.open_loans(user_id).await {
        Ok(open_loans) => open_loans,
        Err(err) => return Ok(issuance_error_response(err)),
    };

    Ok(match catalog_store.list_available(&open_loans).await {
        Ok(books) => HttpResponse::Ok().json(GetBooksResponse { books }),
        Err(err) => {
            tracing::error!("List available books failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
/// Books the user currently holds
pub async fn get_open_loans(
    users: Data<Arc<dyn UsersRepository>>,
    ledger: Data<Arc<dyn IssuanceLedger>>,
    catalog_store: Data<Arc<dyn CatalogStore>>,
    user_id: web::Path<UserId>,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if let Some(response) = check_user(&users, user_id).await {
        return Ok(response);
    }

    let open_loans = match ledger.open_loans(user_id).await {
        Ok(open_loans) => open_loans,
        Err(err) => return Ok(issuance_error_response(err)),
    };

    Ok(match catalog_store.list_by_ids(&open_loans).await {
        Ok(books) => HttpResponse::Ok().json(GetBooksResponse { books }),
        Err(err) => {
            tracing::error!("List issued books failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_history(
    users: Data<Arc<dyn UsersRepository>>,
    ledger: Data<Arc<dyn IssuanceLedger>>,
    page_size: Data<HistoryPageSize>,
    user_id: web::Path<UserId>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if let Some(response) = check_user(&users, user_id).await {
        return Ok(response);
    }

    let page = query.page.unwrap_or(1);
    let HistoryPageSize(page_size) = *page_size.get_ref();

    let history = async {
        let items = ledger.history(user_id, page, page_size).await?;
        let total_items = ledger.count_history(user_id).await?;
        Ok::<_, IssuanceError>(HistoryPage {
            items,
            page,
            page_size,
            total_items,
        })
    };

    Ok(match history.await {
        Ok(history_page) => HttpResponse::Ok().json(history_page),
        Err(err) => issuance_error_response(err),
    })
}

#[api_v2_operation]
pub async fn issue_book(
    users: Data<Arc<dyn UsersRepository>>,
    ledger: Data<Arc<dyn IssuanceLedger>>,
    path: web::Path<UserBookPath>,
) -> Result<HttpResponse, Error> {
    let UserBookPath { user_id, book_id } = path.into_inner();
    if let Some(response) = check_user(&users, user_id).await {
        return Ok(response);
    }

    Ok(match ledger.issue(user_id, book_id).await {
        Ok(item) => HttpResponse::Ok().json(item),
        Err(err) => issuance_error_response(err),
    })
}

#[api_v2_operation]
pub async fn return_book(
    users: Data<Arc<dyn UsersRepository>>,
    ledger: Data<Arc<dyn IssuanceLedger>>,
    path: web::Path<UserBookPath>,
) -> Result<HttpResponse, Error> {
    let UserBookPath { user_id, book_id } = path.into_inner();
    if let Some(response) = check_user(&users, user_id).await {
        return Ok(response);
    }

    Ok(match ledger.return_book(user_id, book_id).await {
        Ok(item) => HttpResponse::Ok().json(item),
        Err(err) => issuance_error_response(err),
    })
}
