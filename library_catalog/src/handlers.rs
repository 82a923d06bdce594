use std::collections::HashSet;
use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::Error;
use actix_web::HttpResponse;
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use crate::api::{BookId, GetBooksResponse, NewBook};
use crate::catalog_store::{CatalogStore, CatalogStoreError};

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn get_all_books(
    catalog_store: Data<Arc<dyn CatalogStore>>,
) -> Result<HttpResponse, Error> {
    Ok(match catalog_store.list_books().await {
        Ok(books) => HttpResponse::Ok().json(GetBooksResponse { books }),
        Err(err) => {
            tracing::error!("Get all books failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_available_books(
    catalog_store: Data<Arc<dyn CatalogStore>>,
) -> Result<HttpResponse, Error> {
    Ok(match catalog_store.list_available(&HashSet::new()).await {
        Ok(books) => HttpResponse::Ok().json(GetBooksResponse { books }),
        Err(err) => {
            tracing::error!("Get available books failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn add_book(
    catalog_store: Data<Arc<dyn CatalogStore>>,
    book: web::Json<NewBook>,
) -> Result<HttpResponse, Error> {
    Ok(match catalog_store.add_book(book.into_inner()).await {
        Ok(book_id) => {
            tracing::info!(book_id, "Book added to catalog");
            HttpResponse::Created()
                .append_header((LOCATION, format!("/api/book/{}", book_id)))
                .finish()
        }
        Err(err @ CatalogStoreError::DuplicateBook { .. }) => {
            HttpResponse::Conflict().json(err.to_string())
        }
        Err(err @ CatalogStoreError::InvalidBook(_)) => {
            HttpResponse::BadRequest().json(err.to_string())
        }
        Err(err) => {
            tracing::error!("Add book failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_book(
    catalog_store: Data<Arc<dyn CatalogStore>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(match catalog_store.get_book(book_id.into_inner()).await {
        Ok(book) => HttpResponse::Ok().json(book),
        Err(CatalogStoreError::NotFound(_)) => HttpResponse::NotFound().finish(),
        Err(err) => {
            tracing::error!("Get book failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}
