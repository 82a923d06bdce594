use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(web::scope("/api").configure(config_book_routes));
}

/// Book routes relative to the `/api` scope, shared with services that embed the catalog
pub fn config_book_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/books")
            .service(web::resource("").route(web::get().to(handlers::get_all_books)))
            .service(
                web::resource("/available").route(web::get().to(handlers::get_available_books)),
            ),
    )
    .service(
        web::scope("/book")
            .service(web::resource("").route(web::post().to(handlers::add_book)))
            .service(web::resource("/{book_id}").route(web::get().to(handlers::get_book))),
    );
}
