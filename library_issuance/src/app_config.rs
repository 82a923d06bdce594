use paperclip::actix::web;

use library_catalog::app_config::config_book_routes;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api").configure(config_book_routes).service(
                web::scope("/user")
                    .service(web::resource("").route(web::post().to(handlers::add_user)))
                    .service(web::resource("/{user_id}").route(web::get().to(handlers::get_user)))
                    .service(
                        web::scope("/{user_id}")
                            .service(
                                web::resource("/available")
                                    .route(web::get().to(handlers::get_available_books)),
                            )
                            .service(
                                web::resource("/loans")
                                    .route(web::get().to(handlers::get_open_loans)),
                            )
                            .service(
                                web::resource("/history")
                                    .route(web::get().to(handlers::get_history)),
                            )
                            .service(
                                web::resource("/issue/{book_id}")
                                    .route(web::post().to(handlers::issue_book)),
                            )
                            .service(
                                web::resource("/return/{book_id}")
                                    .route(web::post().to(handlers::return_book)),
                            ),
                    ),
            ),
        );
}
