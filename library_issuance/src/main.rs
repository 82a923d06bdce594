use std::sync::Arc;

use actix_web::{App, HttpServer};
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;

use library_catalog::catalog_store::{CatalogStore, InMemoryCatalogStore, PostgresCatalogStore};
use library_catalog::settings::AppSettings;
use library_catalog::telemetry::init_telemetry;
use library_issuance::app_config::config_app;
use library_issuance::handlers::HistoryPageSize;
use library_issuance::issuance_ledger::{
    InMemoryIssuanceLedger, IssuanceLedger, PostgresIssuanceLedger,
};
use library_issuance::users_repository::{
    InMemoryUsersRepository, PostgresUsersRepository, UsersRepository,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("library_issuance")?;
    let settings = AppSettings::from_env()?;
    tracing::info!("starting HTTP server at http://localhost:{}", settings.port);

    let (catalog_store, ledger, users): (
        Arc<dyn CatalogStore>,
        Arc<dyn IssuanceLedger>,
        Arc<dyn UsersRepository>,
    ) = if settings.use_in_memory_db {
        let catalog_store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::default());
        (
            catalog_store.clone(),
            Arc::new(InMemoryIssuanceLedger::new(catalog_store)),
            Arc::new(InMemoryUsersRepository::default()),
        )
    } else {
        // ledger creates the books table it references, so it goes first
        let ledger = PostgresIssuanceLedger::init(settings.postgres_config()).await?;
        (
            Arc::new(PostgresCatalogStore::init(settings.postgres_config()).await?),
            Arc::new(ledger),
            Arc::new(PostgresUsersRepository::init(settings.postgres_config()).await?),
        )
    };
    let history_page_size = HistoryPageSize(settings.history_page_size);

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(catalog_store.clone()))
            .app_data(web::Data::new(ledger.clone()))
            .app_data(web::Data::new(users.clone()))
            .app_data(web::Data::new(history_page_size))
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
    })
    .bind(("0.0.0.0", settings.port))?
    .run()
    .await?;
    Ok(())
}
