use std::sync::Arc;

use actix_web::{App, HttpServer};
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;

use library_catalog::app_config::config_app;
use library_catalog::catalog_store::{CatalogStore, InMemoryCatalogStore, PostgresCatalogStore};
use library_catalog::settings::AppSettings;
use library_catalog::telemetry::init_telemetry;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("library_catalog")?;
    let settings = AppSettings::from_env()?;
    tracing::info!("starting HTTP server at http://localhost:{}", settings.port);

    let catalog_store: Arc<dyn CatalogStore> = if settings.use_in_memory_db {
        Arc::new(InMemoryCatalogStore::default())
    } else {
        Arc::new(PostgresCatalogStore::init(settings.postgres_config()).await?)
    };

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(catalog_store.clone()))
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
