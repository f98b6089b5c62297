mod classifier;
mod error;
mod routes;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::env;

use classifier::config::ClassifierConfig;
use classifier::registry;
use classifier::service::PredictionService;
use routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = match ClassifierConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Configuration loading failed: {e}"),
            ));
        }
    };

    // Load the model before accepting traffic; a missing or malformed
    // artifact aborts startup instead of serving failed predictions.
    if let Err(e) = registry::get_classifier(&config) {
        log::error!("Failed to preload model at startup: {e}");
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Model loading failed: {e}"),
        ));
    }

    let service = PredictionService::new(config);

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(service.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
