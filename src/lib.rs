use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web::Data, App, HttpServer};
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

use config::Config;
use driver::DeliveryDriver;

pub mod api;
pub mod audit;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod message;
pub mod service;
pub mod session;
pub mod store;

/// Returns a builder for the main application.
#[bon::builder(finish_fn = start)]
pub async fn run(driver: Arc<dyn DeliveryDriver>) -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("COURIER_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("COURIER_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;
    let port = config.port;

    let service = service::Service::connect_with(config, driver).await?;

    let data = Data::new(service);
    let app_data = data.clone();

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allow_any_method();

        App::new()
            .wrap(TracingLogger::default())
            .wrap(cors)
            .service(api::messages::service())
            .service(api::session::service())
            .app_data(app_data.clone())
    })
    .bind(("127.0.0.1", port))?
    .run()
    .await?;

    data.close().await;

    Ok(())
}
