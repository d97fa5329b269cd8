use std::path::Path;

use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use log::{error, info, warn};

use autocontainer_gateway::api;
use autocontainer_gateway::app_state::AppState;
use autocontainer_gateway::autocontainer::middleware::autocontainer;
use autocontainer_gateway::autocontainer::ContainerRouter;
use autocontainer_gateway::config::{AppConfig, ConfigSource};

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        match log4rs::init_file(config_file, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Cannot load log configuration {}: {}", config_file, e),
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    warn!("Log configuration {} not loaded, logging to stderr", config_file);
}

fn invalid_config(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let (config, source) = AppConfig::load().map_err(|e| {
        eprintln!("Invalid configuration: {}", e);
        invalid_config(e)
    })?;
    init_logging(&config.logging.config_file);
    match &source {
        ConfigSource::File(path) => info!("Loaded configuration from {}", path),
        ConfigSource::Defaults(path) => warn!("Config file {} not found, using defaults", path),
    }

    let router = if config.autocontainer.enabled {
        let router = ContainerRouter::from_config(&config.autocontainer).map_err(invalid_config)?;
        info!(
            "Autocontainer enabled: offset={} size={:?} mask={:#018X} base={} format={}",
            config.autocontainer.offset,
            config.autocontainer.size,
            config.autocontainer.mask,
            config.autocontainer.base,
            config.autocontainer.format
        );
        Some(web::Data::new(router))
    } else {
        info!("Autocontainer disabled, expecting /v1/{{account}}/{{container}}/{{object}} paths");
        None
    };

    let state = AppState::from_config(&config).map_err(|e| {
        error!("Cannot initialize storage: {}", e);
        invalid_config(e)
    })?;
    let state = web::Data::new(state);

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting server on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let mut app = App::new().app_data(state.clone());
        if let Some(router) = &router {
            app = app.app_data(router.clone());
        }
        app.wrap(from_fn(autocontainer))
            .wrap(Logger::default())
            .configure(api::configure)
    })
    .workers(config.server.workers.max(1))
    .bind(bind)?
    .run()
    .await
}
