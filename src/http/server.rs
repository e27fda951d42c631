use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};

use super::handlers::{routes, AppState};
use crate::config::ServerConfig;

/// Bind the HTTP server. The returned future must be spawned to serve requests.
pub fn start_server(state: AppState, config: &ServerConfig) -> std::io::Result<Server> {
    tracing::info!(
        "🌐 Starting HTTP server on http://{}:{}",
        config.host,
        config.port
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .bind((config.host.as_str(), config.port))?
    .shutdown_timeout(10)
    .disable_signals()
    .run();

    Ok(server)
}
