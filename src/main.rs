//! Fleet Backend - Main entry point.

use clap::Parser;
use fleet_backend::config::Config;
use fleet_backend::db::{Database, spawn_idle_monitor};
use fleet_backend::http::{AppState, HttpServer};
use fleet_backend::logging::init_tracing;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; real environment variables still apply.
    dotenvy::dotenv().ok();

    let config = Config::parse();
    init_tracing(&config.logging)?;

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    info!(
        run_mode = %config.run_mode,
        "Starting fleet backend v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Database::connect_lazy(&config.database)?;

    let monitor = config.database.idle_check_interval().map(|interval| {
        spawn_idle_monitor(db.clone(), interval, |_| {
            // An idle connection broke underneath the pool; let the supervisor restart us.
            std::process::exit(1);
        })
    });

    let state = AppState::new(&config, db.clone());
    let result = HttpServer::new(state, &config.host, config.port).run().await;

    if let Some(handle) = monitor {
        handle.abort();
    }
    db.close().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!(status = ?db.status(), "Server shutdown complete");
    Ok(())
}
