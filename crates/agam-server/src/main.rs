mod error;
mod routes;
mod state;

use std::process::ExitCode;
use std::sync::Arc;

use agam::config::load_from_env;
use agam::Dispatcher;

use crate::error::ServerError;
use crate::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("agam-server: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), ServerError> {
    let config = load_from_env()?;
    agam::logging::init(&config.logging)?;

    tracing::info!(
        data_directory = %config.data_path().display(),
        mode = %config.mode,
        "Starting agam-server"
    );

    let dispatcher = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Dispatcher::from_config(&config))
            .await
            .map_err(|e| ServerError::Serve(std::io::Error::other(e)))??
    };
    let dispatcher = Arc::new(dispatcher);
    let app = routes::router(AppState::new(Arc::clone(&dispatcher)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| ServerError::Bind {
            addr: config.server.bind.clone(),
            source: e,
        })?;
    tracing::info!(addr = %config.server.bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    tracing::info!("Draining worker pool");
    let drain = tokio::task::spawn_blocking(move || dispatcher.shutdown()).await;
    if let Err(e) = drain {
        tracing::error!(error = %e, "Worker pool shutdown panicked");
    }

    tracing::info!("agam-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod api_tests;
