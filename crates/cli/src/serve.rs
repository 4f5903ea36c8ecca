//! `kosha serve`: run the webhook server until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use kosha_client::KoshaClient;
use kosha_cli::webhook::create_router;

use crate::exit_codes::{EXIT_API_UNREACHABLE, EXIT_ERROR, EXIT_IO};
use crate::CliError;

pub fn cmd_serve(client: KoshaClient, bind: SocketAddr) -> Result<(), CliError> {
    // Fail fast rather than accept webhooks we cannot reconcile.
    let health = client.health_check().map_err(|e| CliError {
        code: EXIT_API_UNREACHABLE,
        message: format!("failed to connect to Kosha API: {e}"),
        hint: Some(crate::api_hint(&client)),
    })?;
    tracing::info!("Kosha API status: {}", health.status);

    // The blocking HTTP client must be dropped outside the runtime; keep the
    // last reference here.
    let client = Arc::new(client);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError { code: EXIT_ERROR, message: format!("cannot start runtime: {e}"), hint: None })?;

    let router = create_router(Arc::clone(&client));
    let result = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| CliError::io(format!("cannot bind {bind}: {e}")))?;
        tracing::info!("webhook server listening on http://{}", bind);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| CliError { code: EXIT_IO, message: format!("server error: {e}"), hint: None })
    });

    drop(runtime);
    drop(client);
    result
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}
