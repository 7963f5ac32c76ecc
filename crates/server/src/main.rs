use anyhow::Result;
use tireline_core::config::LoadOptions;

#[tokio::main]
async fn main() -> Result<()> {
    tireline_server::run(LoadOptions::default(), wait_for_shutdown()).await
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for ctrl-c; shutting down"
        );
    }
}
