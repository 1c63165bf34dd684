use clap::Parser;
use std::sync::Arc;
use tasksync_server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "tasksync-server")]
#[command(about = "Reference remote store for tasksync clients")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Tracing filter directives
    #[arg(long, env = "RUST_LOG", default_value = "tasksync_server=debug,tower_http=debug")]
    log_filter: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter.as_str())
        .init();

    let app = router(Arc::new(AppState::new()));

    tracing::info!("Starting tasksync server on {}", args.bind);

    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%e, addr = %args.bind, "Failed to bind");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(%e, addr = %args.bind, "Server stopped");
    }
}
