mod config;
mod error;
mod metrics;
mod routes;
mod state;
mod ws;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use config::Config;
use state::AppState;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().with_target(false).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let config = Config::new();
	let state = AppState::new(&config);

	let app = Router::new()
		.merge(routes::router())
		.merge(ws::router())
		.route("/healthz", get(metrics::healthz))
		.route("/metrics", get(metrics::metrics_handler))
		.layer(middleware::from_fn(metrics::metrics_middleware))
		.layer(TraceLayer::new_for_http())
		.with_state(state);

	let addr = config.socket_addr();
	let listener = TcpListener::bind(addr).await.expect("failed to bind GCM HTTP listener");
	info!(%addr, "global concurrency manager listening");

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.expect("server error");
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}

	info!("shutdown signal received, draining connections");
}
