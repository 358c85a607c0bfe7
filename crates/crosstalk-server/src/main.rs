// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Crosstalk synchronization server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};

use crosstalk_server::{create_router, AppState, UpdateBroadcaster, UpdateBroadcasterConfig};
use crosstalk_server_store::{
	EventLog, MessageSource, MessageStoreAdapter, RepairJob, SqliteMessageSource, ThreadRegistry,
};

/// Crosstalk server - cross-team query synchronization over HTTP.
#[derive(Parser, Debug)]
#[command(name = "crosstalk-server", about = "Cross-team query synchronization server", version)]
struct Args {
	/// Address to listen on.
	#[arg(long, env = "CROSSTALK_HOST", default_value = "127.0.0.1")]
	host: String,

	/// Port to listen on.
	#[arg(long, env = "CROSSTALK_PORT", default_value_t = 8385)]
	port: u16,

	/// SQLite database URL.
	#[arg(long, env = "CROSSTALK_DATABASE_URL", default_value = "sqlite:crosstalk.db")]
	database_url: String,

	/// Backing message sources, in priority order. Writes land in the
	/// first one.
	#[arg(long, env = "CROSSTALK_SOURCES", value_delimiter = ',', default_value = "queries,chat")]
	sources: Vec<String>,

	/// Heartbeat interval in seconds for connected SSE clients.
	#[arg(long, env = "CROSSTALK_HEARTBEAT_SECS", default_value_t = 30)]
	heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	dotenvy::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.init();

	tracing::info!(
		host = %args.host,
		port = args.port,
		database = %args.database_url,
		"starting crosstalk-server"
	);

	let options: SqliteConnectOptions = args.database_url.parse::<SqliteConnectOptions>()?
		.create_if_missing(true);
	let pool = SqlitePoolOptions::new().connect_with(options).await?;

	let registry = ThreadRegistry::new(pool.clone());
	registry.init().await?;

	let mut sources: Vec<Arc<SqliteMessageSource>> = Vec::new();
	for name in &args.sources {
		let source = SqliteMessageSource::new(pool.clone(), name)?;
		source.init().await?;
		sources.push(Arc::new(source));
	}
	let mut iter = sources.iter().cloned().map(|s| s as Arc<dyn MessageSource>);
	let primary = iter
		.next()
		.ok_or("at least one message source is required")?;
	let secondaries: Vec<Arc<dyn MessageSource>> = iter.collect();

	let adapter = Arc::new(MessageStoreAdapter::new(
		primary,
		secondaries,
		registry.clone(),
		Arc::new(EventLog::new()),
	));
	let repair = Arc::new(RepairJob::new(
		adapter.sources().cloned().collect(),
		registry,
	));
	let broadcaster = Arc::new(UpdateBroadcaster::new(UpdateBroadcasterConfig {
		heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
		..UpdateBroadcasterConfig::default()
	}));

	// Heartbeat keeps push clients confident the transport is alive, and
	// piggybacks channel cleanup.
	{
		let broadcaster = Arc::clone(&broadcaster);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(broadcaster.heartbeat_interval());
			loop {
				ticker.tick().await;
				broadcaster.broadcast_heartbeat().await;
				broadcaster.cleanup_empty_channels().await;
			}
		});
	}

	let state = AppState {
		adapter,
		broadcaster,
		repair,
	};

	let app = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = format!("{}:{}", args.host, args.port);
	tracing::info!("listening on {}", addr);
	let listener = tokio::net::TcpListener::bind(&addr).await?;

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
		}
	}

	tracing::info!("server shutdown complete");
	Ok(())
}
