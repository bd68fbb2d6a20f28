// src/main.rs
// MindPath server entry point: static files, /status and the browser socket

use std::path::PathBuf;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use mindpath::event_dispatcher::EventContext;
use mindpath::protocol::{EventFrame, ServerEvent};
use mindpath::storage::{StorageContext, StorageManager};
use mindpath::{AppConfig, AppState};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "mindpath")]
#[command(about = "Grid password server driven by Emotiv mental commands")]
struct Cli {
    /// TOML configuration file; `mindpath.toml` is used when present.
    #[arg(long, short, env = "MINDPATH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Clear the collection and store the demo password
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Seed => seed(config).await,
    }
}

async fn seed(config: AppConfig) -> anyhow::Result<()> {
    let bounds = config.grid.bounds()?;
    let mut storage = StorageManager::from_settings(&config.storage, bounds)?;
    storage.initialize().await?;
    let doc = storage.seed_demo(&StorageContext::system()).await?;
    println!("🌱 Seeded password {} into '{}' ({})", doc.id, storage.collection(), storage.primary_backend());
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    println!("🧠 Starting MindPath");
    let bind_addr = config.server.bind_addr.clone();
    let static_dir = PathBuf::from(&config.server.static_dir);

    let state = AppState::new(config).await.context("initializing application state")?;
    if let Err(e) = state.connect_headset().await {
        // Command blocks reconnect on demand.
        tracing::warn!("headset not ready at startup: {}", e);
    }

    let app = Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .route("/status", get(status_handler))
        .route("/socket", get(socket_handler))
        .fallback_service(ServeDir::new(&static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    println!("✅ MindPath listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
    }
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match mindpath::commands::get_system_status(&state).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<std::net::SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer.to_string(), state))
}

/// One browser connection: frames are read here and replies are written by a
/// separate task, so a long command block never blocks `ping`.
async fn handle_socket(socket: WebSocket, peer: String, state: AppState) {
    let connection_id = Uuid::new_v4();
    state.register_connection(connection_id, Some(peer.clone())).await;

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("failed to encode {}: {}", event.name(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(%connection_id, "socket read failed: {}", e);
                break;
            }
        };

        let frame: EventFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = tx.send(ServerEvent::error("unknown", format!("malformed frame: {}", e)));
                continue;
            }
        };

        let state = state.clone();
        let tx = tx.clone();
        let context = EventContext::new(connection_id).with_peer(peer.clone());
        tokio::spawn(async move {
            for reply in state.event_dispatcher.dispatch_to_replies(frame, context, &state).await {
                if tx.send(reply).is_err() {
                    break;
                }
            }
        });
    }

    drop(tx);
    if let Err(e) = writer.await {
        tracing::debug!(%connection_id, "socket writer ended: {}", e);
    }
    state.unregister_connection(connection_id).await;
}
