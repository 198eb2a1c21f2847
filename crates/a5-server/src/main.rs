mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use a5_api::auth;
use a5_api::chats;
use a5_api::middleware::{require_auth, verify_token};
use a5_api::settings;
use a5_api::{AppState, AppStateInner};
use a5_db::secrets::SecretCipher;
use a5_gateway::connection::{self, Gateway};
use a5_gateway::dispatcher::Dispatcher;
use a5_gateway::driver::GenerationDriver;
use a5_llm::OpenAiCompatible;

use crate::config::ServerConfig;

#[derive(Clone)]
struct CableState {
    gateway: Gateway,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "a5=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.uses_default_secret() {
        warn!("A5_JWT_SECRET is not set, using the development secret");
    }
    if config.llm.api_key.is_empty() {
        warn!("A5_LLM_API_KEY is not set, only users with their own key can generate");
    }

    // Init database
    let db = Arc::new(a5_db::Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let source = Arc::new(OpenAiCompatible::new(config.llm.clone())?);
    let cipher = SecretCipher::from_secret(&config.encryption_secret);
    let driver = GenerationDriver::new(
        db.clone(),
        dispatcher.clone(),
        source,
        &config.default_model,
        cipher.clone(),
    );

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        cipher,
    });
    let cable_state = CableState {
        gateway: Gateway {
            db,
            dispatcher,
            driver,
        },
        jwt_secret: config.jwt_secret.clone(),
    };

    // Routes
    let public_routes = Router::new()
        .route("/up", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/api/v1/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/api/v1/chats/{chat_id}", get(chats::get_chat).delete(chats::delete_chat))
        .route("/api/v1/settings", get(settings::get_settings).put(settings::update_settings))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let cable_route = Router::new()
        .route("/cable", get(cable_upgrade))
        .with_state(cable_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(cable_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("A5 server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct CableQuery {
    token: Option<String>,
}

/// Validate the JWT before upgrading so unauthenticated sockets never open.
async fn cable_upgrade(
    State(state): State<CableState>,
    Query(query): Query<CableQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = query
        .token
        .as_deref()
        .and_then(|token| verify_token(&state.jwt_secret, token))
        .ok_or_else(|| {
            warn!("Rejected cable upgrade without a valid token");
            StatusCode::UNAUTHORIZED
        })?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, claims.sub, claims.username)
    }))
}
