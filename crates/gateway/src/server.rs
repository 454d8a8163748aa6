use {
    axum::{
        Router,
        extract::{Path, Query, State},
        http::{StatusCode, header},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    chatmap_config::ServerConfig,
    chatmap_sessions::SessionId,
    chatmap_whatsapp::{CreateOutcome, PairingState},
    serde::{Deserialize, Serialize},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{error::ApiError, qr, state::AppState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/start", get(start_handler))
        .route("/start-qr", get(start_qr_handler))
        .route("/qr", get(qr_handler))
        .route("/logout", get(logout_handler))
        .route("/sessions", get(sessions_handler))
        .route("/media/{file}", get(media_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn start_gateway(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let lines = [
        format!("chatmap gateway v{}", state.version),
        format!("listening on {addr}"),
        format!(
            "{} sessions live",
            state.sessions.registry().len().await
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Request / response shapes ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

impl SessionQuery {
    fn session_id(self) -> Result<SessionId, ApiError> {
        let raw = self
            .session
            .filter(|s| !s.is_empty())
            .ok_or(ApiError::MissingParam("session"))?;
        Ok(SessionId::new(raw)?)
    }
}

#[derive(Debug, Default, Deserialize)]
struct MediaQuery {
    user: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    user: String,
}

#[derive(Debug, Serialize)]
struct SessionBody {
    session: String,
    status: &'static str,
    state: PairingState,
    user: String,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "sessions": state.sessions.registry().len().await,
    }))
}

async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<StatusBody>, ApiError> {
    let id = query.session_id()?;
    let status = state.sessions.status(&id).await;
    Ok(Json(StatusBody {
        status: status.as_str(),
        user: status.user().to_string(),
    }))
}

async fn start_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<String, ApiError> {
    let id = query.session_id()?;
    Ok(match state.sessions.create_session(&id).await {
        CreateOutcome::Started => format!("Initializing session {id}"),
        CreateOutcome::AlreadyInitialized => format!("Session {id} already initialized"),
    })
}

async fn start_qr_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let id = query.session_id()?;
    let code = state.sessions.start_and_wait_for_qr(&id).await?;
    png_response(&code)
}

async fn qr_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let id = query.session_id()?;
    match state.sessions.current_qr(&id).await? {
        Some(code) => png_response(&code),
        None => Err(ApiError::QrNotReady(id)),
    }
}

fn png_response(code: &str) -> Result<Response, ApiError> {
    let png = qr::render_png(code)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn logout_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<StatusCode, ApiError> {
    let id = query.session_id()?;
    state.sessions.logout(&id).await;
    Ok(StatusCode::OK)
}

async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionBody>> {
    let sessions = state
        .sessions
        .list_sessions()
        .await
        .into_iter()
        .map(|snapshot| {
            let status = snapshot.status();
            SessionBody {
                session: snapshot.id.to_string(),
                status: status.as_str(),
                state: snapshot.state,
                user: status.user().to_string(),
            }
        })
        .collect();
    Json(sessions)
}

async fn media_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Response, ApiError> {
    let user = query
        .user
        .filter(|u| !u.is_empty())
        .ok_or(ApiError::MissingParam("user"))?;
    Ok(match state.media.fetch(&user, &file).await? {
        Some(content) => ([(header::CONTENT_TYPE, content.mime)], content.bytes).into_response(),
        None => StatusCode::OK.into_response(),
    })
}
